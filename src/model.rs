//! Expression classifier boundary.
//!
//! The classifier itself is a multinomial logistic regression fit by
//! gradient descent; all tensor work is delegated to candle. This module
//! owns everything on that side of the line: training, prediction,
//! evaluation metrics, and weight persistence.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{linear, loss, ops, AdamW, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::FaceData;

/// The six expression classes. The declaration order fixes the score
/// vector layout everywhere a per-class array appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Anger,
    Disgust,
    Fear,
    Joy,
    Sadness,
    Surprise,
}

impl Expression {
    /// Number of expression classes.
    pub const COUNT: usize = 6;

    /// All classes in score order.
    pub const ALL: [Expression; Expression::COUNT] = [
        Expression::Anger,
        Expression::Disgust,
        Expression::Fear,
        Expression::Joy,
        Expression::Sadness,
        Expression::Surprise,
    ];

    /// Canonical label, matching the dataset class directory names.
    pub fn label(&self) -> &'static str {
        match self {
            Expression::Anger => "Anger",
            Expression::Disgust => "Disgust",
            Expression::Fear => "Fear",
            Expression::Joy => "Joy",
            Expression::Sadness => "Sadness",
            Expression::Surprise => "Surprise",
        }
    }

    /// Parse a label, ignoring case.
    pub fn from_label(label: &str) -> Result<Self> {
        match label.to_ascii_lowercase().as_str() {
            "anger" => Ok(Expression::Anger),
            "disgust" => Ok(Expression::Disgust),
            "fear" => Ok(Expression::Fear),
            "joy" => Ok(Expression::Joy),
            "sadness" => Ok(Expression::Sadness),
            "surprise" => Ok(Expression::Surprise),
            _ => Err(Error::UnknownLabel(label.to_string())),
        }
    }

    /// Position of this class in the score vector.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Gradient-descent settings for [`ExpressionModel::train`].
#[derive(Debug, Clone)]
pub struct TrainParams {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 500,
            learning_rate: 0.05,
        }
    }
}

/// One classification outcome: the winning class plus the full softmax
/// distribution in [`Expression::ALL`] order.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub expression: Expression,
    pub scores: [f32; Expression::COUNT],
}

/// Aggregate quality measures over a labeled evaluation set.
///
/// Micro accuracy counts every row equally; macro accuracy averages the
/// per-class recalls over the classes actually present in the truth
/// labels, so a rare class weighs as much as a common one.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub micro_accuracy: f64,
    pub macro_accuracy: f64,
    pub log_loss: f64,
    /// Improvement over always predicting the empirical class
    /// distribution: `(prior - loss) / prior`. 1 is a perfect model,
    /// 0 is no better than the prior.
    pub log_loss_reduction: f64,
    pub per_class_precision: [f64; Expression::COUNT],
    pub per_class_recall: [f64; Expression::COUNT],
}

impl Metrics {
    fn from_confusion(
        confusion: [[usize; Expression::COUNT]; Expression::COUNT],
        log_loss: f64,
        prior_log_loss: f64,
    ) -> Self {
        let total: usize = confusion.iter().flatten().sum();
        let correct: usize = (0..Expression::COUNT).map(|i| confusion[i][i]).sum();

        let mut per_class_precision = [0f64; Expression::COUNT];
        let mut per_class_recall = [0f64; Expression::COUNT];
        let mut recall_sum = 0f64;
        let mut classes_present = 0usize;

        for c in 0..Expression::COUNT {
            let truth_total: usize = confusion[c].iter().sum();
            let predicted_total: usize = (0..Expression::COUNT).map(|r| confusion[r][c]).sum();

            if truth_total > 0 {
                per_class_recall[c] = confusion[c][c] as f64 / truth_total as f64;
                recall_sum += per_class_recall[c];
                classes_present += 1;
            }
            if predicted_total > 0 {
                per_class_precision[c] = confusion[c][c] as f64 / predicted_total as f64;
            }
        }

        Self {
            micro_accuracy: correct as f64 / total as f64,
            macro_accuracy: if classes_present > 0 {
                recall_sum / classes_present as f64
            } else {
                0.0
            },
            log_loss,
            log_loss_reduction: if prior_log_loss > 0.0 {
                (prior_log_loss - log_loss) / prior_log_loss
            } else {
                0.0
            },
            per_class_precision,
            per_class_recall,
        }
    }
}

/// A trained expression classifier.
///
/// Holds its own weights; nothing here is process-global, so callers can
/// train, load, and compare several models side by side.
pub struct ExpressionModel {
    varmap: VarMap,
    layer: Linear,
    device: Device,
}

impl ExpressionModel {
    fn init(device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer = linear(FaceData::FEATURE_COUNT, Expression::COUNT, vb.pp("output"))?;
        Ok(Self {
            varmap,
            layer,
            device,
        })
    }

    /// Fit a fresh classifier on labeled feature rows.
    pub fn train(rows: &[FaceData], params: &TrainParams) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::InvalidModel(
                "cannot train on an empty dataset".to_string(),
            ));
        }

        let model = Self::init(Device::Cpu)?;
        let (xs, ys) = model.tensors_from(rows)?;

        let mut opt = AdamW::new(
            model.varmap.all_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..Default::default()
            },
        )?;

        for epoch in 0..params.epochs {
            let logits = model.layer.forward(&xs)?;
            let loss = loss::cross_entropy(&logits, &ys)?;
            opt.backward_step(&loss)?;

            if (epoch + 1) % 100 == 0 {
                log::debug!("epoch {}: loss {:.4}", epoch + 1, loss.to_scalar::<f32>()?);
            }
        }

        Ok(model)
    }

    /// Classify one face.
    pub fn predict(&self, face: &FaceData) -> Result<Prediction> {
        let input = Tensor::from_vec(
            face.values().to_vec(),
            (1, FaceData::FEATURE_COUNT),
            &self.device,
        )?;
        let logits = self.layer.forward(&input)?;
        let probs: Vec<f32> = ops::softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1()?;

        let mut best = 0;
        for (i, p) in probs.iter().enumerate() {
            if *p > probs[best] {
                best = i;
            }
        }

        let mut scores = [0f32; Expression::COUNT];
        scores.copy_from_slice(&probs);

        Ok(Prediction {
            expression: Expression::ALL[best],
            scores,
        })
    }

    /// Score the classifier against labeled rows.
    pub fn evaluate(&self, rows: &[FaceData]) -> Result<Metrics> {
        if rows.is_empty() {
            return Err(Error::InvalidModel(
                "cannot evaluate on an empty dataset".to_string(),
            ));
        }

        let (xs, _) = self.tensors_from(rows)?;
        let logits = self.layer.forward(&xs)?;
        let probs: Vec<Vec<f32>> = ops::softmax(&logits, D::Minus1)?.to_vec2()?;

        let mut confusion = [[0usize; Expression::COUNT]; Expression::COUNT];
        let mut log_loss_sum = 0f64;

        for (row, p) in rows.iter().zip(&probs) {
            let truth = Expression::from_label(&row.label)?.index();
            let mut best = 0;
            for (i, v) in p.iter().enumerate() {
                if *v > p[best] {
                    best = i;
                }
            }
            confusion[truth][best] += 1;
            // Clamp before the log so a confidently wrong prediction
            // stays finite.
            log_loss_sum -= f64::from(p[truth]).max(1e-15).ln();
        }

        // Baseline loss of always predicting the class frequencies.
        let n = rows.len() as f64;
        let prior_log_loss = -confusion
            .iter()
            .map(|row| row.iter().sum::<usize>())
            .filter(|&count| count > 0)
            .map(|count| {
                let p = count as f64 / n;
                p * p.ln()
            })
            .sum::<f64>();

        Ok(Metrics::from_confusion(
            confusion,
            log_loss_sum / rows.len() as f64,
            prior_log_loss,
        ))
    }

    /// Write the weights to `path` in safetensors format.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// Load weights produced by [`ExpressionModel::save`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingAsset {
                path: path.to_path_buf(),
            });
        }
        let mut model = Self::init(Device::Cpu)?;
        model.varmap.load(path)?;
        Ok(model)
    }

    fn tensors_from(&self, rows: &[FaceData]) -> Result<(Tensor, Tensor)> {
        let mut xs = Vec::with_capacity(rows.len() * FaceData::FEATURE_COUNT);
        let mut ys = Vec::with_capacity(rows.len());
        for row in rows {
            xs.extend_from_slice(&row.values());
            ys.push(Expression::from_label(&row.label)?.index() as u32);
        }
        let xs = Tensor::from_vec(xs, (rows.len(), FaceData::FEATURE_COUNT), &self.device)?;
        let ys = Tensor::from_vec(ys, rows.len(), &self.device)?;
        Ok((xs, ys))
    }
}
