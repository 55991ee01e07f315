//! # face-mood
//!
//! Geometric facial-expression features and a six-class expression
//! classifier.
//!
//! This crate provides:
//! - **Feature Extraction**: 15 scale-invariant distance ratios computed
//!   from 68 facial landmark points
//! - **Dataset Building**: walks labeled image directories and writes one
//!   feature row per detected face
//! - **Classification**: trains, evaluates, and applies a six-class
//!   expression model over those features
//!
//! Landmarks come from an ensemble-of-regression-trees shape model (the
//! dlib shape_predictor format) applied inside face boxes found by a
//! SeetaFace cascade detector. Both sit behind the [`LandmarkSource`]
//! trait, so the feature and dataset paths run without model artifacts.
//!
//! ## Quick Start
//!
//! ```rust
//! use face_mood::{extract, Landmarks, Point};
//!
//! // Landmarks normally come from FacePipeline; any 68-point set works.
//! let landmarks = Landmarks::from_fn(|i| Point::new(i as f32, (i % 9) as f32));
//!
//! let face = extract(&landmarks, "Joy").unwrap();
//! assert_eq!(face.values().len(), 15);
//! ```
//!
//! ## Feeding the classifier
//!
//! ```rust,no_run
//! use face_mood::{dataset, ExpressionModel, TrainParams};
//! use std::path::Path;
//!
//! let rows = dataset::read_rows(Path::new("features.csv")).unwrap();
//! let model = ExpressionModel::train(&rows, &TrainParams::default()).unwrap();
//! model.save(Path::new("expression.safetensors")).unwrap();
//! ```

pub mod dataset;
mod detect;
mod error;
mod features;
pub mod landmark;
mod model;
mod shape;
mod types;

pub use detect::{load_gray, FacePipeline, LandmarkSource};
pub use error::{Error, Result};
pub use features::{extract, FaceData};
pub use model::{Expression, ExpressionModel, Metrics, Prediction, TrainParams};
pub use shape::ShapeModel;
pub use types::{BoundingBox, GrayImage, Landmarks, Point};
