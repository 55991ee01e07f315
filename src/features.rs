//! Geometric feature extraction over a 68-point landmark set.
//!
//! Every feature is a normalized distance ratio: an absolute pixel
//! distance divided by a reference distance local to the same facial
//! region. Both legs scale with the face, so the ratio is invariant to
//! the face's size and distance from the camera.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::landmark::{indices::*, spans};
use crate::types::Landmarks;

/// The measured geometry of one detected face, plus its expression label.
///
/// Field order matches the dataset column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    pub label: String,
    pub left_eyebrow: f32,
    pub right_eyebrow: f32,
    pub left_lip: f32,
    pub right_lip: f32,
    pub lip_height: f32,
    pub lip_width: f32,
    pub left_eye_height: f32,
    pub left_eye_width: f32,
    pub right_eye_height: f32,
    pub right_eye_width: f32,
    pub lips_to_nose: f32,
    pub nose_height: f32,
    pub nose_width: f32,
    pub left_eye_to_left_lip: f32,
    pub right_eye_to_right_lip: f32,
}

impl FaceData {
    /// Number of numeric features per face.
    pub const FEATURE_COUNT: usize = 15;

    /// The numeric features in dataset column order.
    pub fn values(&self) -> [f32; Self::FEATURE_COUNT] {
        [
            self.left_eyebrow,
            self.right_eyebrow,
            self.left_lip,
            self.right_lip,
            self.lip_height,
            self.lip_width,
            self.left_eye_height,
            self.left_eye_width,
            self.right_eye_height,
            self.right_eye_width,
            self.lips_to_nose,
            self.nose_height,
            self.nose_width,
            self.left_eye_to_left_lip,
            self.right_eye_to_right_lip,
        ]
    }

    /// Rebuild a `FaceData` from a label and column-ordered values.
    pub fn from_values(label: String, v: [f32; Self::FEATURE_COUNT]) -> Self {
        Self {
            label,
            left_eyebrow: v[0],
            right_eyebrow: v[1],
            left_lip: v[2],
            right_lip: v[3],
            lip_height: v[4],
            lip_width: v[5],
            left_eye_height: v[6],
            left_eye_width: v[7],
            right_eye_height: v[8],
            right_eye_width: v[9],
            lips_to_nose: v[10],
            nose_height: v[11],
            nose_width: v[12],
            left_eye_to_left_lip: v[13],
            right_eye_to_right_lip: v[14],
        }
    }
}

/// Distance between `p1` and `p2`, divided by the distance between
/// `inner` and `normalizer`.
///
/// Fails with [`Error::DegenerateGeometry`] when the normalizer pair is
/// coincident; a zero reference distance means the landmark set does not
/// describe a usable face.
fn ratio(lm: &Landmarks, inner: usize, normalizer: usize, p1: usize, p2: usize) -> Result<f32> {
    let denom = lm[inner].distance(&lm[normalizer]);
    if denom == 0.0 {
        return Err(Error::DegenerateGeometry { inner, normalizer });
    }
    Ok(lm[p1].distance(&lm[p2]) / denom)
}

/// Sum of normalized distances from `inner` to every point in `span`,
/// each measured against the same normalizer pair. Collapses the shape
/// of a multi-point contour into one scalar.
fn contour_sum(
    lm: &Landmarks,
    inner: usize,
    normalizer: usize,
    span: std::ops::RangeInclusive<usize>,
) -> Result<f32> {
    let mut sum = 0.0;
    for i in span {
        sum += ratio(lm, inner, normalizer, i, inner)?;
    }
    Ok(sum)
}

/// Transform one face's landmark set into its 15-feature vector.
///
/// The index pairs below are fixed by the 68-point annotation scheme;
/// see [`crate::landmark`] for the name-to-index table.
pub fn extract(lm: &Landmarks, label: &str) -> Result<FaceData> {
    let left_eyebrow = contour_sum(lm, LEFT_EYE_INNER, LEFT_BROW_INNER, spans::LEFT_BROW_ARCH)?;
    let right_eyebrow = contour_sum(
        lm,
        RIGHT_EYE_INNER,
        RIGHT_BROW_INNER,
        spans::RIGHT_BROW_ARCH,
    )?;

    let left_lip = contour_sum(lm, SUBNASALE, UPPER_LIP_TOP, spans::LEFT_LIP_CURVE)?;
    let right_lip = contour_sum(lm, SUBNASALE, UPPER_LIP_TOP, spans::RIGHT_LIP_CURVE)?;

    let lip_width = ratio(lm, SUBNASALE, UPPER_LIP_TOP, MOUTH_LEFT, MOUTH_RIGHT)?;
    let lip_height = ratio(lm, SUBNASALE, UPPER_LIP_TOP, UPPER_LIP_TOP, LOWER_LIP_BOTTOM)?;

    let left_eye_height = ratio(
        lm,
        LEFT_EYE_INNER,
        LEFT_EYE_TOP_INNER,
        LEFT_EYE_BOTTOM_INNER,
        LEFT_EYE_TOP_OUTER,
    )?;
    let left_eye_width = ratio(
        lm,
        LEFT_EYE_INNER,
        LEFT_EYE_TOP_INNER,
        LEFT_EYE_INNER,
        LEFT_EYE_OUTER,
    )?;

    let right_eye_height = ratio(
        lm,
        RIGHT_EYE_INNER,
        RIGHT_EYE_TOP_INNER,
        RIGHT_EYE_BOTTOM_INNER,
        RIGHT_EYE_TOP_OUTER,
    )?;
    let right_eye_width = ratio(
        lm,
        RIGHT_EYE_INNER,
        RIGHT_EYE_TOP_INNER,
        RIGHT_EYE_TOP_INNER,
        RIGHT_EYE_BOTTOM_OUTER,
    )?;

    let lips_to_nose = ratio(lm, SUBNASALE, UPPER_LIP_TOP, SUBNASALE, LOWER_LIP_BOTTOM)?;

    let nose_height = contour_sum(lm, SUBNASALE, NOSE_TIP, spans::NOSE_BRIDGE)?;
    let nose_width = contour_sum(lm, UPPER_LIP_TOP, SUBNASALE, spans::NOSE_BASE)?;

    let left_eye_to_left_lip = ratio(
        lm,
        NASION,
        LEFT_EYE_INNER,
        LEFT_EYE_BOTTOM_OUTER,
        MOUTH_LEFT,
    )?;
    let right_eye_to_right_lip = ratio(
        lm,
        NASION,
        RIGHT_EYE_INNER,
        RIGHT_EYE_BOTTOM_OUTER,
        MOUTH_RIGHT,
    )?;

    Ok(FaceData {
        label: label.to_string(),
        left_eyebrow,
        right_eyebrow,
        left_lip,
        right_lip,
        lip_height,
        lip_width,
        left_eye_height,
        left_eye_width,
        right_eye_height,
        right_eye_width,
        lips_to_nose,
        nose_height,
        nose_width,
        left_eye_to_left_lip,
        right_eye_to_right_lip,
    })
}
