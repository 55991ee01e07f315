//! Face detection and landmark acquisition.
//!
//! Detection is delegated to a SeetaFace cascade (via rustface) and
//! landmark placement to the shape model; this module wires the two into
//! a [`LandmarkSource`]. The trait seam keeps the feature and dataset
//! paths testable without any model artifacts on disk.

use std::path::Path;

use image::GenericImageView;
use rustface::{Detector, ImageData};

use crate::error::{Error, Result};
use crate::shape::ShapeModel;
use crate::types::{BoundingBox, GrayImage, Landmarks};

/// Supplies per-face landmark sets for one image.
pub trait LandmarkSource {
    /// Landmarks for every detected face, in detection order. An empty
    /// vector means no face was found, which is not an error.
    fn landmarks(&mut self, image: &GrayImage) -> Result<Vec<Landmarks>>;
}

/// Face detector plus shape model, wired together.
pub struct FacePipeline {
    detector: Box<dyn Detector>,
    shape: ShapeModel,
}

impl FacePipeline {
    /// Load both model artifacts. `detector_path` is the SeetaFace
    /// cascade binary, `shape_path` the 68-point landmark model.
    pub fn new(detector_path: &Path, shape_path: &Path) -> Result<Self> {
        if !detector_path.exists() {
            return Err(Error::MissingAsset {
                path: detector_path.to_path_buf(),
            });
        }
        let path_str = detector_path.to_str().ok_or_else(|| {
            Error::FaceDetector(format!(
                "detector path is not valid UTF-8: {}",
                detector_path.display()
            ))
        })?;

        let mut detector =
            rustface::create_detector(path_str).map_err(|e| Error::FaceDetector(e.to_string()))?;
        detector.set_min_face_size(20);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let shape = ShapeModel::open(shape_path)?;
        if shape.num_parts() != Landmarks::COUNT {
            return Err(Error::LandmarkCount {
                expected: Landmarks::COUNT,
                got: shape.num_parts(),
            });
        }

        Ok(Self { detector, shape })
    }

    /// Smallest face the detector will report, in pixels.
    pub fn set_min_face_size(&mut self, size: u32) {
        self.detector.set_min_face_size(size);
    }
}

impl LandmarkSource for FacePipeline {
    fn landmarks(&mut self, image: &GrayImage) -> Result<Vec<Landmarks>> {
        let data = ImageData::new(image.as_bytes(), image.width(), image.height());
        let faces = self.detector.detect(&data);

        let mut out = Vec::with_capacity(faces.len());
        for face in &faces {
            let bbox = face.bbox();
            let rect = BoundingBox::new(
                bbox.x() as f32,
                bbox.y() as f32,
                bbox.width() as f32,
                bbox.height() as f32,
            );
            let points = self.shape.predict(image, &rect);
            out.push(Landmarks::from_points(points)?);
        }
        Ok(out)
    }
}

/// Load an image file and convert it to the grayscale buffer the
/// detector and shape model operate on.
pub fn load_gray(path: &Path) -> Result<GrayImage> {
    let img = image::open(path)?;
    let (width, height) = img.dimensions();
    let gray = img.to_luma8();
    Ok(GrayImage::new(gray.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_gray_preserves_dimensions_and_values() {
        let path = std::env::temp_dir().join("face_mood_gray_probe.png");

        let img = image::ImageBuffer::from_fn(4, 3, |x, y| image::Luma([(x * 10 + y) as u8]));
        img.save(&path).unwrap();

        let gray = load_gray(&path).unwrap();
        assert_eq!(gray.width(), 4);
        assert_eq!(gray.height(), 3);
        assert_eq!(gray.get_pixel(0, 0), 0);
        assert_eq!(gray.get_pixel(3, 2), 32);

        // Clean up
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_gray_reports_missing_files() {
        let path = std::env::temp_dir().join("face_mood_no_such_image.png");
        match load_gray(&path) {
            Err(Error::Io(_)) | Err(Error::Image(_)) => {}
            other => panic!("expected an I/O error, got {:?}", other.map(|_| ())),
        }
    }
}
