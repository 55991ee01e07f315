use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("model asset not found: {}", path.display())]
    MissingAsset { path: PathBuf },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("face detector error: {0}")]
    FaceDetector(String),

    #[error("degenerate geometry: normalizer landmarks {inner} and {normalizer} are coincident")]
    DegenerateGeometry { inner: usize, normalizer: usize },

    #[error("expected {expected} landmark points, got {got}")]
    LandmarkCount { expected: usize, got: usize },

    #[error("bad feature table at line {line}: {message}")]
    TableFormat { line: usize, message: String },

    #[error("unknown expression label: {0:?}")]
    UnknownLabel(String),

    #[error("classifier error: {0}")]
    Classifier(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
