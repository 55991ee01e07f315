//! Labeled-dataset construction.
//!
//! The builder walks a root directory holding one subdirectory per
//! expression class, extracts features from every face in every image,
//! and appends rows to a single comma-separated table. The header is
//! written exactly once, before any extraction begins.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::detect::{self, LandmarkSource};
use crate::error::{Error, Result};
use crate::features::{self, FaceData};

/// Column header written at the top of every dataset file.
pub const HEADER: &str = "Label,LeftEyebrow,RightEyebrow,LeftLip,RightLip,LipHeight,LipWidth,LeftEyeHeight,LeftEyeWidth,RightEyeHeight,RightEyeWidth,LipsToNose,NoseHeight,NoseWidth,LeftEyeToLeftLip,RightEyeToRightLip";

/// Class subdirectories, in the order they are walked. The directory
/// name doubles as the row label.
pub const CLASS_DIRS: [&str; 6] = ["Surprise", "Sadness", "Fear", "Anger", "Disgust", "Joy"];

/// Summary of one dataset build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Files examined across all class directories.
    pub images: usize,
    /// Feature rows appended, one per successfully measured face.
    pub rows: usize,
    /// Skipped files and dropped faces, each with the reason, in walk
    /// order.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Create `path`, truncating any existing file, and write the header.
pub fn write_header(path: &Path) -> Result<()> {
    fs::write(path, format!("{}\n", HEADER))?;
    Ok(())
}

/// Append one row per face to the dataset file at `path`. The file is
/// opened and closed around each call, so rows from successive calls
/// land in call order.
pub fn append_rows(path: &Path, rows: &[FaceData]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&format_row(row));
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    Ok(())
}

/// One table row: label then the 15 feature values, comma separated.
/// Labels never contain commas, so no quoting is needed.
pub fn format_row(row: &FaceData) -> String {
    let mut s = row.label.clone();
    for v in row.values() {
        s.push(',');
        s.push_str(&v.to_string());
    }
    s
}

/// Parse a dataset file back into rows, validating the header.
pub fn read_rows(path: &Path) -> Result<Vec<FaceData>> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines().enumerate();

    match lines.next() {
        Some((_, first)) if first == HEADER => {}
        Some((_, first)) => {
            return Err(Error::TableFormat {
                line: 1,
                message: format!("unexpected header {:?}", first),
            });
        }
        None => {
            return Err(Error::TableFormat {
                line: 1,
                message: "empty file".to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (idx, line) in lines {
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != FaceData::FEATURE_COUNT + 1 {
            return Err(Error::TableFormat {
                line: line_no,
                message: format!(
                    "expected {} fields, got {}",
                    FaceData::FEATURE_COUNT + 1,
                    fields.len()
                ),
            });
        }
        let mut values = [0f32; FaceData::FEATURE_COUNT];
        for (i, field) in fields[1..].iter().enumerate() {
            values[i] = field.parse().map_err(|_| Error::TableFormat {
                line: line_no,
                message: format!("not a number: {:?}", field),
            })?;
        }
        rows.push(FaceData::from_values(fields[0].to_string(), values));
    }

    Ok(rows)
}

/// Extract one row per detected face from a single image file. A face
/// with degenerate geometry is dropped and its reason pushed onto
/// `dropped`; other faces in the same image still produce rows.
fn extract_file(
    path: &Path,
    label: &str,
    source: &mut dyn LandmarkSource,
    dropped: &mut Vec<String>,
) -> Result<Vec<FaceData>> {
    let gray = detect::load_gray(path)?;
    let mut rows = Vec::new();
    for lm in source.landmarks(&gray)? {
        match features::extract(&lm, label) {
            Ok(row) => rows.push(row),
            Err(e @ Error::DegenerateGeometry { .. }) => dropped.push(e.to_string()),
            Err(e) => return Err(e),
        }
    }
    Ok(rows)
}

/// Walk the six class directories under `root` and write one dataset
/// file at `out`.
///
/// Unreadable files and faces with degenerate geometry are skipped and
/// reported in the returned summary; an image with no detectable face
/// contributes zero rows and is not an error. A missing class directory
/// or an unwritable output path aborts the run.
pub fn build(root: &Path, out: &Path, source: &mut dyn LandmarkSource) -> Result<BuildReport> {
    write_header(out)?;

    let mut report = BuildReport::default();

    for class in CLASS_DIRS {
        let dir = root.join(class);
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("class directory not found: {}", dir.display()),
            )));
        }

        log::info!("extracting class {} from {}", class, dir.display());

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        for file in files {
            report.images += 1;
            let mut dropped = Vec::new();
            match extract_file(&file, class, source, &mut dropped) {
                Ok(rows) => {
                    if rows.is_empty() && dropped.is_empty() {
                        log::info!("no face found in {}", file.display());
                    }
                    append_rows(out, &rows)?;
                    report.rows += rows.len();
                }
                Err(e) => {
                    log::warn!("skipping {}: {}", file.display(), e);
                    report.skipped.push((file.clone(), e.to_string()));
                }
            }
            for reason in dropped {
                log::warn!("skipping a face in {}: {}", file.display(), reason);
                report.skipped.push((file.clone(), reason));
            }
        }
    }

    log::info!(
        "dataset complete: {} rows from {} images, {} skipped",
        report.rows,
        report.images,
        report.skipped.len()
    );

    Ok(report)
}
