//! End-to-end dataset builder tests with a stubbed landmark source.
//!
//! Real detection needs the model files, so these tests drive the
//! builder with a source that decides how many faces an image holds
//! from its first pixel value.

use std::fs;
use std::path::{Path, PathBuf};

use face_mood::{dataset, Error, GrayImage, Landmarks, LandmarkSource, Point};

/// Face count keyed on the top-left pixel: 0 means no face, 64 means
/// two faces, 192 means a collapsed face followed by a healthy one,
/// 255 means a face whose landmarks collapse to one point, anything
/// else one face.
struct PixelSource;

fn face(offset: f32) -> Landmarks {
    Landmarks::from_fn(|i| Point::new(i as f32 * 2.0 + offset, (i % 9) as f32))
}

fn collapsed() -> Landmarks {
    Landmarks::from_fn(|_| Point::new(1.0, 1.0))
}

impl LandmarkSource for PixelSource {
    fn landmarks(&mut self, image: &GrayImage) -> face_mood::Result<Vec<Landmarks>> {
        Ok(match image.get_pixel(0, 0) {
            0 => vec![],
            64 => vec![face(0.0), face(100.0)],
            192 => vec![collapsed(), face(0.0)],
            255 => vec![collapsed()],
            _ => vec![face(0.0)],
        })
    }
}

fn write_png(path: &Path, value: u8) {
    let img = image::ImageBuffer::from_pixel(4, 4, image::Luma([value]));
    img.save(path).unwrap();
}

fn fresh_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(name);
    fs::remove_dir_all(&root).ok();
    for class in dataset::CLASS_DIRS {
        fs::create_dir_all(root.join(class)).unwrap();
    }
    root
}

#[test]
fn build_appends_one_row_per_face_in_walk_order() {
    let root = fresh_root("face_mood_build_ok");
    for class in dataset::CLASS_DIRS {
        write_png(&root.join(class).join("a.png"), 128);
        write_png(&root.join(class).join("b.png"), 128);
    }
    // A faceless image and a two-face image on top of the pairs.
    write_png(&root.join("Joy").join("none.png"), 0);
    write_png(&root.join("Fear").join("twins.png"), 64);

    let out = root.join("features.csv");
    let report = dataset::build(&root, &out, &mut PixelSource).unwrap();

    assert_eq!(report.images, 14);
    assert_eq!(report.rows, 14);
    assert!(report.skipped.is_empty());

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.starts_with(dataset::HEADER));

    let rows = dataset::read_rows(&out).unwrap();
    assert_eq!(rows.len(), 14);

    let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
    let mut expected = Vec::new();
    for class in dataset::CLASS_DIRS {
        let count = match class {
            "Fear" => 4,
            _ => 2,
        };
        expected.extend(std::iter::repeat(class).take(count));
    }
    assert_eq!(labels, expected);

    // Clean up
    fs::remove_dir_all(root).ok();
}

#[test]
fn build_skips_bad_files_and_keeps_going() {
    let root = fresh_root("face_mood_build_skips");
    let anger = root.join("Anger");
    fs::write(anger.join("bad.txt"), b"not an image").unwrap();
    write_png(&anger.join("flat.png"), 255);
    write_png(&anger.join("good.png"), 128);

    let out = root.join("features.csv");
    let report = dataset::build(&root, &out, &mut PixelSource).unwrap();

    assert_eq!(report.images, 3);
    assert_eq!(report.rows, 1);
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped[0].0.ends_with("bad.txt"));
    assert!(report.skipped[1].0.ends_with("flat.png"));

    let rows = dataset::read_rows(&out).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].label, "Anger");

    fs::remove_dir_all(root).ok();
}

#[test]
fn build_drops_only_the_degenerate_face() {
    let root = fresh_root("face_mood_build_mixed_pair");
    write_png(&root.join("Joy").join("pair.png"), 192);

    let out = root.join("features.csv");
    let report = dataset::build(&root, &out, &mut PixelSource).unwrap();

    // The collapsed face is reported; the healthy one still lands.
    assert_eq!(report.images, 1);
    assert_eq!(report.rows, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].0.ends_with("pair.png"));
    assert!(report.skipped[0].1.contains("coincident"));

    let rows = dataset::read_rows(&out).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].label, "Joy");

    fs::remove_dir_all(root).ok();
}

#[test]
fn build_fails_when_a_class_directory_is_missing() {
    let root = std::env::temp_dir().join("face_mood_build_missing");
    fs::remove_dir_all(&root).ok();
    fs::create_dir_all(root.join("Surprise")).unwrap();

    let out = root.join("features.csv");
    match dataset::build(&root, &out, &mut PixelSource) {
        Err(Error::Io(_)) => {}
        other => panic!("expected Io error, got {:?}", other.map(|_| ())),
    }

    fs::remove_dir_all(root).ok();
}
