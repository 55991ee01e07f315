//! Landmark shape-model loading and inference.
//!
//! Parses dlib's shape_predictor serialization format, either raw `.dat`
//! or bzip2-compressed `.dat.bz2`, and runs the ensemble-of-regression-
//! trees cascade to place landmark points inside a face bounding box.
//!
//! Pre-trained models come from the dlib-models repository:
//!
//! ```bash
//! git clone --depth 1 https://github.com/davisking/dlib-models.git
//! ```
//!
//! The 68-point model is `shape_predictor_68_face_landmarks.dat.bz2`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::error::{Error, Result};
use crate::types::{BoundingBox, GrayImage, Point};

/// Reader for dlib's binary serialization.
///
/// Integers use a control byte (high bit = sign, low nibble = payload
/// length) followed by that many little-endian payload bytes. Floats are
/// stored as (mantissa, exponent) integer pairs. Matrix dimensions are
/// stored negated.
struct DatReader<R: Read> {
    inner: R,
}

impl<R: Read> DatReader<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn int(&mut self) -> Result<i64> {
        let control = self.byte()?;
        let negative = control & 0x80 != 0;
        let len = (control & 0x0F) as usize;
        if len > 8 {
            return Err(Error::InvalidModel(format!(
                "bad varint control byte: {:#04x}",
                control
            )));
        }

        let mut value: u64 = 0;
        for shift in 0..len {
            value |= (self.byte()? as u64) << (8 * shift);
        }

        let value = value as i64;
        Ok(if negative { -value } else { value })
    }

    fn ulong(&mut self) -> Result<u64> {
        let value = self.int()?;
        if value < 0 {
            return Err(Error::InvalidModel(format!(
                "expected an unsigned value, got {}",
                value
            )));
        }
        Ok(value as u64)
    }

    fn float(&mut self) -> Result<f32> {
        let mantissa = self.int()?;
        let exponent = self.int()? as i32;
        if mantissa == 0 {
            return Ok(0.0);
        }
        Ok((mantissa as f64 * 2f64.powi(exponent)) as f32)
    }

    /// A column matrix of interleaved (x, y) coordinates.
    fn point_matrix(&mut self) -> Result<Vec<Point>> {
        let rows = -self.int()?;
        let cols = -self.int()?;
        if cols != 1 || rows < 2 || rows % 2 != 0 {
            return Err(Error::InvalidModel(format!(
                "bad point matrix dimensions: {}x{}",
                rows, cols
            )));
        }

        let mut points = Vec::with_capacity(rows as usize / 2);
        for _ in 0..rows / 2 {
            let x = self.float()?;
            let y = self.float()?;
            points.push(Point::new(x, y));
        }
        Ok(points)
    }
}

/// One pixel-difference split. The indices point into the owning
/// stage's feature pool.
#[derive(Debug, Clone, Copy)]
struct Split {
    idx1: u32,
    idx2: u32,
    threshold: f32,
}

/// A regression tree stored as a complete binary tree: `splits` holds
/// the internal nodes in breadth-first order and `leaves` the
/// `splits.len() + 1` per-part deltas.
#[derive(Debug)]
struct Tree {
    splits: Vec<Split>,
    leaves: Vec<Vec<Point>>,
}

impl Tree {
    /// Walk from the root to a leaf. A feature difference above the
    /// threshold selects child `2i + 1`, otherwise `2i + 2`; node `k`
    /// past the last split is leaf `k - splits.len()`.
    fn leaf(&self, values: &[f32]) -> &[Point] {
        let mut i = 0usize;
        while i < self.splits.len() {
            let s = &self.splits[i];
            i = if values[s.idx1 as usize] - values[s.idx2 as usize] > s.threshold {
                2 * i + 1
            } else {
                2 * i + 2
            };
        }
        &self.leaves[i - self.splits.len()]
    }
}

/// One cascade stage: a pool of sampling locations shared by all of the
/// stage's trees.
struct Stage {
    trees: Vec<Tree>,
    /// Landmark index each pool location is anchored to.
    anchors: Vec<u32>,
    /// Offset from the anchor, in the initial shape's frame.
    offsets: Vec<Point>,
}

impl Stage {
    /// Sample the image at every pool location. Offsets were learned
    /// against the initial shape, so they are rotated and scaled by the
    /// similarity between the initial and current shapes before being
    /// anchored. Out-of-image samples read as zero.
    fn pixel_values(
        &self,
        image: &GrayImage,
        rect: &BoundingBox,
        current: &[Point],
        a: f32,
        b: f32,
    ) -> Vec<f32> {
        self.anchors
            .iter()
            .zip(&self.offsets)
            .map(|(&anchor, offset)| {
                let rotated = Point::new(a * offset.x - b * offset.y, b * offset.x + a * offset.y);
                let p = rect.denormalize_point(current[anchor as usize] + rotated);
                image.get_pixel(p.x.round() as i32, p.y.round() as i32) as f32
            })
            .collect()
    }
}

/// Coefficients (a, b) of the least-squares similarity matrix
/// `[[a, -b], [b, a]]` mapping `from` onto `to`. Translation drops out
/// because pool offsets are anchored to current shape points.
fn similarity_coefficients(from: &[Point], to: &[Point]) -> (f32, f32) {
    let n = from.len() as f32;
    let mut mean_from = Point::zero();
    let mut mean_to = Point::zero();
    for (f, t) in from.iter().zip(to) {
        mean_from += *f;
        mean_to += *t;
    }
    mean_from = mean_from * (1.0 / n);
    mean_to = mean_to * (1.0 / n);

    let mut dot = 0f32;
    let mut cross = 0f32;
    let mut norm = 0f32;
    for (f, t) in from.iter().zip(to) {
        let fc = *f - mean_from;
        let tc = *t - mean_to;
        dot += fc.x * tc.x + fc.y * tc.y;
        cross += fc.x * tc.y - fc.y * tc.x;
        norm += fc.x * fc.x + fc.y * fc.y;
    }

    if norm == 0.0 {
        return (1.0, 0.0);
    }
    (dot / norm, cross / norm)
}

/// A landmark placement model: a mean shape refined by a cascade of
/// regression-tree stages.
///
/// Shapes live in coordinates normalized to the face box; [`predict`]
/// maps the final shape back into image space.
///
/// [`predict`]: ShapeModel::predict
pub struct ShapeModel {
    initial: Vec<Point>,
    stages: Vec<Stage>,
}

impl ShapeModel {
    /// Load a model file, decompressing `.bz2` on the fly.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingAsset {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        if path.extension().is_some_and(|ext| ext == "bz2") {
            Self::read(BzDecoder::new(reader))
        } else {
            Self::read(reader)
        }
    }

    /// Parse a model from a byte stream, in serialization order:
    /// version, initial shape, forests, pool anchors, pool offsets.
    pub fn read<R: Read>(inner: R) -> Result<Self> {
        let mut r = DatReader::new(inner);

        let version = r.int()?;
        if version != 1 {
            return Err(Error::InvalidModel(format!(
                "unsupported shape model version: {}",
                version
            )));
        }

        let initial = r.point_matrix()?;
        let parts = initial.len();

        let num_stages = r.ulong()? as usize;
        let mut forests = Vec::with_capacity(num_stages);
        for _ in 0..num_stages {
            let num_trees = r.ulong()? as usize;
            let mut trees = Vec::with_capacity(num_trees);
            for _ in 0..num_trees {
                trees.push(read_tree(&mut r, parts)?);
            }
            forests.push(trees);
        }

        let anchor_stages = r.ulong()? as usize;
        let mut anchors_by_stage = Vec::with_capacity(anchor_stages);
        for _ in 0..anchor_stages {
            let count = r.ulong()? as usize;
            let mut anchors = Vec::with_capacity(count);
            for _ in 0..count {
                let idx = r.ulong()?;
                if idx as usize >= parts {
                    return Err(Error::InvalidModel(format!(
                        "pool anchor {} out of range for {} parts",
                        idx, parts
                    )));
                }
                anchors.push(idx as u32);
            }
            anchors_by_stage.push(anchors);
        }

        let offset_stages = r.ulong()? as usize;
        let mut offsets_by_stage = Vec::with_capacity(offset_stages);
        for _ in 0..offset_stages {
            let count = r.ulong()? as usize;
            let mut offsets = Vec::with_capacity(count);
            for _ in 0..count {
                let x = r.float()?;
                let y = r.float()?;
                offsets.push(Point::new(x, y));
            }
            offsets_by_stage.push(offsets);
        }

        if anchors_by_stage.len() != forests.len() || offsets_by_stage.len() != forests.len() {
            return Err(Error::InvalidModel(format!(
                "stage count mismatch: {} forests, {} anchor pools, {} offset pools",
                forests.len(),
                anchors_by_stage.len(),
                offsets_by_stage.len()
            )));
        }

        let mut stages = Vec::with_capacity(forests.len());
        for ((trees, anchors), offsets) in forests
            .into_iter()
            .zip(anchors_by_stage)
            .zip(offsets_by_stage)
        {
            if anchors.len() != offsets.len() {
                return Err(Error::InvalidModel(format!(
                    "pool size mismatch: {} anchors, {} offsets",
                    anchors.len(),
                    offsets.len()
                )));
            }
            let pool = anchors.len();
            for tree in &trees {
                for split in &tree.splits {
                    if split.idx1 as usize >= pool || split.idx2 as usize >= pool {
                        return Err(Error::InvalidModel(format!(
                            "split references pool location {} of {}",
                            split.idx1.max(split.idx2),
                            pool
                        )));
                    }
                }
            }
            stages.push(Stage {
                trees,
                anchors,
                offsets,
            });
        }

        Ok(Self { initial, stages })
    }

    /// Number of landmark points this model places.
    pub fn num_parts(&self) -> usize {
        self.initial.len()
    }

    /// Number of cascade stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Place landmarks for a face at `rect`, returning image-space
    /// points in scheme order.
    pub fn predict(&self, image: &GrayImage, rect: &BoundingBox) -> Vec<Point> {
        let mut current = self.initial.clone();

        for stage in &self.stages {
            let (a, b) = similarity_coefficients(&self.initial, &current);
            let values = stage.pixel_values(image, rect, &current, a, b);
            for tree in &stage.trees {
                for (p, d) in current.iter_mut().zip(tree.leaf(&values)) {
                    *p += *d;
                }
            }
        }

        current
            .iter()
            .map(|p| rect.denormalize_point(*p))
            .collect()
    }
}

fn read_tree<R: Read>(r: &mut DatReader<R>, parts: usize) -> Result<Tree> {
    let num_splits = r.ulong()? as usize;
    let mut splits = Vec::with_capacity(num_splits);
    for _ in 0..num_splits {
        let idx1 = r.ulong()? as u32;
        let idx2 = r.ulong()? as u32;
        let threshold = r.float()?;
        splits.push(Split {
            idx1,
            idx2,
            threshold,
        });
    }

    // A complete binary tree has one more leaf than splits.
    let num_leaves = r.ulong()? as usize;
    if num_leaves != num_splits + 1 {
        return Err(Error::InvalidModel(format!(
            "tree with {} splits needs {} leaves, got {}",
            num_splits,
            num_splits + 1,
            num_leaves
        )));
    }

    let mut leaves = Vec::with_capacity(num_leaves);
    for _ in 0..num_leaves {
        let delta = r.point_matrix()?;
        if delta.len() != parts {
            return Err(Error::InvalidModel(format!(
                "leaf delta covers {} parts, model has {}",
                delta.len(),
                parts
            )));
        }
        leaves.push(delta);
    }

    Ok(Tree { splits, leaves })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn push_int(v: &mut Vec<u8>, val: i64) {
        if val == 0 {
            v.push(0x00);
            return;
        }

        let negative = val < 0;
        let abs = val.unsigned_abs();
        let len = (8 - abs.leading_zeros() as usize / 8).max(1);

        v.push(if negative { 0x80 } else { 0x00 } | len as u8);
        for i in 0..len {
            v.push(((abs >> (8 * i)) & 0xFF) as u8);
        }
    }

    /// Encode `mantissa * 2^exponent` the way the format stores floats.
    fn push_float(v: &mut Vec<u8>, mantissa: i64, exponent: i64) {
        push_int(v, mantissa);
        push_int(v, exponent);
    }

    fn push_point_matrix(v: &mut Vec<u8>, points: &[(i64, i64, i64)]) {
        // Each entry is (x_mantissa, y_mantissa, shared exponent).
        push_int(v, -(points.len() as i64 * 2));
        push_int(v, -1);
        for &(xm, ym, e) in points {
            push_float(v, xm, e);
            push_float(v, ym, e);
        }
    }

    #[test]
    fn varint_decoding() {
        let mut data = Vec::new();
        for val in [0i64, 1, 127, 128, 255, 256, 65535, 65536, -1, -128, -100_000] {
            push_int(&mut data, val);
        }

        let mut r = DatReader::new(Cursor::new(data));
        for val in [0i64, 1, 127, 128, 255, 256, 65535, 65536, -1, -128, -100_000] {
            assert_eq!(r.int().unwrap(), val);
        }
    }

    #[test]
    fn float_decoding() {
        let mut data = Vec::new();
        push_float(&mut data, 0, 0); // 0.0
        push_float(&mut data, 1, 0); // 1.0
        push_float(&mut data, -1, 0); // -1.0
        push_float(&mut data, 1, -1); // 0.5
        push_float(&mut data, 3, -2); // 0.75
        push_float(&mut data, -5, -3); // -0.625

        let mut r = DatReader::new(Cursor::new(data));
        for expected in [0.0f32, 1.0, -1.0, 0.5, 0.75, -0.625] {
            assert!((r.float().unwrap() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn negative_count_is_rejected() {
        let mut data = Vec::new();
        push_int(&mut data, -3);

        let mut r = DatReader::new(Cursor::new(data));
        match r.ulong() {
            Err(Error::InvalidModel(_)) => {}
            other => panic!("expected InvalidModel, got {:?}", other),
        }
    }

    #[test]
    fn oversized_varint_is_rejected() {
        // Control byte claiming a 15-byte payload. Must fail cleanly
        // instead of shifting past the edge of a u64.
        let mut r = DatReader::new(Cursor::new(vec![0x0F]));
        match r.int() {
            Err(Error::InvalidModel(msg)) => assert!(msg.contains("control byte")),
            other => panic!("expected InvalidModel, got {:?}", other),
        }
    }

    #[test]
    fn tree_traversal_reaches_every_leaf() {
        // Three splits in breadth-first order, four leaves. All splits
        // compare pool values 0 and 1 with different thresholds.
        let tree = Tree {
            splits: vec![
                Split {
                    idx1: 0,
                    idx2: 1,
                    threshold: 0.0,
                },
                Split {
                    idx1: 0,
                    idx2: 1,
                    threshold: 10.0,
                },
                Split {
                    idx1: 0,
                    idx2: 1,
                    threshold: -10.0,
                },
            ],
            leaves: vec![
                vec![Point::new(1.0, 0.0)],
                vec![Point::new(2.0, 0.0)],
                vec![Point::new(3.0, 0.0)],
                vec![Point::new(4.0, 0.0)],
            ],
        };

        assert_eq!(tree.leaf(&[20.0, 0.0])[0].x, 1.0);
        assert_eq!(tree.leaf(&[5.0, 0.0])[0].x, 2.0);
        assert_eq!(tree.leaf(&[-5.0, 0.0])[0].x, 3.0);
        assert_eq!(tree.leaf(&[-20.0, 0.0])[0].x, 4.0);
    }

    #[test]
    fn similarity_recovers_rotation_and_scale() {
        let from = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let (a, b) = (1.2f32, 0.5f32);
        let to: Vec<Point> = from
            .iter()
            .map(|p| Point::new(a * p.x - b * p.y + 3.0, b * p.x + a * p.y - 4.0))
            .collect();

        let (ra, rb) = similarity_coefficients(&from, &to);
        assert!((ra - a).abs() < 1e-5, "a = {}", ra);
        assert!((rb - b).abs() < 1e-5, "b = {}", rb);
    }

    #[test]
    fn identical_shapes_give_identity_transform() {
        let pts = [
            Point::new(0.2, 0.3),
            Point::new(0.8, 0.3),
            Point::new(0.5, 0.9),
        ];
        let (a, b) = similarity_coefficients(&pts, &pts);
        assert!((a - 1.0).abs() < 1e-6);
        assert!(b.abs() < 1e-6);
    }

    /// Serialize a two-part model with one stage and one single-split
    /// tree, then verify parsing and inference against hand-computed
    /// positions.
    fn tiny_model_bytes() -> Vec<u8> {
        let mut v = Vec::new();

        push_int(&mut v, 1); // version

        // Initial shape: (0.25, 0.25) and (0.75, 0.75).
        push_point_matrix(&mut v, &[(1, 1, -2), (3, 3, -2)]);

        // Forests: one stage, one tree.
        push_int(&mut v, 1);
        push_int(&mut v, 1);

        // Tree: one split comparing pool values 0 and 1 against 0.5.
        push_int(&mut v, 1);
        push_int(&mut v, 0);
        push_int(&mut v, 1);
        push_float(&mut v, 1, -1);

        // Two leaves. Left is reached only when the pixel difference
        // exceeds the threshold; on a flat image the right leaf wins.
        push_int(&mut v, 2);
        push_point_matrix(&mut v, &[(1, 1, 0), (1, 1, 0)]); // left, sentinel
        push_point_matrix(&mut v, &[(1, 0, -3), (0, 1, -3)]); // right

        // Pool anchors: one stage, two locations on parts 0 and 1.
        push_int(&mut v, 1);
        push_int(&mut v, 2);
        push_int(&mut v, 0);
        push_int(&mut v, 1);

        // Pool offsets: an (x, y) pair per location. Location 0 sits on
        // its anchor; location 1 is nudged by (0.5, 0.25), which still
        // samples inside the test image.
        push_int(&mut v, 1);
        push_int(&mut v, 2);
        push_float(&mut v, 0, 0);
        push_float(&mut v, 0, 0);
        push_float(&mut v, 1, -1);
        push_float(&mut v, 1, -2);

        v
    }

    #[test]
    fn parse_and_run_tiny_model() {
        let model = ShapeModel::read(Cursor::new(tiny_model_bytes())).unwrap();
        assert_eq!(model.num_parts(), 2);
        assert_eq!(model.num_stages(), 1);

        // Flat image: every pixel difference is zero, so the split takes
        // the right branch and applies (0.125, 0) to part 0 and
        // (0, 0.125) to part 1.
        let image = GrayImage::from_fn(400, 400, |_, _| 128);
        let rect = BoundingBox::new(10.0, 20.0, 100.0, 200.0);
        let points = model.predict(&image, &rect);

        assert_eq!(points.len(), 2);
        assert!((points[0].x - (10.0 + 0.375 * 100.0)).abs() < 1e-4);
        assert!((points[0].y - (20.0 + 0.25 * 200.0)).abs() < 1e-4);
        assert!((points[1].x - (10.0 + 0.75 * 100.0)).abs() < 1e-4);
        assert!((points[1].y - (20.0 + 0.875 * 200.0)).abs() < 1e-4);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut v = Vec::new();
        push_int(&mut v, 2);

        match ShapeModel::read(Cursor::new(v)) {
            Err(Error::InvalidModel(msg)) => assert!(msg.contains("version")),
            other => panic!("expected InvalidModel, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        let mut v = tiny_model_bytes();
        v.truncate(v.len() - 4);

        match ShapeModel::read(Cursor::new(v)) {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn leaf_count_mismatch_is_rejected() {
        let mut v = Vec::new();
        push_int(&mut v, 1);
        push_point_matrix(&mut v, &[(1, 1, -2), (3, 3, -2)]);
        push_int(&mut v, 1); // one stage
        push_int(&mut v, 1); // one tree
        push_int(&mut v, 1); // one split
        push_int(&mut v, 0);
        push_int(&mut v, 1);
        push_float(&mut v, 1, -1);
        push_int(&mut v, 3); // three leaves for one split

        match ShapeModel::read(Cursor::new(v)) {
            Err(Error::InvalidModel(msg)) => assert!(msg.contains("leaves")),
            other => panic!("expected InvalidModel, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_model_file_is_reported() {
        let path = std::env::temp_dir().join("face_mood_no_such_shape.dat");
        match ShapeModel::open(&path) {
            Err(Error::MissingAsset { path: p }) => assert_eq!(p, path),
            other => panic!("expected MissingAsset, got {:?}", other.map(|_| ())),
        }
    }
}
