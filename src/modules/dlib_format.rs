//! Loader for dlib's `shape_predictor` binary serialization.
//!
//! Stream layout: a version tag, the initial shape as a column matrix, the
//! per-cascade tree forests, then the anchor-index and probe-offset tables
//! that split features refer into. Integers use dlib's control-byte varint
//! coding (high bit = sign, low nibble = payload byte count, little-endian
//! payload); floats are stored as (mantissa, exponent) varint pairs.
//!
//! Both plain `.dat` files and bzip2-compressed `.dat.bz2` files load
//! transparently.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::modules::shape_predictor::{
    RegressionTree, ShapePredictor, SplitFeature, TreeEnsemble, TreeNode,
};
use crate::utils::coordinate::{Coordinate2D, LandmarkSet};
use crate::utils::error::{PipelineError, Result};

struct FormatReader<R: Read> {
    inner: R,
}

impl<R: Read> FormatReader<R> {
    fn new(inner: R) -> Self {
        FormatReader { inner }
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn int(&mut self) -> Result<i64> {
        let control = self.byte()?;
        let negative = (control & 0x80) != 0;
        let num_bytes = (control & 0x0F) as usize;

        if num_bytes == 0 {
            return Ok(0);
        }

        let mut value: u64 = 0;
        for i in 0..num_bytes {
            value |= (self.byte()? as u64) << (8 * i);
        }

        let signed = value as i64;
        Ok(if negative { -signed } else { signed })
    }

    fn ulong(&mut self) -> Result<u64> {
        let value = self.int()?;
        if value < 0 {
            return Err(PipelineError::InvalidModel(format!(
                "expected unsigned value, got {}",
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

        Ok(((mantissa as f64) * (2.0_f64).powi(exponent)) as f32)
    }

    /// Matrices are stored as (-rows, -cols, row-major data).
    fn column_matrix(&mut self) -> Result<(usize, usize, Vec<f32>)> {
        let rows = (-self.int()?) as usize;
        let cols = (-self.int()?) as usize;

        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..(rows * cols) {
            data.push(self.float()?);
        }

        Ok((rows, cols, data))
    }
}

/// Split before its probe indices are resolved against the anchor tables.
struct RawSplit {
    probe1: u16,
    probe2: u16,
    threshold: f32,
}

struct RawTree {
    splits: Vec<RawSplit>,
    leaves: Vec<LandmarkSet>,
}

/// load_landmark_model reads a shape predictor from a `.dat` or `.dat.bz2`
/// file.
///
/// # Arguments
/// * `path` - model file path
///
/// # Returns
/// * `Result<ShapePredictor, PipelineError>`
pub fn load_landmark_model<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    if path.extension().is_some_and(|ext| ext == "bz2") {
        parse(&mut FormatReader::new(BzDecoder::new(reader)))
    } else {
        parse(&mut FormatReader::new(reader))
    }
}

/// load_landmark_model_from_reader reads an uncompressed model stream.
pub fn load_landmark_model_from_reader<R: Read>(reader: R) -> Result<ShapePredictor> {
    parse(&mut FormatReader::new(reader))
}

fn parse<R: Read>(r: &mut FormatReader<R>) -> Result<ShapePredictor> {
    let version = r.int()?;
    if version != 1 {
        return Err(PipelineError::InvalidModel(format!(
            "unsupported shape_predictor version: {}",
            version
        )));
    }

    let (rows, cols, data) = r.column_matrix()?;
    if cols != 1 || rows % 2 != 0 || rows == 0 {
        return Err(PipelineError::InvalidModel(format!(
            "invalid initial shape dimensions: {}x{}",
            rows, cols
        )));
    }
    let num_landmarks = rows / 2;
    let initial_shape = LandmarkSet::from_flat_vec(&data);

    let num_cascades = r.ulong()? as usize;
    let mut raw_cascades: Vec<Vec<RawTree>> = Vec::with_capacity(num_cascades);
    for _ in 0..num_cascades {
        let num_trees = r.ulong()? as usize;
        let mut trees = Vec::with_capacity(num_trees);
        for _ in 0..num_trees {
            trees.push(parse_raw_tree(r, num_landmarks)?);
        }
        raw_cascades.push(trees);
    }

    // anchor table: anchors[cascade][probe] = landmark index
    let num_anchor_cascades = r.ulong()? as usize;
    let mut anchors: Vec<Vec<u16>> = Vec::with_capacity(num_anchor_cascades);
    for _ in 0..num_anchor_cascades {
        let count = r.ulong()? as usize;
        let mut cascade_anchors = Vec::with_capacity(count);
        for _ in 0..count {
            cascade_anchors.push(r.ulong()? as u16);
        }
        anchors.push(cascade_anchors);
    }

    // offset table: offsets[cascade][probe] = (dx, dy) from the anchor
    let num_offset_cascades = r.ulong()? as usize;
    let mut offsets: Vec<Vec<Coordinate2D>> = Vec::with_capacity(num_offset_cascades);
    for _ in 0..num_offset_cascades {
        let count = r.ulong()? as usize;
        let mut cascade_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let dx = r.float()?;
            let dy = r.float()?;
            cascade_offsets.push(Coordinate2D::new(dx, dy));
        }
        offsets.push(cascade_offsets);
    }

    let mut cascade = Vec::with_capacity(num_cascades);
    for (stage, raw_trees) in raw_cascades.into_iter().enumerate() {
        let stage_anchors = anchors.get(stage).ok_or_else(|| {
            PipelineError::InvalidModel(format!("missing anchor table for cascade stage {}", stage))
        })?;
        let stage_offsets = offsets.get(stage).ok_or_else(|| {
            PipelineError::InvalidModel(format!("missing offset table for cascade stage {}", stage))
        })?;

        let mut trees = Vec::with_capacity(raw_trees.len());
        for raw in raw_trees {
            trees.push(resolve_tree(raw, stage_anchors, stage_offsets)?);
        }
        cascade.push(TreeEnsemble::new(trees, num_landmarks));
    }

    Ok(ShapePredictor::new(initial_shape, cascade))
}

fn parse_raw_tree<R: Read>(r: &mut FormatReader<R>, num_landmarks: usize) -> Result<RawTree> {
    let num_splits = r.ulong()? as usize;
    let mut splits = Vec::with_capacity(num_splits);
    for _ in 0..num_splits {
        let probe1 = r.ulong()? as u16;
        let probe2 = r.ulong()? as u16;
        let threshold = r.float()?;
        splits.push(RawSplit {
            probe1,
            probe2,
            threshold,
        });
    }

    let num_leaves = r.ulong()? as usize;
    if num_leaves != num_splits + 1 {
        return Err(PipelineError::InvalidModel(format!(
            "tree with {} splits should have {} leaves, got {}",
            num_splits,
            num_splits + 1,
            num_leaves
        )));
    }

    let mut leaves = Vec::with_capacity(num_leaves);
    for _ in 0..num_leaves {
        let (rows, cols, data) = r.column_matrix()?;
        if cols != 1 || rows != num_landmarks * 2 {
            return Err(PipelineError::InvalidModel(format!(
                "invalid leaf delta dimensions: {}x{}, expected {}x1",
                rows,
                cols,
                num_landmarks * 2
            )));
        }
        leaves.push(LandmarkSet::from_flat_vec(&data));
    }

    Ok(RawTree { splits, leaves })
}

/// Splits are serialized in breadth-first order as a complete binary tree:
/// split `i` has children `2i+1` and `2i+2`, leaves follow the splits.
fn resolve_tree(raw: RawTree, anchors: &[u16], offsets: &[Coordinate2D]) -> Result<RegressionTree> {
    let num_splits = raw.splits.len();
    let mut nodes = Vec::with_capacity(num_splits + raw.leaves.len());

    for (i, split) in raw.splits.into_iter().enumerate() {
        let lookup = |probe: u16| -> Result<(u16, Coordinate2D)> {
            let probe = probe as usize;
            let anchor = *anchors.get(probe).ok_or_else(|| {
                PipelineError::InvalidModel(format!("probe index {} outside anchor table", probe))
            })?;
            let offset = *offsets.get(probe).ok_or_else(|| {
                PipelineError::InvalidModel(format!("probe index {} outside offset table", probe))
            })?;
            Ok((anchor, offset))
        };

        let (anchor1, offset1) = lookup(split.probe1)?;
        let (anchor2, offset2) = lookup(split.probe2)?;

        nodes.push(TreeNode::Split {
            feature: SplitFeature {
                anchor1,
                offset1,
                anchor2,
                offset2,
            },
            threshold: split.threshold,
            left: (2 * i + 1) as u32,
            right: (2 * i + 2) as u32,
        });
    }

    for delta in raw.leaves {
        nodes.push(TreeNode::Leaf { delta });
    }

    Ok(RegressionTree::new(nodes))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn write_int(out: &mut Vec<u8>, value: i64) {
        if value == 0 {
            out.push(0x00);
            return;
        }

        let negative = value < 0;
        let magnitude = value.unsigned_abs();
        let num_bytes: u8 = if magnitude <= 0xFF {
            1
        } else if magnitude <= 0xFFFF {
            2
        } else if magnitude <= 0xFF_FFFF {
            3
        } else if magnitude <= 0xFFFF_FFFF {
            4
        } else {
            8
        };

        out.push(if negative { 0x80 } else { 0x00 } | num_bytes);
        for i in 0..num_bytes {
            out.push(((magnitude >> (8 * i)) & 0xFF) as u8);
        }
    }

    fn write_float(out: &mut Vec<u8>, value: f32) {
        if value == 0.0 {
            write_int(out, 0);
            write_int(out, 0);
            return;
        }

        let value = value as f64;
        let exponent = value.abs().log2().floor() as i32 + 1;
        let mantissa = value / (2.0_f64).powi(exponent);
        let int_mantissa = (mantissa * (1i64 << 53) as f64) as i64;

        write_int(out, int_mantissa);
        write_int(out, (exponent - 53) as i64);
    }

    fn write_column_matrix(out: &mut Vec<u8>, values: &[f32]) {
        write_int(out, -(values.len() as i64));
        write_int(out, -1);
        for &v in values {
            write_float(out, v);
        }
    }

    #[test]
    fn varint_round_trip() {
        let mut data = Vec::new();
        for value in [0i64, 1, 127, 128, 255, 256, 65_536, -1, -128, -70_000] {
            write_int(&mut data, value);
        }

        let mut reader = FormatReader::new(Cursor::new(data));
        for expected in [0i64, 1, 127, 128, 255, 256, 65_536, -1, -128, -70_000] {
            assert_eq!(reader.int().expect("read int"), expected);
        }
    }

    #[test]
    fn float_round_trip() {
        let mut data = Vec::new();
        for value in [0.0f32, 1.0, -1.0, 0.5, 0.25, 3.75, -12.625] {
            write_float(&mut data, value);
        }

        let mut reader = FormatReader::new(Cursor::new(data));
        for expected in [0.0f32, 1.0, -1.0, 0.5, 0.25, 3.75, -12.625] {
            assert!((reader.float().expect("read float") - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn ulong_rejects_negative() {
        let mut data = Vec::new();
        write_int(&mut data, -5);

        let mut reader = FormatReader::new(Cursor::new(data));
        assert!(matches!(
            reader.ulong(),
            Err(PipelineError::InvalidModel(_))
        ));
    }

    /// A minimal two-landmark model: one cascade stage, one tree with a
    /// single split and two leaves.
    fn synthetic_model_bytes() -> Vec<u8> {
        let mut out = Vec::new();

        write_int(&mut out, 1); // version

        // initial shape: two normalized points
        write_column_matrix(&mut out, &[0.25, 0.5, 0.75, 0.5]);

        write_int(&mut out, 1); // cascades
        write_int(&mut out, 1); // trees in cascade 0

        // one split referencing probes 0 and 1
        write_int(&mut out, 1);
        write_int(&mut out, 0);
        write_int(&mut out, 1);
        write_float(&mut out, 10.0);

        // two leaves
        write_int(&mut out, 2);
        write_column_matrix(&mut out, &[0.1, 0.0, -0.1, 0.0]);
        write_column_matrix(&mut out, &[0.0, 0.2, 0.0, -0.2]);

        // anchor table: probe 0 -> landmark 0, probe 1 -> landmark 1
        write_int(&mut out, 1);
        write_int(&mut out, 2);
        write_int(&mut out, 0);
        write_int(&mut out, 1);

        // offset table
        write_int(&mut out, 1);
        write_int(&mut out, 2);
        write_float(&mut out, 0.05);
        write_float(&mut out, -0.05);
        write_float(&mut out, -0.125);
        write_float(&mut out, 0.125);

        out
    }

    #[test]
    fn parses_synthetic_model() {
        let predictor = load_landmark_model_from_reader(Cursor::new(synthetic_model_bytes()))
            .expect("parse model");

        assert_eq!(predictor.num_landmarks(), 2);
        assert_eq!(predictor.num_cascade_stages(), 1);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut out = Vec::new();
        write_int(&mut out, 7);

        assert!(matches!(
            load_landmark_model_from_reader(Cursor::new(out)),
            Err(PipelineError::InvalidModel(_))
        ));
    }

    #[test]
    fn rejects_truncated_stream() {
        let mut bytes = synthetic_model_bytes();
        bytes.truncate(bytes.len() / 2);

        assert!(load_landmark_model_from_reader(Cursor::new(bytes)).is_err());
    }
}
