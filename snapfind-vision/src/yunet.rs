//! YuNet detector head decoding.
//!
//! The 2023mar export emits twelve tensors, four groups of three strides:
//! `cls_{8,16,32}`, `obj_{8,16,32}`, `bbox_{8,16,32}`, `kps_{8,16,32}`,
//! shaped `[1, N, 1]`, `[1, N, 1]`, `[1, N, 4]` and `[1, N, 10]` where `N` is
//! the number of grid cells at that stride.
//!
//! Decoding is anchor-free. For the cell at row `r`, column `c`:
//!
//! ```text
//! score = sqrt(clamp(cls) * clamp(obj))
//! cx    = (c + bbox[0]) * stride
//! cy    = (r + bbox[1]) * stride
//! w     = exp(bbox[2]) * stride
//! h     = exp(bbox[3]) * stride
//! kp_n  = ((c + kps[2n]) * stride, (r + kps[2n + 1]) * stride)
//! ```

use anyhow::{anyhow, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded detection in detector input pixels.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// The four output groups, one array per stride.
#[derive(Debug)]
pub struct HeadOutputs {
    pub cls: Vec<Array2<f32>>,
    pub obj: Vec<Array2<f32>>,
    pub bbox: Vec<Array2<f32>>,
    pub kps: Vec<Array2<f32>>,
}

fn grid_side(input_size: usize, stride: usize) -> usize {
    input_size / stride
}

fn take_group(
    outputs: &[(&[i64], &[f32])],
    offset: usize,
    width: usize,
    input_size: usize,
    label: &str,
) -> Result<Vec<Array2<f32>>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let idx = offset + i;
            let side = grid_side(input_size, stride);
            let cells = side * side;
            let (shape, data) = outputs
                .get(idx)
                .ok_or_else(|| anyhow!("missing {} output at index {}", label, idx))?;
            if *shape != [1, cells as i64, width as i64] {
                anyhow::bail!(
                    "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                    label,
                    idx,
                    shape,
                    cells,
                    width
                );
            }
            Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
        })
        .collect()
}

impl HeadOutputs {
    pub fn parse(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Self> {
        Ok(Self {
            cls: take_group(outputs, 0, 1, input_size, "cls")?,
            obj: take_group(outputs, 3, 1, input_size, "obj")?,
            bbox: take_group(outputs, 6, 4, input_size, "bbox")?,
            kps: take_group(outputs, 9, 10, input_size, "kps")?,
        })
    }

    /// Decode every grid cell whose score reaches `score_threshold`.
    pub fn decode(&self, score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
        let mut detections = Vec::new();

        for (s, &stride) in STRIDES.iter().enumerate() {
            let side = grid_side(input_size, stride);
            let step = stride as f32;
            let (cls, obj) = (&self.cls[s], &self.obj[s]);
            let (bbox, kps) = (&self.bbox[s], &self.kps[s]);

            for r in 0..side {
                for c in 0..side {
                    let idx = r * side + c;
                    let score = combined_score(cls[[idx, 0]], obj[[idx, 0]]);
                    if score < score_threshold {
                        continue;
                    }

                    let cx = (c as f32 + bbox[[idx, 0]]) * step;
                    let cy = (r as f32 + bbox[[idx, 1]]) * step;
                    let w = bbox[[idx, 2]].exp() * step;
                    let h = bbox[[idx, 3]].exp() * step;

                    let mut landmarks = [0.0f32; 10];
                    for k in 0..5 {
                        landmarks[k * 2] = (c as f32 + kps[[idx, k * 2]]) * step;
                        landmarks[k * 2 + 1] = (r as f32 + kps[[idx, k * 2 + 1]]) * step;
                    }

                    detections.push(RawDetection {
                        bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                        score,
                        landmarks,
                    });
                }
            }
        }

        detections
    }
}

pub fn combined_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}
