//! SCRFD face detector via ONNX Runtime.
//!
//! 3-stride anchor-free decoding with NMS post-processing, run on a
//! letterboxed 640×640 RGB input.

use crate::types::{BoundingBox, ImageBuffer};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which face detector runs ahead of the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorKind {
    #[serde(rename = "scrfd")]
    Scrfd,
    /// No detection: the whole image is treated as the face.
    #[serde(rename = "skip")]
    Skip,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::Scrfd => "scrfd",
            DetectorKind::Skip => "skip",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrfd" => Ok(DetectorKind::Scrfd),
            "skip" => Ok(DetectorKind::Skip),
            other => Err(format!("unknown detector {other:?} (expected scrfd or skip)")),
        }
    }
}

/// Scale and padding applied when fitting the source image into the
/// square model input; used to map detections back. Padding is whole
/// pixels so tensor placement and unmapping agree.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        let letterbox = Self {
            scale,
            pad_x: ((target - new_w) / 2) as f32,
            pad_y: ((target - new_h) / 2) as f32,
        };
        (letterbox, new_w, new_h)
    }

    /// Letterboxed model coordinates → original image coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw tensors for one stride level.
struct StrideTensors<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let outputs = named_outputs(&output_names).unwrap_or_else(|| {
            tracing::info!(
                names = ?output_names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            positional_outputs()
        });
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self { session, outputs })
    }

    /// Detect faces, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, image: &ImageBuffer) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let slots = self.outputs[level];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let tensors = StrideTensors {
                stride,
                scores: extract(slots.score, "scores")?,
                bboxes: extract(slots.bbox, "bboxes")?,
                kps: extract(slots.kps, "kps")?,
            };
            candidates.extend(decode_stride(&tensors, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a normalised NCHW tensor.
fn preprocess(image: &ImageBuffer) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image.as_rgb(), new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding is zero after normalisation, so start from zeros.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = letterbox.pad_x as usize;
    let y0 = letterbox.pad_y as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map `score_8`, `bbox_16`, `kps_32`, ... style output names to stride slots.
fn named_outputs(names: &[String]) -> Option<[StrideOutputs; 3]> {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut slots = positional_outputs();
    for (slot, &stride) in slots.iter_mut().zip(SCRFD_STRIDES.iter()) {
        *slot = StrideOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        };
    }
    Some(slots)
}

/// Standard export ordering: [0-2] scores, [3-5] bboxes, [6-8] kps.
fn positional_outputs() -> [StrideOutputs; 3] {
    std::array::from_fn(|i| StrideOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

fn decode_stride(tensors: &StrideTensors<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let stride = tensors.stride;
    let size = SCRFD_INPUT_SIZE as usize;
    let grid_w = size / stride;
    let num_anchors = (size / stride) * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = tensors.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * s;
        let anchor_y = (cell / grid_w) as f32 * s;

        let Some(off) = tensors.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - off[0] * s, anchor_y - off[1] * s);
        let (x2, y2) = letterbox.unmap(anchor_x + off[2] * s, anchor_y + off[3] * s);

        let landmarks = tensors.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| letterbox.unmap(anchor_x + kps[i * 2] * s, anchor_y + kps[i * 2 + 1] * s))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
