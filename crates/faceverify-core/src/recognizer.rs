//! Face recognizer via ONNX Runtime.
//!
//! Turns an aligned 112×112 RGB face crop into an embedding vector. Two
//! model families are supported; they share the input geometry but differ
//! in normalisation and output width.

use crate::similarity::DistanceMetric;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const RECOGNIZER_INPUT_SIZE: u32 = 112;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the recognizer ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Recognition model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// OpenCV SFace (face_recognition_sface_2021dec), 128-d.
    #[serde(rename = "sface")]
    SFace,
    /// InsightFace ArcFace (w600k_r50), 512-d.
    #[serde(rename = "arcface")]
    ArcFace,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::SFace => "sface",
            ModelKind::ArcFace => "arcface",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::SFace => "face_recognition_sface_2021dec.onnx",
            ModelKind::ArcFace => "w600k_r50.onnx",
        }
    }

    /// Output embedding length.
    pub fn dimension(self) -> usize {
        match self {
            ModelKind::SFace => 128,
            ModelKind::ArcFace => 512,
        }
    }

    /// Per-pixel `(mean, std)` applied before inference.
    fn normalisation(self) -> (f32, f32) {
        match self {
            // SFace consumes raw 0–255 values.
            ModelKind::SFace => (0.0, 1.0),
            ModelKind::ArcFace => (127.5, 127.5),
        }
    }

    /// Verification threshold tuned for this model under `metric`.
    pub fn default_threshold(self, metric: DistanceMetric) -> f64 {
        match (self, metric) {
            (ModelKind::SFace, DistanceMetric::Cosine) => 0.593,
            (ModelKind::SFace, DistanceMetric::Euclidean) => 10.734,
            (ModelKind::SFace, DistanceMetric::EuclideanL2) => 1.055,
            (ModelKind::ArcFace, DistanceMetric::Cosine) => 0.68,
            (ModelKind::ArcFace, DistanceMetric::Euclidean) => 4.15,
            (ModelKind::ArcFace, DistanceMetric::EuclideanL2) => 1.13,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sface" => Ok(ModelKind::SFace),
            "arcface" => Ok(ModelKind::ArcFace),
            other => Err(format!("unknown model {other:?} (expected sface or arcface)")),
        }
    }
}

/// ONNX face recognizer for one [`ModelKind`].
pub struct FaceRecognizer {
    session: Session,
    kind: ModelKind,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, kind: ModelKind, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %kind,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognizer model"
        );

        Ok(Self { session, kind })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Extract the raw embedding from a 112×112 RGB face crop.
    ///
    /// The output is not L2-normalised; the distance thresholds are tuned
    /// on raw vectors.
    pub fn extract(&mut self, face: &image::RgbImage) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(face, self.kind)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.kind.dimension();
        if raw.len() != expected {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {expected}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(raw.to_vec())
    }
}

/// RGB crop → normalised NCHW tensor.
fn preprocess(face: &image::RgbImage, kind: ModelKind) -> Result<Array4<f32>, RecognizerError> {
    if face.dimensions() != (RECOGNIZER_INPUT_SIZE, RECOGNIZER_INPUT_SIZE) {
        return Err(RecognizerError::InferenceFailed(format!(
            "face crop must be {RECOGNIZER_INPUT_SIZE}x{RECOGNIZER_INPUT_SIZE}, got {}x{}",
            face.width(),
            face.height()
        )));
    }

    let size = RECOGNIZER_INPUT_SIZE as usize;
    let (mean, std) = kind.normalisation();
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - mean) / std;
        }
    }
    Ok(tensor)
}
