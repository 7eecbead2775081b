//! The face-embedding capability and its ONNX implementation.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::{DetectorError, DetectorKind, FaceDetector, SCRFD_MODEL_FILE};
use crate::recognizer::{FaceRecognizer, ModelKind, RecognizerError};
use crate::similarity::{self, DistanceMetric, SimilarityError, VerificationResult};
use crate::types::{BoundingBox, Embedding, ImageBuffer};
use image::imageops::{self, FilterType};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("model produced an invalid embedding: {0}")]
    InvalidOutput(String),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

/// Anything that can turn a face image into an embedding.
///
/// Implementations are owned by a single inference thread, so `&mut self`
/// is available for backends whose sessions are not reentrant.
pub trait FaceEmbedder: Send {
    /// Identifier of the recognition model (e.g. "sface").
    fn model_name(&self) -> &str;

    /// Length of every embedding this backend produces.
    fn dimension(&self) -> usize;

    /// Embed the primary face in `image`.
    ///
    /// With `enforce_detection`, an image without a detectable face fails
    /// with [`EmbedError::NoFaceDetected`]; otherwise the whole image is
    /// embedded.
    fn embed(&mut self, image: &ImageBuffer, enforce_detection: bool) -> Result<Embedding, EmbedError>;

    /// Embed `image` and compare it against `reference`.
    fn compare(
        &mut self,
        image: &ImageBuffer,
        reference: &Embedding,
        metric: DistanceMetric,
        threshold: f64,
    ) -> Result<VerificationResult, EmbedError> {
        let probe = self.embed(image, true)?;
        Ok(similarity::verify(&probe, reference, metric, threshold)?)
    }
}

/// Where and how to load the ONNX models.
#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    pub model_dir: PathBuf,
    pub model: ModelKind,
    pub detector: DetectorKind,
    pub intra_threads: usize,
}

impl EmbedderOptions {
    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(self.model.file_name())
    }
}

/// SCRFD detection + alignment + ONNX recognizer.
pub struct OnnxEmbedder {
    detector: Option<FaceDetector>,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load every model named by `options`. Fails fast if any is missing.
    pub fn load(options: &EmbedderOptions) -> Result<Self, EmbedError> {
        let detector = match options.detector {
            DetectorKind::Scrfd => Some(FaceDetector::load(&options.detector_path(), options.intra_threads)?),
            DetectorKind::Skip => {
                tracing::info!("face detection disabled; whole images are embedded");
                None
            }
        };
        let recognizer = FaceRecognizer::load(&options.recognizer_path(), options.model, options.intra_threads)?;
        Ok(Self { detector, recognizer })
    }

    /// Produce the 112×112 crop the recognizer consumes.
    fn face_crop(&mut self, image: &ImageBuffer, enforce_detection: bool) -> Result<image::RgbImage, EmbedError> {
        let Some(detector) = self.detector.as_mut() else {
            return Ok(resize_to_input(image.as_rgb()));
        };

        let faces = detector.detect(image)?;
        let Some(face) = faces.first() else {
            if enforce_detection {
                return Err(EmbedError::NoFaceDetected);
            }
            tracing::debug!("no face found; embedding the whole image");
            return Ok(resize_to_input(image.as_rgb()));
        };

        tracing::debug!(
            confidence = face.confidence,
            faces = faces.len(),
            x = face.x,
            y = face.y,
            "primary face selected"
        );

        let aligned = face
            .landmarks
            .as_ref()
            .and_then(|landmarks| alignment::align_face(image.as_rgb(), landmarks));
        Ok(match aligned {
            Some(crop) => crop,
            None => crop_box(image.as_rgb(), face),
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        self.recognizer.kind().as_str()
    }

    fn dimension(&self) -> usize {
        self.recognizer.kind().dimension()
    }

    fn embed(&mut self, image: &ImageBuffer, enforce_detection: bool) -> Result<Embedding, EmbedError> {
        let crop = self.face_crop(image, enforce_detection)?;
        let raw = self.recognizer.extract(&crop)?;
        if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
            return Err(EmbedError::InvalidOutput(format!("non-finite value at index {index}")));
        }
        let values = raw.into_iter().map(f64::from).collect();
        Ok(Embedding::new(values).with_model(self.model_name()))
    }
}

fn resize_to_input(image: &image::RgbImage) -> image::RgbImage {
    imageops::resize(image, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

/// Unaligned fallback: crop the bounding box (clamped to the image) and resize.
fn crop_box(image: &image::RgbImage, face: &BoundingBox) -> image::RgbImage {
    let (w, h) = image.dimensions();
    let x = (face.x.max(0.0) as u32).min(w - 1);
    let y = (face.y.max(0.0) as u32).min(h - 1);
    let cw = (face.width.max(1.0) as u32).clamp(1, w - x);
    let ch = (face.height.max(1.0) as u32).clamp(1, h - y);
    let cropped = imageops::crop_imm(image, x, y, cw, ch).to_image();
    resize_to_input(&cropped)
}
