//! faceverify-core — Face verification building blocks.
//!
//! Image decoding, the distance/threshold engine, and the embedding
//! capability behind the [`FaceEmbedder`] trait. The bundled backend runs
//! SCRFD detection and an SFace or ArcFace recognizer via ONNX Runtime.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod embedder;
pub mod recognizer;
pub mod similarity;
pub mod types;

pub use decode::{DecodeError, ImagePayload};
pub use detector::DetectorKind;
pub use embedder::{EmbedError, EmbedderOptions, FaceEmbedder, OnnxEmbedder};
pub use recognizer::ModelKind;
pub use similarity::{DistanceMetric, SimilarityError, VerificationResult};
pub use types::{BoundingBox, Embedding, ImageBuffer, InvalidEmbedding};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/faceverify/models`, falling
/// back to `~/.local/share/faceverify/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceverify/models")
}
