use thiserror::Error;

/// A decoded RGB8 image. Width and height are always non-zero.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pixels: image::RgbImage,
}

impl ImageBuffer {
    /// Wrap an RGB image. Returns `None` for zero-sized buffers.
    pub fn new(pixels: image::RgbImage) -> Option<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return None;
        }
        Some(Self { pixels })
    }

    /// A uniform black image, used for model warm-up.
    pub fn blank(width: u32, height: u32) -> Option<Self> {
        Self::new(image::RgbImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgb(&self) -> &image::RgbImage {
        &self.pixels
    }

    /// Interleaved `[R, G, B, R, G, B, ...]` pixel data, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector. Length is fixed by the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f64>,
    /// Model that produced this embedding (e.g. "sface"); `None` for
    /// embeddings supplied by a caller.
    model: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Parse a caller-supplied embedding: a JSON array of numbers with
    /// exactly `expected_dim` finite entries.
    pub fn from_json(raw: &str, expected_dim: usize) -> Result<Self, InvalidEmbedding> {
        let values: Vec<f64> = serde_json::from_str(raw.trim())?;
        if values.len() != expected_dim {
            return Err(InvalidEmbedding::WrongLength {
                expected: expected_dim,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(InvalidEmbedding::NonFinite { index });
        }
        Ok(Self::new(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum InvalidEmbedding {
    #[error("stored embedding is not a JSON array of numbers: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored embedding has {actual} values, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("stored embedding value at index {index} is not finite")]
    NonFinite { index: usize },
}
