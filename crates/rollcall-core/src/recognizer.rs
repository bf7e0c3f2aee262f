//! Face embedding generation.
//!
//! [`FacenetEmbedder`] runs a FaceNet-style ONNX model: the face crop is
//! resized to a square, scaled to [0, 1] and fed as a single-image NHWC
//! batch. The raw output row is the embedding; it is not L2-normalised, so
//! enrollment averages the model's own vectors.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Default FaceNet input edge length.
pub const DEFAULT_FACE_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyFace,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns a cropped face into an identity embedding.
pub trait FaceEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError>;
}

/// FaceNet-style embedder backed by an ONNX Runtime session.
pub struct FacenetEmbedder {
    session: Session,
    face_size: u32,
    /// Expected output length; checked when set.
    expected_dim: Option<usize>,
}

impl FacenetEmbedder {
    /// Load the embedding model. `face_size` is the square input edge.
    pub fn load(model_path: &str, face_size: u32) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            face_size,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session,
            face_size,
            expected_dim: None,
        })
    }

    /// Reject outputs whose length differs from `dim`.
    pub fn with_expected_dim(mut self, dim: usize) -> Self {
        self.expected_dim = Some(dim);
        self
    }
}

impl FaceEmbedder for FacenetEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(face, self.face_size)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(RecognizerError::InferenceFailed("model returned an empty embedding".into()));
        }
        if let Some(dim) = self.expected_dim {
            if raw.len() != dim {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected {dim}-dim embedding, got {}",
                    raw.len()
                )));
            }
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

/// Resize a face crop to `size`×`size` and scale it into a `[1, size, size, 3]` tensor in [0, 1].
pub fn preprocess(face: &RgbImage, size: u32) -> Result<Array4<f32>, RecognizerError> {
    if face.width() == 0 || face.height() == 0 {
        return Err(RecognizerError::EmptyFace);
    }

    let resized = imageops::resize(face, size, size, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, size as usize, size as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(tensor)
}
