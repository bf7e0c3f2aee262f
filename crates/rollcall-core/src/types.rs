use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in source image pixels.
///
/// Detector output is not clamped: `x`/`y` may be negative and the box may
/// extend past the image edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Box area (width × height), used to pick the most prominent face.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingError {
    #[error("cannot average an empty set of embeddings")]
    Empty,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding blob length {0} is not a multiple of 4 bytes")]
    InvalidBlob(usize),
}

/// Face embedding vector produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity between two embeddings, in [-1, 1].
    ///
    /// Returns `None` when the comparison is meaningless: the vectors differ
    /// in length, are empty, or either has zero norm. Callers treat `None`
    /// as a non-match.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            Some(dot / denom)
        } else {
            None
        }
    }

    /// Element-wise mean of a set of embeddings (the "super embedding").
    pub fn mean(embeddings: &[Embedding]) -> Result<Embedding, EmbeddingError> {
        let first = embeddings.first().ok_or(EmbeddingError::Empty)?;
        let dim = first.dim();
        let mut sum = vec![0.0f64; dim];

        for emb in embeddings {
            if emb.dim() != dim {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dim,
                    actual: emb.dim(),
                });
            }
            for (acc, v) in sum.iter_mut().zip(emb.values.iter()) {
                *acc += *v as f64;
            }
        }

        let n = embeddings.len() as f64;
        Ok(Embedding {
            values: sum.into_iter().map(|s| (s / n) as f32).collect(),
        })
    }

    /// Raw little-endian f32 bytes, as stored in the record store.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode little-endian f32 bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Embedding, EmbeddingError> {
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::InvalidBlob(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Embedding { values })
    }
}

/// An enrolled student: identifier, display name and reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledPerson {
    /// Opaque unique key (the student's PRN).
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Similarity of the accepted entry, or of the closest entry when
    /// nothing was accepted (0.0 for an empty or incomparable gallery).
    pub similarity: f32,
    pub person_id: Option<String>,
    pub person_name: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            person_id: None,
            person_name: None,
        }
    }

    pub fn accepted(person: &EnrolledPerson, similarity: f32) -> Self {
        Self {
            matched: true,
            similarity,
            person_id: Some(person.id.clone()),
            person_name: Some(person.name.clone()),
        }
    }
}
