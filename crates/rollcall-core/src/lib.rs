//! rollcall-core — Face detection, embedding and matching.
//!
//! Uses SCRFD for face detection and a FaceNet-style model for embeddings,
//! both running via ONNX Runtime. Detection and embedding sit behind the
//! [`FaceDetector`] and [`FaceEmbedder`] traits so workflows can be driven
//! by any backend.

pub mod detector;
pub mod extraction;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use extraction::{extract_faces, extract_largest_face, FaceRegion};
pub use matcher::{BestMatch, FirstAboveThreshold, MatchStrategy, Matcher};
pub use recognizer::{FaceEmbedder, FacenetEmbedder, RecognizerError};
pub use types::{BoundingBox, Embedding, EmbeddingError, EnrolledPerson, MatchResult};
