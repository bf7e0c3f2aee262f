//! Enrollment and attendance workflows.
//!
//! [`Engine`] owns the loaded models for the lifetime of the process. The
//! record store and attendance logs are opened per call and closed before
//! the call returns.

use crate::config::Config;
use chrono::Local;
use image::RgbImage;
use rollcall_core::{
    extract_faces, extract_largest_face, Embedding, EnrolledPerson, FaceDetector, FaceEmbedder,
    FacenetEmbedder, Matcher, ScrfdDetector,
};
use rollcall_store::{AttendanceEntry, AttendanceLog, RecordStore, SessionTag};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::RecognizerError),
    #[error("embedding error: {0}")]
    Embedding(#[from] rollcall_core::EmbeddingError),
    #[error("record store error: {0}")]
    Store(#[from] rollcall_store::StoreError),
    #[error("attendance log error: {0}")]
    Attendance(#[from] rollcall_store::AttendanceError),
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("student identifier must not be empty")]
    EmptyIdentifier,
}

/// Outcome of an enrollment request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    /// A super embedding was stored for `id`.
    Enrolled {
        id: String,
        images_used: usize,
        images_skipped: usize,
    },
    /// No image in the batch had a detectable face; the store was not touched.
    NoUsableImages { images_skipped: usize },
}

/// Outcome of an attendance request.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// Attendance rows were appended to `log_path`.
    Marked {
        log_path: PathBuf,
        matches: Vec<AttendanceEntry>,
        faces: usize,
    },
    /// Faces were found but none matched an enrolled student.
    NoMatches { faces: usize },
    /// The image contained no detectable face.
    NoFaces,
    /// The classroom image does not exist.
    FileNotFound(PathBuf),
}

/// Model context plus workflow settings.
pub struct Engine {
    config: Config,
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
    matcher: Box<dyn Matcher>,
}

impl Engine {
    /// Load the SCRFD detector and the embedding model named by `config`.
    ///
    /// Fails fast if either model file is missing.
    pub fn load(config: Config) -> Result<Self, EngineError> {
        let detector = ScrfdDetector::load(&config.detector_model_path())?;
        let mut embedder = FacenetEmbedder::load(&config.embedder_model_path(), config.face_size)?;
        if let Some(dim) = config.embedding_dim {
            embedder = embedder.with_expected_dim(dim);
        }
        Ok(Self::with_models(config, Box::new(detector), Box::new(embedder)))
    }

    /// Build an engine around already-constructed models.
    pub fn with_models(
        config: Config,
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
    ) -> Self {
        let matcher = config.match_strategy.matcher();
        tracing::info!(
            strategy = %config.match_strategy,
            threshold = config.similarity_threshold,
            batch_size = config.enroll_batch_size,
            "engine ready"
        );
        Self {
            config,
            detector,
            embedder,
            matcher,
        }
    }

    /// Release the models.
    pub fn shutdown(self) {
        tracing::info!("engine shutting down");
    }

    /// Enroll a student from a batch of reference images.
    ///
    /// Images without a detectable face are skipped. The stored embedding is
    /// the mean of the per-image embeddings and replaces any previous record
    /// for `id`.
    pub fn enroll(
        &mut self,
        id: &str,
        name: &str,
        images: &[RgbImage],
    ) -> Result<EnrollOutcome, EngineError> {
        if id.trim().is_empty() {
            return Err(EngineError::EmptyIdentifier);
        }

        let batch_size = self.config.enroll_batch_size;
        if images.len() > batch_size {
            tracing::warn!(
                provided = images.len(),
                batch_size,
                "more images than the enrollment batch size; extra images ignored"
            );
        }
        let batch = &images[..images.len().min(batch_size)];

        let mut embeddings = Vec::with_capacity(batch.len());
        let mut skipped = 0usize;
        for (i, image) in batch.iter().enumerate() {
            let Some(face) = extract_largest_face(self.detector.as_mut(), image)? else {
                tracing::warn!(id, image = i, "no face detected; skipping image");
                skipped += 1;
                continue;
            };
            embeddings.push(self.embedder.embed(&face.image)?);
        }

        if embeddings.is_empty() {
            tracing::warn!(id, skipped, "no usable images; nothing stored");
            return Ok(EnrollOutcome::NoUsableImages {
                images_skipped: skipped,
            });
        }

        let person = EnrolledPerson {
            id: id.to_string(),
            name: name.to_string(),
            embedding: Embedding::mean(&embeddings)?,
        };
        RecordStore::open(&self.config.db_path)?.upsert(&person)?;

        tracing::info!(id, name, used = embeddings.len(), skipped, "student enrolled");
        Ok(EnrollOutcome::Enrolled {
            id: person.id,
            images_used: embeddings.len(),
            images_skipped: skipped,
        })
    }

    /// Mark attendance for every enrolled student recognised in a classroom photo.
    pub fn mark_attendance(
        &mut self,
        image_path: &Path,
        session: &SessionTag,
    ) -> Result<MarkOutcome, EngineError> {
        if !image_path.exists() {
            tracing::warn!(path = %image_path.display(), "classroom image not found");
            return Ok(MarkOutcome::FileNotFound(image_path.to_path_buf()));
        }

        let image = image::open(image_path)
            .map_err(|source| EngineError::Image {
                path: image_path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        self.mark_image(&image, session)
    }

    /// Mark attendance from an already-decoded classroom image.
    pub fn mark_image(
        &mut self,
        image: &RgbImage,
        session: &SessionTag,
    ) -> Result<MarkOutcome, EngineError> {
        let faces = extract_faces(self.detector.as_mut(), image)?;
        if faces.is_empty() {
            tracing::info!("no faces detected in classroom image");
            return Ok(MarkOutcome::NoFaces);
        }

        let gallery = RecordStore::open(&self.config.db_path)?.all()?;
        tracing::debug!(faces = faces.len(), enrolled = gallery.len(), "matching faces");

        let mut matches = Vec::new();
        for face in &faces {
            let probe = self.embedder.embed(&face.image)?;
            let result = self
                .matcher
                .compare(&probe, &gallery, self.config.similarity_threshold);

            match (result.person_id, result.person_name) {
                (Some(id), Some(name)) if result.matched => {
                    tracing::info!(%id, %name, similarity = result.similarity, "matched");
                    matches.push(AttendanceEntry { id, name });
                }
                _ => {
                    tracing::info!(
                        closest = result.similarity,
                        bbox = ?face.bbox,
                        "no match for detected face"
                    );
                }
            }
        }

        if matches.is_empty() {
            return Ok(MarkOutcome::NoMatches { faces: faces.len() });
        }

        let log = AttendanceLog::new(&self.config.attendance_dir);
        let log_path = log.append(session, &matches, Local::now().naive_local())?;
        Ok(MarkOutcome::Marked {
            log_path,
            matches,
            faces: faces.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{BoundingBox, DetectorError, MatchStrategy, RecognizerError};
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    const CELL: u32 = 10;

    /// Treats every non-black 10×10 cell along the top row as a face.
    struct CellDetector;

    impl FaceDetector for CellDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok((0..image.width() / CELL)
                .filter(|i| image.get_pixel(i * CELL, 0).0 != [0, 0, 0])
                .map(|i| BoundingBox {
                    x: (i * CELL) as f32,
                    y: 0.0,
                    width: CELL as f32,
                    height: CELL as f32,
                    confidence: 0.99,
                })
                .collect())
        }
    }

    /// Embeds a face as the RGB value of its top-left pixel.
    struct ColorEmbedder {
        calls: Rc<Cell<usize>>,
    }

    impl FaceEmbedder for ColorEmbedder {
        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
            self.calls.set(self.calls.get() + 1);
            let [r, g, b] = face.get_pixel(0, 0).0;
            Ok(Embedding::new(vec![r as f32, g as f32, b as f32]))
        }
    }

    struct Fixture {
        dir: TempDir,
        engine: Engine,
        embed_calls: Rc<Cell<usize>>,
    }

    fn fixture(strategy: MatchStrategy) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = Config {
            db_path: dir.path().join("db/attendance.db"),
            attendance_dir: dir.path().join("attendance_records"),
            match_strategy: strategy,
            enroll_batch_size: 30,
            similarity_threshold: 0.8,
            ..Config::default()
        };
        let calls = Rc::new(Cell::new(0));
        let engine = Engine::with_models(
            config,
            Box::new(CellDetector),
            Box::new(ColorEmbedder { calls: calls.clone() }),
        );
        Fixture { dir, engine, embed_calls: calls }
    }

    fn portrait(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(CELL, CELL, image::Rgb(rgb))
    }

    /// A classroom with one face per colour, left to right.
    fn classroom(faces: &[[u8; 3]]) -> RgbImage {
        let mut img = RgbImage::new(CELL * faces.len().max(1) as u32, CELL);
        for (i, rgb) in faces.iter().enumerate() {
            for x in 0..CELL {
                for y in 0..CELL {
                    img.put_pixel(i as u32 * CELL + x, y, image::Rgb(*rgb));
                }
            }
        }
        img
    }

    fn session() -> SessionTag {
        SessionTag::new("Mathematics", "10", "CS", "2024")
    }

    fn store(f: &Fixture) -> RecordStore {
        RecordStore::open(&f.engine.config.db_path).unwrap()
    }

    fn put(f: &Fixture, id: &str, values: Vec<f32>) {
        store(f)
            .upsert(&EnrolledPerson {
                id: id.into(),
                name: format!("Student {id}"),
                embedding: Embedding::new(values),
            })
            .unwrap();
    }

    #[test]
    fn enroll_stores_mean_embedding() {
        let mut f = fixture(MatchStrategy::First);
        let images = vec![portrait([10, 0, 0]), portrait([20, 0, 6]), portrait([30, 10, 0])];

        let outcome = f.engine.enroll("PRN1", "Asha", &images).unwrap();
        assert_eq!(
            outcome,
            EnrollOutcome::Enrolled { id: "PRN1".into(), images_used: 3, images_skipped: 0 }
        );

        let stored = store(&f).get("PRN1").unwrap().unwrap();
        assert_eq!(stored.name, "Asha");
        let expected = [20.0, 10.0 / 3.0, 2.0];
        for (got, want) in stored.embedding.values.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
        }
    }

    #[test]
    fn enroll_skips_images_without_faces() {
        let mut f = fixture(MatchStrategy::First);
        let images = vec![portrait([0, 0, 0]), portrait([40, 0, 0]), portrait([0, 0, 0])];

        let outcome = f.engine.enroll("PRN1", "Asha", &images).unwrap();
        assert_eq!(
            outcome,
            EnrollOutcome::Enrolled { id: "PRN1".into(), images_used: 1, images_skipped: 2 }
        );
        assert_eq!(store(&f).get("PRN1").unwrap().unwrap().embedding.values, vec![40.0, 0.0, 0.0]);
    }

    #[test]
    fn enroll_without_faces_writes_nothing() {
        let mut f = fixture(MatchStrategy::First);
        let images = vec![portrait([0, 0, 0]); 4];

        let outcome = f.engine.enroll("PRN1", "Asha", &images).unwrap();
        assert_eq!(outcome, EnrollOutcome::NoUsableImages { images_skipped: 4 });
        assert!(!f.engine.config.db_path.exists());
        assert_eq!(f.embed_calls.get(), 0);
    }

    #[test]
    fn enroll_keeps_existing_record_when_batch_unusable() {
        let mut f = fixture(MatchStrategy::First);
        f.engine.enroll("PRN1", "Asha", &[portrait([50, 0, 0])]).unwrap();
        f.engine.enroll("PRN1", "Renamed", &[portrait([0, 0, 0])]).unwrap();

        let stored = store(&f).get("PRN1").unwrap().unwrap();
        assert_eq!(stored.name, "Asha");
        assert_eq!(stored.embedding.values, vec![50.0, 0.0, 0.0]);
    }

    #[test]
    fn enroll_twice_overwrites() {
        let mut f = fixture(MatchStrategy::First);
        f.engine.enroll("PRN1", "Asha", &[portrait([50, 0, 0])]).unwrap();
        f.engine.enroll("PRN1", "Asha K", &[portrait([0, 50, 0])]).unwrap();

        let s = store(&f);
        assert_eq!(s.count().unwrap(), 1);
        let stored = s.get("PRN1").unwrap().unwrap();
        assert_eq!(stored.name, "Asha K");
        assert_eq!(stored.embedding.values, vec![0.0, 50.0, 0.0]);
    }

    #[test]
    fn enroll_caps_batch_size() {
        let mut f = fixture(MatchStrategy::First);
        f.engine.config.enroll_batch_size = 2;
        let images = vec![portrait([10, 0, 0]), portrait([30, 0, 0]), portrait([200, 0, 0])];

        let outcome = f.engine.enroll("PRN1", "Asha", &images).unwrap();
        assert_eq!(
            outcome,
            EnrollOutcome::Enrolled { id: "PRN1".into(), images_used: 2, images_skipped: 0 }
        );
        assert_eq!(store(&f).get("PRN1").unwrap().unwrap().embedding.values, vec![20.0, 0.0, 0.0]);
    }

    #[test]
    fn enroll_rejects_empty_identifier() {
        let mut f = fixture(MatchStrategy::First);
        let err = f.engine.enroll(" ", "Asha", &[portrait([10, 0, 0])]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyIdentifier));
    }

    #[test]
    fn mark_missing_file() {
        let mut f = fixture(MatchStrategy::First);
        let path = f.dir.path().join("missing.png");
        let outcome = f.engine.mark_attendance(&path, &session()).unwrap();
        assert_eq!(outcome, MarkOutcome::FileNotFound(path));
        assert_eq!(f.embed_calls.get(), 0);
    }

    #[test]
    fn mark_no_faces_writes_no_log() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "A", vec![255.0, 0.0, 0.0]);

        let outcome = f.engine.mark_image(&classroom(&[[0, 0, 0]]), &session()).unwrap();
        assert_eq!(outcome, MarkOutcome::NoFaces);
        let log = AttendanceLog::new(&f.engine.config.attendance_dir);
        assert!(!log.path_for(&session()).exists());
    }

    #[test]
    fn mark_from_file_matches_identical_embedding() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "A", vec![255.0, 0.0, 0.0]);
        let path = f.dir.path().join("classroom.png");
        classroom(&[[255, 0, 0]]).save(&path).unwrap();

        let outcome = f.engine.mark_attendance(&path, &session()).unwrap();
        let MarkOutcome::Marked { log_path, matches, faces } = outcome else {
            panic!("expected a match");
        };
        assert_eq!(faces, 1);
        assert_eq!(matches, vec![AttendanceEntry { id: "A".into(), name: "Student A".into() }]);

        let rows = AttendanceLog::new(&f.engine.config.attendance_dir).read(&session()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "A");
        assert_eq!(rows[0].subject, "Mathematics");
        assert_eq!(rows[0].timestamp.len(), "2024-03-07 09:15:00".len());
        assert!(log_path.ends_with("attendance_Mathematics_10_CS_2024.csv"));
    }

    #[test]
    fn mark_orthogonal_embedding_no_match() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "A", vec![255.0, 0.0, 0.0]);

        let outcome = f.engine.mark_image(&classroom(&[[0, 255, 0]]), &session()).unwrap();
        assert_eq!(outcome, MarkOutcome::NoMatches { faces: 1 });
        let log = AttendanceLog::new(&f.engine.config.attendance_dir);
        assert!(!log.path_for(&session()).exists());
    }

    #[test]
    fn mark_multiple_faces() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "R", vec![255.0, 0.0, 0.0]);
        put(&f, "G", vec![0.0, 255.0, 0.0]);

        let outcome = f
            .engine
            .mark_image(&classroom(&[[0, 200, 0], [0, 0, 255], [250, 0, 0]]), &session())
            .unwrap();
        let MarkOutcome::Marked { matches, faces, .. } = outcome else {
            panic!("expected matches");
        };
        assert_eq!(faces, 3);
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["G", "R"]);
    }

    #[test]
    fn first_strategy_returns_earlier_record_above_threshold() {
        let mut f = fixture(MatchStrategy::First);
        // B is enumerated first and clears 0.8 against pure red; A is exact.
        put(&f, "B", vec![230.0, 70.0, 0.0]);
        put(&f, "A", vec![255.0, 0.0, 0.0]);

        let outcome = f.engine.mark_image(&classroom(&[[255, 0, 0]]), &session()).unwrap();
        let MarkOutcome::Marked { matches, .. } = outcome else {
            panic!("expected a match");
        };
        assert_eq!(matches[0].id, "B");
    }

    #[test]
    fn best_strategy_returns_closest_record() {
        let mut f = fixture(MatchStrategy::Best);
        put(&f, "B", vec![230.0, 70.0, 0.0]);
        put(&f, "A", vec![255.0, 0.0, 0.0]);

        let outcome = f.engine.mark_image(&classroom(&[[255, 0, 0]]), &session()).unwrap();
        let MarkOutcome::Marked { matches, .. } = outcome else {
            panic!("expected a match");
        };
        assert_eq!(matches[0].id, "A");
    }

    #[test]
    fn first_strategy_with_exact_record_first() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "A", vec![255.0, 0.0, 0.0]);
        put(&f, "B", vec![230.0, 70.0, 0.0]);

        let outcome = f.engine.mark_image(&classroom(&[[255, 0, 0]]), &session()).unwrap();
        let MarkOutcome::Marked { matches, .. } = outcome else {
            panic!("expected a match");
        };
        assert_eq!(matches[0].id, "A");
    }

    #[test]
    fn repeated_marking_appends_under_one_header() {
        let mut f = fixture(MatchStrategy::First);
        put(&f, "R", vec![255.0, 0.0, 0.0]);
        put(&f, "G", vec![0.0, 255.0, 0.0]);

        f.engine.mark_image(&classroom(&[[255, 0, 0], [0, 255, 0]]), &session()).unwrap();
        let outcome = f
            .engine
            .mark_image(&classroom(&[[0, 255, 0], [255, 0, 0], [0, 250, 0]]), &session())
            .unwrap();
        let MarkOutcome::Marked { log_path, .. } = outcome else {
            panic!("expected matches");
        };

        let text = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("PRN No,")).count(), 1);
        assert_eq!(text.lines().count(), 1 + 2 + 3);
    }

    #[test]
    fn mark_with_empty_store_is_no_match() {
        let mut f = fixture(MatchStrategy::First);
        let outcome = f.engine.mark_image(&classroom(&[[255, 0, 0]]), &session()).unwrap();
        assert_eq!(outcome, MarkOutcome::NoMatches { faces: 1 });
    }

    #[test]
    fn load_fails_fast_without_models() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            model_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let err = Engine::load(config).err().unwrap();
        assert!(matches!(err, EngineError::Detector(DetectorError::ModelNotFound(_))));
    }
}
