use rollcall_core::recognizer::DEFAULT_FACE_SIZE;
use rollcall_core::MatchStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Rollcall configuration.
///
/// Resolved in layers: built-in defaults, then the TOML file named by
/// `ROLLCALL_CONFIG` (if set), then individual `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// Embedding model file name inside `model_dir`.
    pub embedder_model: String,
    /// Square input edge of the embedding model.
    pub face_size: u32,
    /// Expected embedding length; unchecked when absent.
    pub embedding_dim: Option<usize>,
    /// Path to the SQLite student database.
    pub db_path: PathBuf,
    /// Directory holding per-session attendance CSV files.
    pub attendance_dir: PathBuf,
    /// Cosine similarity a face must exceed to count as a match.
    pub similarity_threshold: f32,
    /// Maximum number of images used per enrollment.
    pub enroll_batch_size: usize,
    /// How a face is matched against the enrolled set.
    pub match_strategy: MatchStrategy,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_dir: data_dir.join("models"),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "facenet.onnx".to_string(),
            face_size: DEFAULT_FACE_SIZE,
            embedding_dim: None,
            db_path: data_dir.join("attendance.db"),
            attendance_dir: data_dir.join("attendance_records"),
            similarity_threshold: 0.8,
            enroll_batch_size: 30,
            match_strategy: MatchStrategy::First,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_ATTENDANCE_DIR") {
            self.attendance_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_MODEL") {
            self.embedder_model = v;
        }
        env_parse(lookup, "ROLLCALL_FACE_SIZE", &mut self.face_size);
        env_parse(lookup, "ROLLCALL_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        env_parse(lookup, "ROLLCALL_ENROLL_BATCH_SIZE", &mut self.enroll_batch_size);
        env_parse(lookup, "ROLLCALL_MATCH_STRATEGY", &mut self.match_strategy);

        let mut dim = 0usize;
        if env_parse(lookup, "ROLLCALL_EMBEDDING_DIM", &mut dim) {
            self.embedding_dim = (dim > 0).then_some(dim);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enroll_batch_size == 0 {
            return Err(ConfigError::Invalid("enroll_batch_size must be at least 1".into()));
        }
        if self.face_size == 0 {
            return Err(ConfigError::Invalid("face_size must be at least 1".into()));
        }
        if !self.similarity_threshold.is_finite() {
            return Err(ConfigError::Invalid("similarity_threshold must be a finite number".into()));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(&self.embedder_model)
            .to_string_lossy()
            .into_owned()
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Parse `key` into `slot` if set. Unparseable values are logged and ignored.
/// Returns whether `slot` was updated.
fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> bool {
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            false
        }
    }
}
