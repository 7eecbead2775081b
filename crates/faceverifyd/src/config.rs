use faceverify_core::{DetectorKind, DistanceMetric, EmbedderOptions, ModelKind};
use serde::Deserialize;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
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
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?} (expected text or json)")),
        }
    }
}

/// Daemon configuration. Read once at startup and never mutated.
///
/// Sources, lowest precedence first: built-in defaults, the TOML file named
/// by `FACEVERIFY_CONFIG`, then `FACEVERIFY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub model: ModelKind,
    pub detector: DetectorKind,
    pub distance_metric: DistanceMetric,
    /// Match threshold override; `None` uses the model's tuned default for
    /// the configured metric.
    pub threshold: Option<f64>,
    /// Upper bound on a single request's processing time.
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    pub max_upload_bytes: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Pending inference requests queued ahead of the engine thread.
    pub queue_depth: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            model_dir: faceverify_core::default_model_dir(),
            model: ModelKind::SFace,
            detector: DetectorKind::Scrfd,
            distance_metric: DistanceMetric::Cosine,
            threshold: None,
            request_timeout_secs: 30,
            max_upload_bytes: 10 * 1024 * 1024,
            intra_threads: 2,
            queue_depth: 16,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `env` as the variable lookup.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match env("FACEVERIFY_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env_parse(env, "FACEVERIFY_LISTEN_ADDR")? {
            self.listen_addr = v;
        }
        if let Some(v) = env("FACEVERIFY_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_MODEL")? {
            self.model = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_DETECTOR")? {
            self.detector = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_DISTANCE_METRIC")? {
            self.distance_metric = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_THRESHOLD")? {
            self.threshold = Some(v);
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_MAX_UPLOAD_BYTES")? {
            self.max_upload_bytes = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_INTRA_THREADS")? {
            self.intra_threads = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_QUEUE_DEPTH")? {
            self.queue_depth = v;
        }
        if let Some(v) = env_parse(env, "FACEVERIFY_LOG_FORMAT")? {
            self.log_format = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.threshold {
            if !t.is_finite() || t <= 0.0 {
                return Err(invalid("threshold", format!("must be a positive number, got {t}")));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        if self.max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes", "must be at least 1"));
        }
        if self.intra_threads == 0 {
            return Err(invalid("intra_threads", "must be at least 1"));
        }
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth", "must be at least 1"));
        }
        Ok(())
    }

    /// Effective match threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
            .unwrap_or_else(|| self.model.default_threshold(self.distance_metric))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn embedder_options(&self) -> EmbedderOptions {
        EmbedderOptions {
            model_dir: self.model_dir.clone(),
            model: self.model,
            detector: self.detector,
            intra_threads: self.intra_threads,
        }
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| invalid(key, format!("{raw:?}: {e}"))),
        None => Ok(None),
    }
}
