use crate::config::Config;
use crate::engine::EngineHandle;
use faceverify_core::{DetectorKind, DistanceMetric};
use std::time::Duration;

/// The read-only slice of configuration every request consults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub detector: DetectorKind,
    pub distance_metric: DistanceMetric,
    /// Match threshold; fixed for the process lifetime.
    pub threshold: f64,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl From<&Config> for ServiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            detector: config.detector,
            distance_metric: config.distance_metric,
            threshold: config.threshold(),
            request_timeout: config.request_timeout(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Shared application state: configuration plus the inference engine.
pub struct AppState {
    pub config: ServiceConfig,
    pub engine: EngineHandle,
}

impl AppState {
    pub fn new(config: ServiceConfig, engine: EngineHandle) -> Self {
        Self { config, engine }
    }

    /// Embedding length every stored embedding must match.
    pub fn dimension(&self) -> usize {
        self.engine.dimension()
    }
}
