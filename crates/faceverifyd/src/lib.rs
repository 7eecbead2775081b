//! faceverifyd — HTTP face embedding and verification service.
//!
//! `POST /generate-embedding` turns an uploaded face image into an embedding
//! vector; `POST /compare-faces` decides whether an uploaded face matches a
//! previously stored embedding. All inference runs on a single engine thread
//! that owns the ONNX sessions.

pub mod config;
pub mod engine;
pub mod error;
pub mod form;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Config, ConfigError, LogFormat};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use error::{ComparisonError, ServiceError, ServiceResult};
pub use server::{build_router, run};
pub use state::{AppState, ServiceConfig};
