//! Error types for threatsense
//!
//! Only configuration, model loading, I/O and lifecycle problems surface as
//! errors. Insufficient input (short audio, missing frames, warm-up) always
//! resolves to a documented default instead.

use std::any::Any;
use thiserror::Error;

/// Errors that can occur while configuring or running the monitor
#[derive(Debug, Error)]
pub enum ThreatError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load emotion model: {0}")]
    ModelLoad(String),

    #[error("Capture device error: {0}")]
    Capture(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Readable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
