//! Error handling for Doberman
//!
//! Each subsystem has its own `thiserror` enum (`PipelineError`, `NodeError`,
//! `StoreError`, `TelemetryError`, `CommandParseError`); `DobermanError`
//! wraps the ones that reach the monitor and the binary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DobermanError {
    /// A pipeline failed to build or was not found
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// An expression failed to compile or evaluate
    #[error("Script error: {0}")]
    Script(String),

    /// Config file unreadable, malformed, or a command that does not fit
    /// this monitor
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command socket could not be bound
    #[error("Listener error: {0}")]
    Listener(String),

    /// A worker thread could not be spawned
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DobermanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DobermanError::Config("missing [monitor] section".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing [monitor] section"
        );
    }

    #[test]
    fn test_subsystem_errors_convert() {
        let err: DobermanError = crate::pipeline::PipelineError::NotFound("alarm_x".into()).into();
        assert!(matches!(err, DobermanError::Pipeline(_)));
        assert!(err.to_string().contains("alarm_x"));

        let err: DobermanError = crate::store::StoreError::not_found("sensors", "T1").into();
        assert!(matches!(err, DobermanError::Store(_)));
    }
}
