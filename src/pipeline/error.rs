//! Pipeline-specific error types.

use thiserror::Error;

/// Errors raised while building, configuring or driving a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Cyclic or missing dependency in the graph specification.
    #[error("Cannot resolve pipeline graph: built {built:?}, unbuilt {unbuilt:?}")]
    Build {
        built: Vec<String>,
        unbuilt: Vec<String>,
    },

    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("Duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("Invalid config for node '{node}': {message}")]
    InvalidConfig { node: String, message: String },

    #[error("Node '{node}' failed: {source}")]
    NodeProcess {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Could not read configuration: {0}")]
    ConfigRead(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Pipeline '{0}' not found")]
    NotFound(String),
}

/// Errors raised inside a single node's cycle.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Buffer is empty")]
    EmptyBuffer,

    #[error("Buffer not full ({have}/{want})")]
    BufferNotFull { have: usize, want: usize },

    #[error("Variable '{0}' missing from package")]
    MissingVariable(String),

    #[error("Variable '{0}' is not numeric")]
    NonNumeric(String),

    #[error("Not enough samples: need {need}, have {have}")]
    NotEnoughSamples { need: usize, have: usize },

    #[error("Degenerate input: {0}")]
    Degenerate(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("{0}")]
    Other(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
pub type NodeResult<T> = std::result::Result<T, NodeError>;
