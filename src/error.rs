use std::sync::Arc;

use thiserror::Error;

/// Diagnostic produced by a [`Schema`](crate::Schema) when a computed value
/// does not have the declared shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A `get_output` failure as cached by the engine.
///
/// The same cached result reaches every subscriber of the output, so the
/// underlying `anyhow::Error` sits behind an `Arc` and clones share it.
#[derive(Debug, Error, Clone)]
#[error("{error:#}")]
pub struct ComputeError {
    error: Arc<anyhow::Error>,
}

impl ComputeError {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: Arc::new(error.into()),
        }
    }

    /// The failure as returned by the producer, context chain included.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("Node '{0}' not found")]
    NodeNotFound(Arc<str>),

    #[error("Node '{node}' has no output '{output}'")]
    OutputNotFound { node: Arc<str>, output: Arc<str> },

    #[error("{source}")]
    Validation {
        node: Arc<str>,
        output: Arc<str>,
        source: SchemaError,
    },

    #[error("Node '{node}' failed to compute output '{output}':\n{source}")]
    Compute {
        node: Arc<str>,
        output: Arc<str>,
        source: ComputeError,
    },
}

impl PipelineError {
    /// Node id the error refers to.
    pub fn node(&self) -> &str {
        match self {
            PipelineError::NodeNotFound(node) => node,
            PipelineError::OutputNotFound { node, .. } => node,
            PipelineError::Validation { node, .. } => node,
            PipelineError::Compute { node, .. } => node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_missing_key() {
        let err = PipelineError::NodeNotFound("missing".into());
        assert_eq!(err.to_string(), "Node 'missing' not found");

        let err = PipelineError::OutputNotFound {
            node: "node1".into(),
            output: "missingOutput".into(),
        };
        assert!(err.to_string().contains("missingOutput"));
        assert_eq!(err.node(), "node1");
    }

    #[test]
    fn test_validation_message_is_the_diagnostic() {
        let err = PipelineError::Validation {
            node: "node1".into(),
            output: "color".into(),
            source: SchemaError::new("expected a string"),
        };
        assert_eq!(err.to_string(), "expected a string");
    }

    #[test]
    fn test_compute_error_is_shared() {
        let err = ComputeError::new(anyhow::anyhow!("boom"));
        let copy = err.clone();
        assert!(Arc::ptr_eq(&err.error, &copy.error));
        assert_eq!(copy.to_string(), "boom");
    }

    #[test]
    fn test_compute_error_keeps_context() {
        use anyhow::Context;

        let failure: anyhow::Result<()> = Err(anyhow::anyhow!("disk on fire"));
        let err = ComputeError::new(failure.context("reading swatches").unwrap_err());

        assert_eq!(err.to_string(), "reading swatches: disk on fire");
        assert_eq!(err.error().root_cause().to_string(), "disk on fire");
    }
}
