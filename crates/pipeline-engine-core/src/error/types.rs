//! Primary error enum for the pipeline engine.
//!
//! Each variant maps to one failure mode of the compile-and-execute pipeline.
//! The composition variants (`DepthExceeded`, `CircularReference`) are fatal
//! at the composition node; template variants are fatal only in strict mode.

use super::{ErrorCategory, ErrorSeverity};

/// Primary error type for all pipeline engine operations.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// IR failed a structural or cross-referential check.
    ///
    /// The validator collects every problem before failing; this variant
    /// carries the combined report when a single error value is needed.
    #[error("Workflow validation failed: {message}")]
    Validation { message: String },

    /// A template variable could not be resolved in strict mode.
    #[error("Template resolution failed for node '{node_id}': {message}")]
    TemplateResolution { node_id: String, message: String },

    /// A typed parameter received JSON-looking text that could not be parsed
    /// into the declared kind.
    #[error("Parameter '{param}' of node '{node_id}' contains malformed JSON: {message}")]
    MalformedJson {
        node_id: String,
        param: String,
        message: String,
    },

    /// A node body failed during execution.
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// A node type has no registered constructor.
    ///
    /// Distinguished from runtime failures because the remedy is to install
    /// or register the capability, not to retry.
    #[error("Unknown node type '{node_type}'")]
    UnknownNodeType { node_type: String },

    /// A named workflow is not present in the library.
    #[error("Workflow '{name}' not found")]
    WorkflowNotFound { name: String },

    /// A workflow file could not be read or parsed.
    #[error("Failed to load workflow from '{path}': {message}")]
    WorkflowLoad { path: String, message: String },

    /// Sub-workflow nesting exceeded the configured limit.
    #[error("Maximum workflow nesting depth ({max_depth}) exceeded")]
    DepthExceeded { max_depth: u32 },

    /// A workflow appeared in its own ancestor execution stack.
    #[error("Circular workflow reference detected: {cycle}")]
    CircularReference { cycle: String },

    /// A composition node was configured inconsistently, e.g. more than one
    /// of `workflow_name` / `workflow_ref` / `workflow_ir` set.
    #[error("Invalid sub-workflow configuration: {message}")]
    Composition { message: String },

    /// Configuration outside the IR itself is invalid (unknown storage mode,
    /// bad compile options).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Data could not be serialized to or from JSON.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File system failure while loading workflow definitions.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// The platform denied an operation on behalf of a node.
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// A node exceeded its time budget.
    #[error("Operation timed out: {message}")]
    Timeout { message: String },
}

impl FlowError {
    /// Classification used when lowering into an [`super::ErrorRecord`].
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::Validation { .. } | FlowError::Configuration { .. } => {
                ErrorCategory::Validation
            }
            FlowError::TemplateResolution { .. } | FlowError::MalformedJson { .. } => {
                ErrorCategory::Template
            }
            FlowError::NodeExecution { .. }
            | FlowError::Serialization { .. }
            | FlowError::Io { .. }
            | FlowError::DepthExceeded { .. }
            | FlowError::CircularReference { .. }
            | FlowError::Composition { .. } => ErrorCategory::Runtime,
            FlowError::UnknownNodeType { .. } => ErrorCategory::MissingResource,
            FlowError::WorkflowNotFound { .. } | FlowError::WorkflowLoad { .. } => {
                ErrorCategory::NotFound
            }
            FlowError::Permission { .. } => ErrorCategory::Permission,
            FlowError::Timeout { .. } => ErrorCategory::Timeout,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowError::Validation { .. } | FlowError::Configuration { .. } => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Node the error is attributed to, when one is known.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowError::TemplateResolution { node_id, .. }
            | FlowError::MalformedJson { node_id, .. }
            | FlowError::NodeExecution { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Suggested remedy surfaced to interactive callers.
    pub fn user_action(&self) -> Option<&'static str> {
        match self {
            FlowError::Validation { .. } => Some("Fix the workflow definition and re-run"),
            FlowError::TemplateResolution { .. } => {
                Some("Check that the referenced variable is produced by an upstream node or provided as an input")
            }
            FlowError::MalformedJson { .. } => {
                Some("Ensure the upstream value is valid JSON of the declared parameter type")
            }
            FlowError::UnknownNodeType { .. } => {
                Some("Register the node type or install the capability that provides it")
            }
            FlowError::WorkflowNotFound { .. } => Some("Save the workflow or correct its name"),
            FlowError::WorkflowLoad { .. } => Some("Check the workflow file path and contents"),
            FlowError::DepthExceeded { .. } => {
                Some("Flatten the workflow composition or raise max_depth")
            }
            FlowError::CircularReference { .. } => {
                Some("Break the cycle between the listed workflows")
            }
            _ => None,
        }
    }

    /// Shorthand for node execution failures raised by node implementations.
    pub fn node_execution(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::NodeExecution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Failure raised from inside a node body, before the node knows its
    /// graph id. The wrapper stamps the owning node's id before the error
    /// leaves the flow.
    pub fn node_failure(message: impl Into<String>) -> Self {
        FlowError::NodeExecution {
            node_id: String::new(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        FlowError::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(error: std::io::Error) -> Self {
        FlowError::Io {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let err = FlowError::UnknownNodeType {
            node_type: "shell".into(),
        };
        assert_eq!(err.category(), ErrorCategory::MissingResource);

        let err = FlowError::TemplateResolution {
            node_id: "n1".into(),
            message: "missing".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Template);
        assert_eq!(err.node_id(), Some("n1"));
    }

    #[test]
    fn circular_reference_message_mentions_cycle() {
        let err = FlowError::CircularReference {
            cycle: "a.json -> b.json -> a.json".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Circular"));
        assert!(message.contains("a.json -> b.json -> a.json"));
    }
}
