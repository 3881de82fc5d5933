//! # Error Handling
//!
//! This module provides the error types for every operation in the pipeline
//! engine. All failures are variants of the [`FlowError`] enum; for external
//! reporting each error lowers into a serializable [`ErrorRecord`] carrying a
//! category, a human-readable message, and a suggested user action.
//!
//! ## Error Categories
//!
//! Errors are classified so callers can pick the right remedy:
//!
//! - [`ErrorCategory::Validation`] — IR structural or cross-referential
//!   problems, fatal before execution
//! - [`ErrorCategory::Template`] — unresolved variables or malformed JSON for
//!   typed parameters
//! - [`ErrorCategory::Runtime`] — failures raised by node bodies
//! - [`ErrorCategory::MissingResource`] — unknown node types or capabilities
//! - [`ErrorCategory::NotFound`] — workflows or files that do not exist
//! - [`ErrorCategory::Permission`] / [`ErrorCategory::Timeout`] — surfaced on
//!   behalf of node implementations
//!
//! Validation failures are collected into a list and reported together rather
//! than one at a time, so repair tooling sees every problem at once.

pub mod types;

pub use types::FlowError;

use serde::{Deserialize, Serialize};

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Error severity levels for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Informational - no action required
    Info,
    /// Warning - should be investigated
    Warning,
    /// Error - requires attention
    Error,
    /// Critical - immediate action required
    Critical,
}

/// Error categories for classification and user guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// IR structural or cross-referential problems
    Validation,
    /// Unresolved template variables or malformed JSON for typed parameters
    Template,
    /// Failures raised by node bodies during execution
    Runtime,
    /// A required capability or node type is not installed
    MissingResource,
    /// The operation was denied by the platform
    Permission,
    /// A referenced workflow, node, or file does not exist
    NotFound,
    /// A node exceeded its time budget
    Timeout,
}

/// Serializable error report handed to callers.
///
/// One record per failure; the orchestrator returns these in
/// `ExecutionResult::errors` and the validator produces them in bulk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Classification used to pick a remedy
    pub category: ErrorCategory,
    /// Human-readable description
    pub message: String,
    /// Node the error is attributed to, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Opaque technical payload (stack context, raw values)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_details: Option<String>,
    /// Suggested next step for the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_action: Option<String>,
}

impl ErrorRecord {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            node_id: None,
            technical_details: None,
            user_action: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_user_action(mut self, action: impl Into<String>) -> Self {
        self.user_action = Some(action.into());
        self
    }

    /// Validation-category record; the most common kind produced in bulk.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }
}

impl From<&FlowError> for ErrorRecord {
    fn from(error: &FlowError) -> Self {
        Self {
            category: error.category(),
            message: error.to_string(),
            node_id: error.node_id().map(str::to_string),
            technical_details: None,
            user_action: error.user_action().map(str::to_string),
        }
    }
}
