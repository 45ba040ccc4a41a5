//! Error types for the tool lifecycle system.
//!
//! Two layers live here. [`ToolError`] is the `Result` error for component
//! APIs. [`Fault`] is the captured form that lifecycle entry points put on
//! execution outcomes instead of raising: callers receive failures as data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use toolsmith_embeddings::EmbeddingError;

/// Result type alias for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors that can occur in the tool lifecycle system.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Tool not found.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Wrong number of arguments for a tool call.
    #[error("arity mismatch: expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Tool code failed inside the sandbox.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Model output could not be parsed into the expected structure.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Generated tool failed validation.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// An I/O boundary exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Version conflict.
    #[error("version conflict for {tool}: expected {expected}, got {actual}")]
    VersionConflict {
        tool: String,
        expected: u32,
        actual: u32,
    },

    /// Chat gateway failure.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Embedding failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read tool file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write tool file.
    #[error("failed to write file: {0}")]
    WriteFile(String),
}

/// The category of a fault carried on an execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// No tool with the requested name.
    NotFound,

    /// Wrong number of arguments; the tool never ran.
    ArityMismatch,

    /// The tool's own code failed. The only repair-eligible kind.
    ExecutionFault,

    /// The model's output could not be parsed.
    MalformedResponse,

    /// Generated source failed validation.
    ValidationFailure,

    /// An I/O boundary exceeded its deadline.
    Timeout,

    /// Infrastructure failure (gateway, storage, embeddings).
    Internal,
}

impl FaultKind {
    /// Whether a repair attempt can fix faults of this kind.
    pub fn is_repairable(self) -> bool {
        matches!(self, Self::ExecutionFault)
    }
}

/// A captured failure, reported through outcomes instead of being raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    /// What category of failure this is.
    pub kind: FaultKind,

    /// Human-readable description.
    pub message: String,
}

impl Fault {
    /// Create a new fault.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an execution fault.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ExecutionFault, message)
    }

    /// Whether a repair attempt can fix this fault.
    pub fn is_repairable(&self) -> bool {
        self.kind.is_repairable()
    }
}

impl From<&ToolError> for Fault {
    fn from(error: &ToolError) -> Self {
        let kind = match error {
            ToolError::NotFound(_) => FaultKind::NotFound,
            ToolError::ArityMismatch { .. } => FaultKind::ArityMismatch,
            ToolError::Execution(_) => FaultKind::ExecutionFault,
            ToolError::MalformedResponse(_) => FaultKind::MalformedResponse,
            ToolError::ValidationFailure(_) => FaultKind::ValidationFailure,
            ToolError::Timeout(_) => FaultKind::Timeout,
            ToolError::VersionConflict { .. }
            | ToolError::Gateway(_)
            | ToolError::Embedding(_)
            | ToolError::Storage(_)
            | ToolError::Serialization(_) => FaultKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_only_execution_faults_are_repairable() {
        assert!(FaultKind::ExecutionFault.is_repairable());
        assert!(!FaultKind::NotFound.is_repairable());
        assert!(!FaultKind::ArityMismatch.is_repairable());
        assert!(!FaultKind::MalformedResponse.is_repairable());
        assert!(!FaultKind::ValidationFailure.is_repairable());
        assert!(!FaultKind::Timeout.is_repairable());
        assert!(!FaultKind::Internal.is_repairable());
    }

    #[test]
    fn test_fault_from_tool_error() {
        let fault = Fault::from(&ToolError::NotFound("summarize".to_string()));
        assert_eq!(fault.kind, FaultKind::NotFound);
        assert_eq!(fault.message, "tool not found: summarize");

        let fault = Fault::from(&ToolError::Gateway("connection refused".to_string()));
        assert_eq!(fault.kind, FaultKind::Internal);
    }

    #[test]
    fn test_fault_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FaultKind::ExecutionFault).unwrap();
        assert_eq!(json, "\"execution_fault\"");
    }
}
