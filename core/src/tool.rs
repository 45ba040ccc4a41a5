//! Core tool types.
//!
//! A tool is a named, versioned unit of Lua source plus the metadata the
//! lifecycle needs to find, call, and repair it. Names are stable for the
//! life of a tool; revisions bump the version by exactly one and carry the
//! error log forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};

/// Cap on a stored fault summary, in characters.
pub const ERROR_SUMMARY_MAX_CHARS: usize = 500;

/// A callable tool managed by the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique, stable name. Never changes across revisions.
    pub name: String,

    /// What the tool does. Also the core of its embedded search text.
    pub description: String,

    /// Ordered positional parameter declarations.
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,

    /// Lua source defining the tool's function.
    pub source_code: String,

    /// Revision number, starting at 1.
    pub version: u32,

    /// Append-only log of execution faults. Entries are never edited or
    /// removed, and repairs leave the log in place.
    #[serde(default)]
    pub error_log: Vec<ErrorRecord>,

    /// When version 1 was created.
    pub created_at: DateTime<Utc>,

    /// When the current version was produced.
    pub updated_at: DateTime<Utc>,
}

impl Tool {
    /// Create a new version-1 tool.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            source_code: source_code.into(),
            version: 1,
            error_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the parameter list.
    pub fn with_parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Number of positional arguments the tool expects.
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Produce the next revision with new content.
    ///
    /// The name, creation time, and error log carry over; the version goes
    /// up by exactly one.
    pub fn next_revision(
        &self,
        description: impl Into<String>,
        source_code: impl Into<String>,
        parameters: Vec<ToolParameter>,
    ) -> Self {
        Self {
            name: self.name.clone(),
            description: description.into(),
            parameters,
            source_code: source_code.into(),
            version: self.version + 1,
            error_log: self.error_log.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// The text that gets embedded for semantic lookup.
    pub fn searchable_text(&self) -> String {
        format!(
            "Tool Name: {}\nDescription: {}\nCode:\n{}",
            self.name, self.description, self.source_code
        )
    }

    /// Check the invariants every stored tool must hold.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(ToolError::ValidationFailure(format!(
                "invalid tool name {:?}: only alphanumerics, '-' and '_' are allowed",
                self.name
            )));
        }
        if self.description.trim().is_empty() {
            return Err(ToolError::ValidationFailure(
                "tool description must not be empty".to_string(),
            ));
        }
        if self.source_code.trim().is_empty() {
            return Err(ToolError::ValidationFailure(
                "tool source must not be empty".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(ToolError::ValidationFailure(
                "tool versions start at 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether `name` is usable as a tool name (and thus a file stem).
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

/// A positional parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name as it appears in the tool's signature.
    pub name: String,

    /// Free-form type hint from the generator ("number", "table", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,

    /// What the parameter means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolParameter {
    /// Create a parameter with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
            description: None,
        }
    }

    /// Set the type hint.
    pub fn with_type_hint(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One captured execution fault.
///
/// Records are immutable once appended; long messages are cut down to
/// [`ERROR_SUMMARY_MAX_CHARS`] so a runaway traceback cannot bloat the
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Tool version that produced the fault.
    pub version: u32,

    /// Fault message, possibly truncated.
    pub summary: String,

    /// When the fault happened.
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Create a record, truncating the summary if needed.
    pub fn new(version: u32, summary: impl Into<String>) -> Self {
        let mut summary = summary.into();
        if let Some((cut, _)) = summary.char_indices().nth(ERROR_SUMMARY_MAX_CHARS) {
            summary.truncate(cut);
            summary.push_str(" [truncated]");
        }
        Self {
            version,
            summary,
            occurred_at: Utc::now(),
        }
    }
}

/// A persisted revision of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRevision {
    /// Revision number.
    pub version: u32,

    /// Description at this revision.
    pub description: String,

    /// Source at this revision.
    pub source_code: String,

    /// Parameters at this revision.
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,

    /// When this revision was stored.
    pub stored_at: DateTime<Utc>,
}

impl From<&Tool> for ToolRevision {
    fn from(tool: &Tool) -> Self {
        Self {
            version: tool.version,
            description: tool.description.clone(),
            source_code: tool.source_code.clone(),
            parameters: tool.parameters.clone(),
            stored_at: tool.updated_at,
        }
    }
}
