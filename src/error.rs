// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Opflow Error Types with Error Codes
//!
//! Error code ranges:
//! - OPF-010-019: Validation errors (malformed workflow/step definitions)
//! - OPF-020-029: Lookup errors (unknown workflow or template)
//! - OPF-030-039: Conflict errors (operation invalid for current status)
//! - OPF-040-049: Execution errors (captured inside step outcomes)
//! - OPF-050-059: Storage errors
//! - OPF-060-069: Configuration errors
//! - OPF-090-099: IO / serialization errors (IO, JSON, YAML, TOML)

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpflowError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
#[diagnostic(url(docsrs))]
pub enum OpflowError {
    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[OPF-010] Workflow validation failed: {reason}")]
    #[diagnostic(
        code(opflow::validation_error),
        help("Each step needs the field matching its type: module, command or delay_seconds")
    )]
    Validation { reason: String },

    #[error("[OPF-011] Step {index} ('{name}') is invalid: {reason}")]
    #[diagnostic(code(opflow::invalid_step))]
    InvalidStep {
        index: usize,
        name: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // LOOKUP ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[OPF-020] Workflow '{id}' not found")]
    #[diagnostic(code(opflow::not_found), help("List workflows to find a valid id"))]
    NotFound { id: String },

    #[error("[OPF-021] Template '{id}' not found")]
    #[diagnostic(code(opflow::template_not_found))]
    TemplateNotFound { id: String },

    // ═══════════════════════════════════════════
    // CONFLICT ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[OPF-030] Cannot {operation} workflow '{id}': {reason}")]
    #[diagnostic(code(opflow::conflict))]
    Conflict {
        id: String,
        operation: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // EXECUTION ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[OPF-040] Step execution failed: {reason}")]
    Execution { reason: String },

    #[error("[OPF-041] Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    // ═══════════════════════════════════════════
    // STORAGE ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[OPF-050] Storage error: {reason}")]
    #[diagnostic(
        code(opflow::storage_error),
        help("Check the data directory exists and is writable")
    )]
    Storage { reason: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[OPF-060] Config error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[OPF-093] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[OPF-094] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[OPF-095] YAML parse error: {0}")]
    #[diagnostic(
        code(opflow::yaml_parse),
        help("Check YAML syntax: indentation must be consistent, strings with special chars need quoting")
    )]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[OPF-096] TOML parse error: {0}")]
    #[diagnostic(code(opflow::toml_parse))]
    TomlParse(#[from] toml::de::Error),
}

impl OpflowError {
    /// Shorthand for a conflict on a given workflow
    pub fn conflict(
        id: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            id: id.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a storage failure
    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }

    /// Get the error code (e.g., "OPF-030")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "OPF-010",
            Self::InvalidStep { .. } => "OPF-011",
            Self::NotFound { .. } => "OPF-020",
            Self::TemplateNotFound { .. } => "OPF-021",
            Self::Conflict { .. } => "OPF-030",
            Self::Execution { .. } => "OPF-040",
            Self::Timeout { .. } => "OPF-041",
            Self::Storage { .. } => "OPF-050",
            Self::ConfigError { .. } => "OPF-060",
            Self::IoError(_) => "OPF-093",
            Self::JsonError(_) => "OPF-094",
            Self::YamlParse(_) => "OPF-095",
            Self::TomlParse(_) => "OPF-096",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidStep { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::TemplateNotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl FixSuggestion for OpflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            OpflowError::Validation { .. } => {
                Some("Check the workflow has a name and every step matches its type")
            }
            OpflowError::InvalidStep { .. } => Some(
                "exploit/auxiliary/post need 'module', command needs 'command', delay needs 'delay_seconds'",
            ),
            OpflowError::NotFound { .. } => Some("Run 'opflow list' to see stored workflows"),
            OpflowError::TemplateNotFound { .. } => {
                Some("Run 'opflow templates' to see available templates")
            }
            OpflowError::Conflict { .. } => {
                Some("Stop the run first, or duplicate a finished workflow to run it again")
            }
            OpflowError::Execution { .. } => Some("Check the target session is still alive"),
            OpflowError::Timeout { .. } => Some("Increase the timeouts in the [execution] config"),
            OpflowError::Storage { .. } => Some("Check the data directory exists and is writable"),
            OpflowError::ConfigError { .. } => {
                Some("Check ~/.config/opflow/config.toml and OPFLOW_* env vars")
            }
            OpflowError::IoError(_) => Some("Check the file path exists"),
            OpflowError::JsonError(_) => None,
            OpflowError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            OpflowError::TomlParse(_) => Some("Check ~/.config/opflow/config.toml syntax"),
        }
    }
}
