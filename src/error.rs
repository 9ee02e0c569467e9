//! Error types for telemetry decoding, variable resolution and procedure control.
//!
//! Errors fall into four categories and each one is handled differently:
//!
//! - **Transport noise**: malformed frames, out-of-bounds addresses and stale
//!   sequence numbers. These never become errors; the decoder and providers drop
//!   them and log at `debug`/`trace` level.
//! - **Gating configuration**: missing rule parameters or unknown operators.
//!   Evaluation reports them as a failing [`RuleResult`](crate::gating::RuleResult)
//!   reason. Strict loading surfaces them as [`RuleConfigError`].
//! - **Expression violations**: disallowed syntax in a variable rule. Always a
//!   hard [`ResolverError`] naming the offending operator.
//! - **Procedure contract violations**: orchestrator misuse of the state
//!   machine, raised as [`ProcedureError`].
//!
//! ```rust
//! use simtutor::TutorError;
//!
//! let error = TutorError::connection_failed("bind 0.0.0.0:5010 refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tutor operations.
pub type Result<T, E = TutorError> = std::result::Result<T, E>;

/// Main error type for the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TutorError {
    #[error("Telemetry connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Procedure(#[from] ProcedureError),

    #[error(transparent)]
    RuleConfig(#[from] RuleConfigError),
}

/// Errors raised while loading or evaluating stable-variable expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    #[error("Invalid expression `{expr}`: {details}")]
    Syntax { expr: String, details: String },

    #[error("Unsupported comparison operator {operator} in `{expr}`")]
    UnsupportedComparison { expr: String, operator: &'static str },

    #[error("Unsupported operator {operator} in `{expr}`")]
    UnsupportedOperator { expr: String, operator: &'static str },

    #[error("Unknown namespace '{name}' in `{expr}`")]
    UnknownNamespace { expr: String, name: String },

    #[error("Evaluation of '{var}' failed: {details}")]
    Evaluation { var: String, details: String },

    #[error("telemetry_map.yaml missing top-level 'vars' mapping")]
    MissingVars,
}

/// Contract violations of the procedure state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcedureError {
    #[error("procedure must contain at least one step")]
    EmptyProcedure,

    #[error("duplicate step_id '{id}'")]
    DuplicateStep { id: String },

    #[error("no pending steps to activate")]
    NoPendingSteps,

    #[error("no active step to {action}")]
    NoActiveStep { action: &'static str },

    #[error("no completed step to rewind to")]
    NoCompletedStep,

    #[error("unknown step_id '{id}'")]
    UnknownStep { id: String },
}

/// Gating rule configuration problems found at load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleConfigError {
    #[error("rule has no 'op'")]
    MissingOp,

    #[error("{op} missing '{param}'")]
    MissingParam { op: &'static str, param: &'static str },

    #[error("{op} '{param}' is not numeric")]
    NotNumeric { op: &'static str, param: &'static str },

    #[error("unknown op {op}")]
    UnknownOp { op: String },
}

impl TutorError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TutorError::Connection { .. } => true,
            TutorError::File { .. } => false,
            TutorError::Parse { .. } => false,
            TutorError::Config { .. } => false,
            TutorError::Resolver(_) => false,
            TutorError::Procedure(_) => false,
            TutorError::RuleConfig(_) => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TutorError::Connection { .. } => vec![
                "Check that the simulator export is enabled",
                "Verify host, port and multicast group settings",
                "Make sure no other listener holds the port",
            ],
            TutorError::File { .. } => vec![
                "Check file exists and is readable",
                "Verify the path in the tutor configuration",
            ],
            TutorError::Parse { .. } => vec![
                "Check the document is valid JSON or YAML",
                "Verify the recording was not truncated",
            ],
            TutorError::Config { .. } => vec![
                "Review the tutor configuration file",
                "Compare against the documented defaults",
            ],
            TutorError::Resolver(_) => vec![
                "Fix the expression in telemetry_map.yaml",
                "Use only comparisons, and/or/not and + - * /",
            ],
            TutorError::Procedure(_) => vec![
                "Check the orchestrator calls the state machine in order",
                "Inspect the procedure event log for the last transition",
            ],
            TutorError::RuleConfig(_) => vec![
                "Fix the gating rule parameters",
                "Supported ops are var_gte, arg_in_range, flag_true and time_since",
            ],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TutorError::File { path: path.into(), source }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        TutorError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TutorError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        TutorError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        TutorError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for TutorError {
    fn from(err: std::io::Error) -> Self {
        TutorError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
