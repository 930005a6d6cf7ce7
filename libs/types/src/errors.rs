//! Error types for feed reconciliation
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Top-level reconciliation error surfaced to the caller.
///
/// Malformed deltas never surface here; they are absorbed and counted by
/// the manager. Only apply and checksum failures under the `error`
/// mismatch policy propagate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed driver for {feed} has shut down")]
    DriverClosed { feed: String },
}

/// A delta could not be applied to the current snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("Delta for {path} carries no data")]
    MissingData { path: String },

    #[error("Unknown delta kind: {kind}")]
    UnknownKind { kind: String },
}

impl ApplyError {
    /// Short label for logs and statistics.
    pub fn label(&self) -> &'static str {
        match self {
            ApplyError::PathNotFound { .. } => "path_not_found",
            ApplyError::TypeMismatch { .. } => "type_mismatch",
            ApplyError::InvalidPath(_) => "invalid_path",
            ApplyError::MissingData { .. } => "missing_data",
            ApplyError::UnknownKind { .. } => "unknown_kind",
        }
    }
}

/// Path mini-language parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("unexpected '{found}' at position {position}")]
    UnexpectedChar { position: usize, found: char },

    #[error("empty field name at position {position}")]
    EmptyField { position: usize },

    #[error("invalid index '{text}' at position {position}")]
    InvalidIndex { position: usize, text: String },

    #[error("unterminated index starting at position {position}")]
    UnterminatedIndex { position: usize },
}

/// Rule/config validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_buffer_size must be positive when buffering is enabled")]
    ZeroBufferSize,

    #[error("gap thresholds out of order: {medium}/{high}/{critical} (medium/high/critical)")]
    InvalidGapThresholds { medium: u64, high: u64, critical: u64 },

    #[error("failed to parse rules: {0}")]
    Parse(String),
}
