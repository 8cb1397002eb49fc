//! Unified error types for the order pipeline.
//!
//! Error codes:
//! - SRC_001-002: Event source errors
//! - SINK_001-002: Warehouse sink errors
//! - STATE_001-002: Checkpoint / state errors
//! - DATA_001: Record-level data errors
//! - CFG_001: Configuration errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Source error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorCode {
    /// SRC_001: Transient fetch/connect failure
    Transient,
    /// SRC_002: Source unreachable after all retries
    Unavailable,
}

impl SourceErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient => "SRC_001",
            Self::Unavailable => "SRC_002",
        }
    }
}

/// Sink error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorCode {
    /// SINK_001: Single write attempt failed
    WriteFailed,
    /// SINK_002: All write attempts exhausted, pipeline must halt
    Exhausted,
}

impl SinkErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WriteFailed => "SINK_001",
            Self::Exhausted => "SINK_002",
        }
    }
}

/// Unified error type for the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Transient source failure; retried with backoff.
    #[error("[SRC_001] source error: {0}")]
    Source(String),

    /// Source still failing after the retry budget. The driver pauses on this.
    #[error("[SRC_002] source {source_name} unavailable after {attempts} attempts: {message}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        message: String,
    },

    /// Transient sink failure; retried with backoff.
    #[error("[SINK_001] sink error: {0}")]
    Sink(String),

    /// Sink retries exhausted for a batch. Fatal: the pipeline halts.
    #[error("[SINK_002] batch {batch_id} ({records} records) failed after {attempts} attempts: {message}")]
    SinkExhausted {
        batch_id: String,
        records: usize,
        attempts: u32,
        message: String,
    },

    /// Checkpoint cannot be trusted. Fatal: recovery is required before restart.
    #[error("[STATE_001] recovery required: {0}")]
    StateCorruption(String),

    /// Checkpoint store I/O failure.
    #[error("[STATE_002] checkpoint store error: {0}")]
    Checkpoint(String),

    /// Malformed or invalid record.
    #[error("[DATA_001] invalid record: {0}")]
    InvalidRecord(String),

    #[error("[CFG_001] configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn source_failed(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn source_unavailable(
        source_name: impl Into<String>,
        attempts: u32,
        msg: impl Into<String>,
    ) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            attempts,
            message: msg.into(),
        }
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    pub fn sink_exhausted(
        batch_id: impl Into<String>,
        records: usize,
        attempts: u32,
        msg: impl Into<String>,
    ) -> Self {
        Self::SinkExhausted {
            batch_id: batch_id.into(),
            records,
            attempts,
            message: msg.into(),
        }
    }

    pub fn state_corruption(msg: impl Into<String>) -> Self {
        Self::StateCorruption(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Source(_) => SourceErrorCode::Transient.code(),
            Self::SourceUnavailable { .. } => SourceErrorCode::Unavailable.code(),
            Self::Sink(_) => SinkErrorCode::WriteFailed.code(),
            Self::SinkExhausted { .. } => SinkErrorCode::Exhausted.code(),
            Self::StateCorruption(_) => "STATE_001",
            Self::Checkpoint(_) => "STATE_002",
            Self::InvalidRecord(_) => "DATA_001",
            Self::Config(_) => "CFG_001",
            Self::Serialization(_) => "DATA_001",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Sink(_) | Self::Checkpoint(_))
    }

    /// Whether the pipeline must stop instead of pausing or skipping.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SinkExhausted { .. } | Self::StateCorruption(_) | Self::Config(_)
        )
    }
}
