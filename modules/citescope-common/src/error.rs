use thiserror::Error;

use crate::record::SourceTag;

#[derive(Error, Debug)]
pub enum Error {
    /// Network or auth failure calling an external source. Retried a bounded
    /// number of times, then the unit is skipped and counted.
    #[error("source {src} unavailable: {message}")]
    SourceUnavailable { src: SourceTag, message: String },

    /// The source answered but the payload cannot be interpreted. Skipped and
    /// counted, never fatal to a batch.
    #[error("malformed record from {src}: {message}")]
    MalformedRecord { src: SourceTag, message: String },

    /// A coalescing or edge-creation transaction failed. Fatal to that unit —
    /// silently dropping it risks a half-merged graph.
    #[error("graph write conflict: {0}")]
    GraphWriteConflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("another build is already running against this graph")]
    BuildLockHeld,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn source_unavailable(source: SourceTag, message: impl std::fmt::Display) -> Self {
        Error::SourceUnavailable {
            src: source,
            message: message.to_string(),
        }
    }

    pub fn malformed(source: SourceTag, message: impl std::fmt::Display) -> Self {
        Error::MalformedRecord {
            src: source,
            message: message.to_string(),
        }
    }

    /// Whether a bounded retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SourceUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
