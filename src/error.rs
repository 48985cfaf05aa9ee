//! Error kinds surfaced by the artifact cache.
//!
//! The cache layer distinguishes three failures a caller has to react to
//! differently: data on disk that can no longer be trusted
//! ([`Error::CacheCorruption`]), an external computation that failed
//! ([`Error::DerivationFailed`]), and input that is wrong before any work
//! starts ([`Error::ConfigurationError`]). Plain filesystem failures are
//! reported as [`Error::Io`].

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Boxed cause carried by [`Error::DerivationFailed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("corrupt cached artifact at {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("failed to derive artifact '{artifact}': {source}")]
    DerivationFailed {
        artifact: String,
        #[source]
        source: BoxError,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Error::CacheCorruption {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::ConfigurationError(message.into())
    }

    /// Short, actionable advice shown under the failure banner.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::CacheCorruption { .. } => {
                "Delete the file named above (or run the command again with --force) \
                 so the artifact is derived again from its source."
            }
            Error::DerivationFailed { .. } => {
                "Check the cause above. Network and API errors are usually transient; \
                 run `meet doctor --online` to verify the API key and endpoint."
            }
            Error::ConfigurationError(_) => {
                "Fix the value in your config file or environment (.env), then retry. \
                 `meet doctor` prints the effective configuration."
            }
            Error::Io { .. } => {
                "Make sure the cache root exists and is writable (see `cache.root` or \
                 MEETEASE_CACHE_ROOT)."
            }
        }
    }
}
