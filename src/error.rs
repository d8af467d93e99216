//! Error types for Trueno-Cache
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Cache error types
#[derive(Error, Debug)]
pub enum Error {
    /// Decode requested with a codec that is not registered
    #[error("Unsupported compression: {0}\nEnable the `compression` feature or re-store the artifact with a registered codec")]
    UnsupportedCompression(String),

    /// Payload does not match what the codec expects
    #[error("Codec error: {0}")]
    Codec(String),

    /// Read/write failure against a tier backend or the metadata store
    #[error("Storage I/O error on {tier}: {message}")]
    StorageIo {
        /// Tier or store that failed
        tier: String,
        /// Failure description
        message: String,
    },

    /// External dependency did not answer in time
    #[error("Dependency timeout: {operation} exceeded {timeout_ms}ms")]
    DependencyTimeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Tier has no room for the artifact
    #[error("Capacity exceeded on {tier}: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        /// Tier that refused the write
        tier: String,
        /// Bytes requested
        requested: u64,
        /// Bytes still free
        available: u64,
    },

    /// JSON/bincode encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// GPU initialization failed
    #[error("GPU initialization failed: {0}\nFalling back to host-resident accelerator tier")]
    GpuInitFailed(String),

    /// Worker pool dropped a job before completing it
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a storage error for the named tier or store.
    #[must_use]
    pub fn storage(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageIo {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageIo { .. } | Self::DependencyTimeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(format!("json: {e}"))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(format!("bincode: {e}"))
    }
}
