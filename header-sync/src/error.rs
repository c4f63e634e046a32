//! Error types for the header sync core.

use std::io;
use thiserror::Error;

use crate::types::{BlockHash, PeerId};

/// Main error type for the header sync core.
#[derive(Debug, Error)]
pub enum HeaderSyncError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Ban persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),

    #[error("Log rotation failed: {0}")]
    RotationFailed(String),
}

/// Wire decoding and protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("Unexpected end of payload: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Payload has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("Non-canonical compact size encoding")]
    NonCanonicalCompactSize,

    #[error("Oversized message: {count} entries exceeds limit of {limit}")]
    Oversized { count: u64, limit: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} is not connected")]
    NotConnected(PeerId),
}

impl NetworkError {
    /// Errors that count as an oversized-message protocol violation.
    pub fn is_oversized(&self) -> bool {
        matches!(self, NetworkError::Oversized { .. })
    }
}

/// Validation-related errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid proof of work for {0}")]
    InvalidProofOfWork(BlockHash),

    #[error("Non-continuous headers at index {index}: expected parent {expected}, got {actual}")]
    NonContinuous {
        index: usize,
        expected: BlockHash,
        actual: BlockHash,
    },

    #[error("Invalid header {hash}: {reason}")]
    InvalidHeader {
        hash: BlockHash,
        reason: String,
    },
}

/// Header index and chain selection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Unknown block {0}")]
    UnknownBlock(BlockHash),

    #[error("Cannot invalidate genesis block")]
    GenesisInvalidation,

    #[error("Refusing reorganization of {depth} blocks (policy limit {limit})")]
    SuspiciousReorg { depth: u32, limit: u32 },

    #[error("Index inconsistency: {0}")]
    Inconsistent(String),
}

/// Synchronization-related errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Indicates an invalid state in the sync process
    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

impl SyncError {
    /// Returns a static string representing the error category.
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::InvalidState(_) => "state",
            SyncError::Network(_) => "network",
            SyncError::Validation(_) => "validation",
            SyncError::Chain(_) => "chain",
        }
    }
}

/// Type alias for Result with HeaderSyncError.
pub type Result<T> = std::result::Result<T, HeaderSyncError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for validation operation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Type alias for chain operation results.
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
