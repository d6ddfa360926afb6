//! Error types for taskwire.

use uuid::Uuid;

/// Top-level error type for the dispatch system.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Queue-related errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Worker {id} not found")]
    WorkerNotFound { id: Uuid },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Task {id} completion already settled")]
    AlreadySettled { id: Uuid },
}

/// Task catalogue errors. These always surface as a task's `Rejected`
/// status, never as an uncaught fault.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Task kind {name} is not in the catalogue")]
    UnsupportedKind { name: String },
}

/// Wire protocol errors. Fatal to the affected connection only.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Received {got} before handshake")]
    HandshakeRequired { got: String },

    #[error("Protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: String, theirs: String },

    #[error("Undecodable message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Malformed payload: {reason}")]
    Payload { reason: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// File store errors.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File asset {id} not found")]
    NotFound { id: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
