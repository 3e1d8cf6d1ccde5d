use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by a `DocumentStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The persisted state does not have the expected table/document layout.
    #[error("corrupt storage: {0}")]
    Corrupt(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage is opened read-only")]
    ReadOnly,
    #[error("storage is closed")]
    Closed,
    /// Returned by `DocumentStore::call` for names the engine does not implement.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// The blocking call panicked; the message is the panic payload when it is a string.
    #[error("store call panicked: {0}")]
    Panicked(String),
}

/// Failures from calling a gateway that has no open store handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("no open store handle for {identity} (enter the session first)")]
    NotOpen { identity: String },
    #[error("store handle for {identity} has been closed")]
    Closed { identity: String },
}

/// Which part of the envelope ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Waiting for the resource lock.
    Acquire,
    /// Waiting for the offloaded store call.
    Execute,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::Acquire => write!(f, "lock acquisition"),
            TimeoutStage::Execute => write!(f, "execution"),
        }
    }
}

/// The failure variant of every gateway operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{operation} timed out during {stage} after {after:?}")]
    Timeout {
        operation: &'static str,
        stage: TimeoutStage,
        after: Duration,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, BridgeError::Lifecycle(_))
    }

    /// The store fault, if this failure came from the underlying store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            BridgeError::Store(err) => Some(err),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a gateway operation: the store's value or a captured fault.
pub type BridgeResult<T> = Result<T, BridgeError>;
