//! Async gateway for a synchronous, file-backed document store.
//!
//! Every operation is offloaded to tokio's blocking pool, serialized per
//! resource identity (the store's file path) and bounded by a timeout, so
//! concurrent tasks cannot interleave writes to the same file and a slow call
//! never stalls the scheduler.

mod bridge;
mod config;
mod envelope;
mod error;
mod lock;
mod store;

pub use bridge::{Bridge, BridgeBuilder, Operation, Outcome, TableRef};
pub use config::{BridgeConfig, DEFAULT_TIMEOUT};
pub use envelope::{Envelope, LockRelease};
pub use error::{
    BridgeError, BridgeResult, LifecycleError, StoreError, StoreResult, TimeoutStage,
};
pub use lock::{LockManager, LockRegistry, ResourceId, ResourceLock};
pub use store::{
    to_fields, Database, DatabaseOptions, DocId, Document, DocumentStore, Field, Fields,
    JsonStorage, MemoryStorage, Query, Selector, Storage, Update, DEFAULT_TABLE,
};
