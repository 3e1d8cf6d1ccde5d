use std::sync::Arc;

use super::{ResourceId, ResourceLock};

/// Source of per-resource locks for gateways.
///
/// Every `Bridge` asks its manager for the lock of its resource identity when
/// it is built and keeps the returned `Arc` for its whole lifetime. The default
/// `LockRegistry` keeps only weak references, so an identity's lock lives as
/// long as some gateway still uses it.
pub trait LockManager: Send + Sync {
    /// Get (or create) the lock for the given identity.
    ///
    /// While any `Arc` previously returned for `id` is alive, repeated calls
    /// with the same `id` must return that same `Arc`.
    fn acquire(&self, id: &ResourceId) -> Arc<ResourceLock>;
}
