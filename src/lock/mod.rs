//! Per-resource locks shared by every gateway addressing the same resource.

mod in_memory;
mod lock_manager;

use std::fmt;
use std::path::Path;

pub use in_memory::LockRegistry;
pub use lock_manager::LockManager;

/// The async mutual-exclusion primitive guarding one resource.
///
/// `tokio::sync::Mutex` queues waiters in FIFO order, so callers on the same
/// resource are served in arrival order.
pub type ResourceLock = tokio::sync::Mutex<()>;

/// Identity under which gateways share a lock.
///
/// Path-backed gateways use the path exactly as given. Two spellings of the
/// same file (relative vs absolute, through a symlink) are distinct identities
/// and do not exclude each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Sentinel identity for gateways without a path (in-memory storage).
    pub const DEFAULT: &'static str = "default";

    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }

    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => ResourceId(path.to_string_lossy().into_owned()),
            None => ResourceId(Self::DEFAULT.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId(id)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
