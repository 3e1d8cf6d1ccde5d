//! The gateway callers talk to.
//!
//! A `Bridge` owns one store handle and forwards every operation through the
//! execution envelope, so the store is only ever touched by one blocking worker
//! at a time per resource identity, never by the async scheduler itself.
//!
//! ## Example
//!
//! ```ignore
//! use docbridge::{Bridge, Query};
//! use serde_json::json;
//!
//! let bridge = Bridge::open("db.json").await?;
//! match bridge.insert(json!({"name": "Alice", "age": 28})).await {
//!     Ok(id) => println!("stored as {}", id),
//!     Err(err) => eprintln!("insert failed: {}", err),
//! }
//!
//! let users = bridge.table("users").await?;
//! let adults = users.search(Query::field("age").ge(18)).await?;
//! bridge.close().await?;
//! ```

mod operation;
mod table;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, TryLockError};
use std::time::Duration;

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::envelope::{lock_slot, new_handle, Envelope, Handle, HandleSlot, LockRelease};
use crate::error::{BridgeResult, LifecycleError};
use crate::lock::{LockManager, LockRegistry, ResourceId};
use crate::store::{
    Database, DocId, Document, DocumentStore, Query, Selector, Update, DEFAULT_TABLE,
};

pub use operation::{Operation, Outcome};
pub use table::TableRef;

/// Builder for a `Bridge`.
///
/// `Bridge::builder()` starts one for the bundled `Database`; use
/// `BridgeBuilder::<MyStore>::new()` to put the gateway in front of another
/// `DocumentStore` implementation.
pub struct BridgeBuilder<S: DocumentStore = Database> {
    path: Option<PathBuf>,
    config: BridgeConfig,
    options: S::Options,
    locks: Option<Arc<dyn LockManager>>,
}

impl<S: DocumentStore> Default for BridgeBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DocumentStore> BridgeBuilder<S> {
    pub fn new() -> Self {
        BridgeBuilder {
            path: None,
            config: BridgeConfig::default(),
            options: S::Options::default(),
            locks: None,
        }
    }

    /// Store file; also the identity under which gateways share a lock.
    /// Without a path the store is anonymous (in memory) with identity `"default"`.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = Some(timeout);
        self
    }

    pub fn lock_release(mut self, release: LockRelease) -> Self {
        self.config.lock_release = release;
        self
    }

    /// Options handed to `S::open` as they are.
    pub fn options(mut self, options: S::Options) -> Self {
        self.options = options;
        self
    }

    /// Use this lock manager instead of the process-wide `LockRegistry`.
    pub fn lock_manager(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Build the gateway without opening the store; call `Bridge::enter` next.
    pub fn build(self) -> Bridge<S> {
        let identity = ResourceId::from_path(self.path.as_deref());
        let locks = self
            .locks
            .unwrap_or_else(|| LockRegistry::global() as Arc<dyn LockManager>);
        let lock = locks.acquire(&identity);

        Bridge {
            path: self.path,
            envelope: Envelope::new(identity, lock, &self.config),
            handle: new_handle(),
            options: self.options,
        }
    }

    /// Build the gateway and open the store.
    pub async fn open(self) -> BridgeResult<Bridge<S>> {
        let bridge = self.build();
        bridge.enter().await?;
        Ok(bridge)
    }
}

/// Async gateway in front of one `DocumentStore` handle.
///
/// Every operation returns a `BridgeResult`; store faults, timeouts and
/// lifecycle misuse all arrive as `Err`, never as a panic. Operations on the
/// bridge itself address the default table; `table` gives a view on another.
///
/// The handle is closed exactly once: by `close`, or when the bridge is
/// dropped.
pub struct Bridge<S: DocumentStore = Database> {
    path: Option<PathBuf>,
    envelope: Envelope,
    handle: Handle<S>,
    options: S::Options,
}

impl Bridge<Database> {
    pub fn builder() -> BridgeBuilder<Database> {
        BridgeBuilder::new()
    }

    /// Open a JSON database file with default settings.
    pub async fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::builder().path(path).open().await
    }

    /// Open an anonymous in-memory database with default settings.
    pub async fn memory() -> BridgeResult<Self> {
        Self::builder().open().await
    }
}

impl<S: DocumentStore> Bridge<S> {
    pub fn identity(&self) -> &ResourceId {
        self.envelope.identity()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.envelope.timeout()
    }

    pub fn is_open(&self) -> bool {
        matches!(*lock_slot(&self.handle), HandleSlot::Open(_))
    }

    /// Open the store handle. Does nothing if it is already open; fails with
    /// a lifecycle error once the bridge has been closed.
    pub async fn enter(&self) -> BridgeResult<()> {
        let handle = Arc::clone(&self.handle);
        let path = self.path.clone();
        let options = self.options.clone();
        let identity = self.identity().to_string();

        let opened = self
            .envelope
            .execute("open", move || {
                let mut slot = lock_slot(&handle);
                match *slot {
                    HandleSlot::Open(_) => return Ok(false),
                    HandleSlot::Closed => return Err(LifecycleError::Closed { identity }.into()),
                    HandleSlot::Unopened => {}
                }
                *slot = HandleSlot::Open(S::open(path.as_deref(), options)?);
                Ok(true)
            })
            .await?;

        if opened {
            tracing::info!(identity = %self.identity(), "store session opened");
        }
        Ok(())
    }

    /// Close the store handle. Closing again (or closing a never-opened bridge) is a no-op.
    pub async fn close(&self) -> BridgeResult<()> {
        let handle = Arc::clone(&self.handle);
        let closed = self
            .envelope
            .execute("close", move || {
                let mut slot = lock_slot(&handle);
                match std::mem::replace(&mut *slot, HandleSlot::Closed) {
                    HandleSlot::Open(mut store) => store.close().map(|()| true).map_err(Into::into),
                    HandleSlot::Unopened | HandleSlot::Closed => Ok(false),
                }
            })
            .await?;

        if closed {
            tracing::info!(identity = %self.identity(), "store session closed");
        }
        Ok(())
    }

    /// A view forwarding table-level operations to table `name`, creating it if needed.
    pub async fn table(&self, name: &str) -> BridgeResult<TableRef<'_, S>> {
        let owned = name.to_string();
        self.envelope
            .run("table", &self.handle, move |store: &mut S| store.table(&owned))
            .await?;
        Ok(TableRef::new(self, name))
    }

    pub async fn tables(&self) -> BridgeResult<BTreeSet<String>> {
        self.envelope
            .run("tables", &self.handle, |store: &mut S| store.tables())
            .await
    }

    pub async fn drop_tables(&self) -> BridgeResult<()> {
        self.envelope
            .run("drop_tables", &self.handle, |store: &mut S| store.drop_tables())
            .await
    }

    pub async fn drop_table(&self, name: &str) -> BridgeResult<()> {
        let name = name.to_string();
        self.envelope
            .run("drop_table", &self.handle, move |store: &mut S| store.drop_table(&name))
            .await
    }

    /// Run any operation described as an `Operation` value.
    pub async fn invoke(&self, operation: Operation) -> BridgeResult<Outcome> {
        if let Operation::Close = operation {
            return self.close().await.map(|()| Outcome::Unit);
        }
        self.envelope
            .run(operation.name(), &self.handle, move |store: &mut S| {
                operation.apply(store)
            })
            .await
    }

    fn default_table(&self) -> TableRef<'_, S> {
        TableRef::new(self, DEFAULT_TABLE)
    }

    pub(crate) fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub(crate) fn handle(&self) -> &Handle<S> {
        &self.handle
    }

    // Default-table surface.

    pub async fn insert(&self, document: Value) -> BridgeResult<DocId> {
        self.default_table().insert(document).await
    }

    pub async fn insert_multiple(&self, documents: Vec<Value>) -> BridgeResult<Vec<DocId>> {
        self.default_table().insert_multiple(documents).await
    }

    pub async fn all(&self) -> BridgeResult<Vec<Document>> {
        self.default_table().all().await
    }

    pub async fn search(&self, query: Query) -> BridgeResult<Vec<Document>> {
        self.default_table().search(query).await
    }

    pub async fn get(&self, query: Query) -> BridgeResult<Option<Document>> {
        self.default_table().get(query).await
    }

    pub async fn get_by_id(&self, id: DocId) -> BridgeResult<Option<Document>> {
        self.default_table().get_by_id(id).await
    }

    pub async fn get_many(&self, ids: Vec<DocId>) -> BridgeResult<Vec<Document>> {
        self.default_table().get_many(ids).await
    }

    pub async fn contains(&self, query: Query) -> BridgeResult<bool> {
        self.default_table().contains(query).await
    }

    pub async fn contains_id(&self, id: DocId) -> BridgeResult<bool> {
        self.default_table().contains_id(id).await
    }

    pub async fn update(
        &self,
        update: impl Into<Update>,
        selector: impl Into<Selector>,
    ) -> BridgeResult<Vec<DocId>> {
        self.default_table().update(update, selector).await
    }

    pub async fn update_multiple(&self, updates: Vec<(Update, Query)>) -> BridgeResult<Vec<DocId>> {
        self.default_table().update_multiple(updates).await
    }

    pub async fn upsert(&self, document: Value, query: Query) -> BridgeResult<Vec<DocId>> {
        self.default_table().upsert(document, query).await
    }

    pub async fn remove(&self, selector: impl Into<Selector>) -> BridgeResult<Vec<DocId>> {
        self.default_table().remove(selector).await
    }

    pub async fn truncate(&self) -> BridgeResult<()> {
        self.default_table().truncate().await
    }

    pub async fn count(&self, query: Query) -> BridgeResult<usize> {
        self.default_table().count(query).await
    }

    pub async fn clear_cache(&self) -> BridgeResult<()> {
        self.default_table().clear_cache().await
    }
}

impl<S: DocumentStore> Drop for Bridge<S> {
    fn drop(&mut self) {
        let open = match self.handle.try_lock() {
            Ok(slot) => matches!(*slot, HandleSlot::Open(_)),
            Err(TryLockError::Poisoned(poisoned)) => {
                matches!(*poisoned.into_inner(), HandleSlot::Open(_))
            }
            // an abandoned call still holds the handle
            Err(TryLockError::WouldBlock) => true,
        };
        if !open {
            return;
        }

        // the close holds the identity lock and stays off the scheduler
        let handle = Arc::clone(&self.handle);
        let lock = Arc::clone(self.envelope.lock());
        let identity = self.identity().clone();
        let close = move || {
            let _guard = lock.blocking_lock();
            close_slot(&mut lock_slot(&handle), &identity);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

fn close_slot<S: DocumentStore>(slot: &mut HandleSlot<S>, identity: &ResourceId) {
    if let HandleSlot::Open(mut store) = std::mem::replace(slot, HandleSlot::Closed) {
        match store.close() {
            Ok(()) => tracing::info!(identity = %identity, "store session closed on drop"),
            Err(err) => tracing::warn!(identity = %identity, %err, "failed to close store on drop"),
        }
    }
}
