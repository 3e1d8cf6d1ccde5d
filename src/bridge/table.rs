use std::sync::Arc;

use serde_json::Value;

use crate::error::{BridgeResult, StoreResult};
use crate::store::{Database, DocId, Document, DocumentStore, Query, Selector, Update};

use super::Bridge;

/// A named table seen through its gateway.
///
/// Carries the same operation surface as the default table on `Bridge`, and
/// shares the gateway's lock, timeout and store handle.
pub struct TableRef<'a, S: DocumentStore = Database> {
    bridge: &'a Bridge<S>,
    name: Arc<str>,
}

impl<'a, S: DocumentStore> TableRef<'a, S> {
    pub(super) fn new(bridge: &'a Bridge<S>, name: &str) -> Self {
        TableRef {
            bridge,
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run<T, F>(&self, operation: &'static str, call: F) -> BridgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S, &str) -> StoreResult<T> + Send + 'static,
    {
        let name = Arc::clone(&self.name);
        self.bridge
            .envelope()
            .run(operation, self.bridge.handle(), move |store: &mut S| {
                call(store, &name)
            })
            .await
    }

    pub async fn insert(&self, document: Value) -> BridgeResult<DocId> {
        self.run("insert", move |store, table| store.insert(table, document))
            .await
    }

    pub async fn insert_multiple(&self, documents: Vec<Value>) -> BridgeResult<Vec<DocId>> {
        self.run("insert_multiple", move |store, table| {
            store.insert_multiple(table, documents)
        })
        .await
    }

    pub async fn all(&self) -> BridgeResult<Vec<Document>> {
        self.run("all", |store, table| store.all(table)).await
    }

    pub async fn search(&self, query: Query) -> BridgeResult<Vec<Document>> {
        self.run("search", move |store, table| store.search(table, &query))
            .await
    }

    pub async fn get(&self, query: Query) -> BridgeResult<Option<Document>> {
        self.run("get", move |store, table| store.get(table, &query))
            .await
    }

    pub async fn get_by_id(&self, id: DocId) -> BridgeResult<Option<Document>> {
        self.run("get_by_id", move |store, table| store.get_by_id(table, id))
            .await
    }

    pub async fn get_many(&self, ids: Vec<DocId>) -> BridgeResult<Vec<Document>> {
        self.run("get_many", move |store, table| store.get_many(table, &ids))
            .await
    }

    pub async fn contains(&self, query: Query) -> BridgeResult<bool> {
        self.run("contains", move |store, table| store.contains(table, &query))
            .await
    }

    pub async fn contains_id(&self, id: DocId) -> BridgeResult<bool> {
        self.run("contains_id", move |store, table| store.contains_id(table, id))
            .await
    }

    /// Apply `update` to the documents picked by `selector`; returns the touched ids.
    pub async fn update(
        &self,
        update: impl Into<Update>,
        selector: impl Into<Selector>,
    ) -> BridgeResult<Vec<DocId>> {
        let update = update.into();
        let selector = selector.into();
        self.run("update", move |store, table| {
            store.update(table, &update, &selector)
        })
        .await
    }

    pub async fn update_multiple(&self, updates: Vec<(Update, Query)>) -> BridgeResult<Vec<DocId>> {
        self.run("update_multiple", move |store, table| {
            store.update_multiple(table, &updates)
        })
        .await
    }

    /// Update the documents matching `query` with `document`, or insert it if none match.
    pub async fn upsert(&self, document: Value, query: Query) -> BridgeResult<Vec<DocId>> {
        self.run("upsert", move |store, table| {
            store.upsert(table, document, &query)
        })
        .await
    }

    pub async fn remove(&self, selector: impl Into<Selector>) -> BridgeResult<Vec<DocId>> {
        let selector = selector.into();
        self.run("remove", move |store, table| store.remove(table, &selector))
            .await
    }

    pub async fn truncate(&self) -> BridgeResult<()> {
        self.run("truncate", |store, table| store.truncate(table)).await
    }

    pub async fn count(&self, query: Query) -> BridgeResult<usize> {
        self.run("count", move |store, table| store.count(table, &query))
            .await
    }

    pub async fn clear_cache(&self) -> BridgeResult<()> {
        self.run("clear_cache", |store, table| store.clear_cache(table))
            .await
    }
}
