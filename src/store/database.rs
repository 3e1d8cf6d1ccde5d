use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::storage::{JsonStorage, MemoryStorage, Storage};
use super::{to_fields, DocId, Document, DocumentStore, Fields, Query, Selector, Update};
use crate::error::{StoreError, StoreResult};

/// Options accepted by `Database::open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Query results cached per table; 0 disables the cache.
    pub cache_size: usize,
    /// Create missing parent directories of the database file.
    pub create_dirs: bool,
    /// Write indented JSON.
    pub pretty: bool,
    /// Refuse every write.
    pub read_only: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            cache_size: 10,
            create_dirs: false,
            pretty: false,
            read_only: false,
        }
    }
}

type TableData = BTreeMap<DocId, Fields>;

/// Per-handle bookkeeping for one table.
struct TableState {
    next_id: Option<u64>,
    cache: Option<LruCache<String, Vec<Document>>>,
}

impl TableState {
    fn new(cache_size: usize) -> Self {
        TableState {
            next_id: None,
            cache: NonZeroUsize::new(cache_size).map(LruCache::new),
        }
    }

    fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    // Never hands out an id at or below one already stored, even if another
    // handle on the same file inserted since our last allocation.
    fn allocate_id(&mut self, data: &TableData) -> DocId {
        let after_last = data.keys().next_back().map_or(1, |id| id.0 + 1);
        let id = self.next_id.map_or(after_last, |next| next.max(after_last));
        self.next_id = Some(id + 1);
        DocId(id)
    }
}

/// A JSON document database: named tables of documents keyed by `DocId`.
///
/// Not thread-safe by itself; it is meant to sit behind a `Bridge`. The state
/// is re-read from storage on every operation and written back after every
/// change. Search results are cached per table until the next write through
/// this handle or `clear_cache`; writes made through *another* handle on the
/// same file are not seen by a cached query until its cache is cleared.
pub struct Database {
    storage: Box<dyn Storage>,
    cache_size: usize,
    tables: HashMap<String, TableState>,
    closed: bool,
}

impl Database {
    /// Build a database on a custom storage backend.
    pub fn with_storage(storage: Box<dyn Storage>, cache_size: usize) -> Self {
        Database {
            storage,
            cache_size,
            tables: HashMap::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn state(&mut self, table: &str) -> &mut TableState {
        let cache_size = self.cache_size;
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| TableState::new(cache_size))
    }

    fn read_root(&mut self) -> StoreResult<Map<String, Value>> {
        self.ensure_open()?;
        match self.storage.read()? {
            None => Ok(Map::new()),
            Some(Value::Object(root)) => Ok(root),
            Some(_) => Err(StoreError::Corrupt(
                "database root is not a JSON object".into(),
            )),
        }
    }

    fn read_table(&mut self, table: &str) -> StoreResult<TableData> {
        let root = self.read_root()?;
        match root.get(table) {
            Some(value) => decode_table(table, value),
            None => Ok(TableData::new()),
        }
    }

    /// Read-modify-write one table. Nothing is written if `f` fails.
    fn modify_table<R>(
        &mut self,
        table: &str,
        f: impl FnOnce(&mut TableData, &mut TableState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut root = self.read_root()?;
        let mut data = match root.get(table) {
            Some(value) => decode_table(table, value)?,
            None => TableData::new(),
        };

        let result = f(&mut data, self.state(table))?;

        root.insert(table.to_string(), encode_table(&data));
        self.storage.write(&Value::Object(root))?;
        self.state(table).clear_cache();
        tracing::trace!(table, documents = data.len(), "table written");
        Ok(result)
    }

    fn select_ids(data: &TableData, selector: &Selector) -> StoreResult<Vec<DocId>> {
        match selector {
            Selector::All => Ok(data.keys().copied().collect()),
            Selector::Query(query) => Ok(data
                .iter()
                .filter(|(_, fields)| query.matches(fields))
                .map(|(id, _)| *id)
                .collect()),
            Selector::Ids(ids) => {
                if let Some(missing) = ids.iter().find(|id| !data.contains_key(*id)) {
                    return Err(StoreError::InvalidArgument(format!(
                        "no document with id {}",
                        missing
                    )));
                }
                Ok(ids.clone())
            }
        }
    }
}

fn decode_table(table: &str, value: &Value) -> StoreResult<TableData> {
    let Value::Object(entries) = value else {
        return Err(StoreError::Corrupt(format!("table {} is not a JSON object", table)));
    };

    let mut data = TableData::new();
    for (key, doc) in entries {
        let id = key.parse::<u64>().map_err(|_| {
            StoreError::Corrupt(format!("table {} has non-numeric document id {:?}", table, key))
        })?;
        let Value::Object(fields) = doc else {
            return Err(StoreError::Corrupt(format!(
                "document {} in table {} is not a JSON object",
                id, table
            )));
        };
        data.insert(DocId(id), fields.clone());
    }
    Ok(data)
}

fn encode_table(data: &TableData) -> Value {
    Value::Object(
        data.iter()
            .map(|(id, fields)| (id.to_string(), Value::Object(fields.clone())))
            .collect(),
    )
}

fn documents(data: TableData) -> Vec<Document> {
    data.into_iter()
        .map(|(id, fields)| Document::new(id, fields))
        .collect()
}

impl DocumentStore for Database {
    type Options = DatabaseOptions;

    fn open(path: Option<&Path>, options: DatabaseOptions) -> StoreResult<Self> {
        let storage: Box<dyn Storage> = match path {
            Some(path) => Box::new(JsonStorage::open(
                path,
                options.create_dirs,
                options.pretty,
                options.read_only,
            )?),
            None => Box::new(MemoryStorage::new()),
        };
        Ok(Database::with_storage(storage, options.cache_size))
    }

    fn table(&mut self, name: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.state(name);
        Ok(())
    }

    fn tables(&mut self) -> StoreResult<BTreeSet<String>> {
        Ok(self.read_root()?.keys().cloned().collect())
    }

    fn drop_tables(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.storage.write(&Value::Object(Map::new()))?;
        self.tables.clear();
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> StoreResult<()> {
        let mut root = self.read_root()?;
        if root.remove(name).is_some() {
            self.storage.write(&Value::Object(root))?;
        }
        self.tables.remove(name);
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tables.clear();
        self.storage.close()
    }

    fn insert(&mut self, table: &str, document: Value) -> StoreResult<DocId> {
        let fields = to_fields(document)?;
        self.modify_table(table, |data, state| {
            let id = state.allocate_id(data);
            data.insert(id, fields);
            Ok(id)
        })
    }

    fn insert_multiple(&mut self, table: &str, documents: Vec<Value>) -> StoreResult<Vec<DocId>> {
        let documents = documents
            .into_iter()
            .map(to_fields)
            .collect::<StoreResult<Vec<_>>>()?;
        self.modify_table(table, |data, state| {
            let mut ids = Vec::with_capacity(documents.len());
            for fields in documents {
                let id = state.allocate_id(data);
                data.insert(id, fields);
                ids.push(id);
            }
            Ok(ids)
        })
    }

    fn all(&mut self, table: &str) -> StoreResult<Vec<Document>> {
        Ok(documents(self.read_table(table)?))
    }

    fn search(&mut self, table: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.ensure_open()?;
        let key = query.cache_key();
        if let Some(key) = &key {
            if let Some(hit) = self.state(table).cache.as_mut().and_then(|c| c.get(key)) {
                return Ok(hit.clone());
            }
        }

        let mut data = self.read_table(table)?;
        data.retain(|_, fields| query.matches(fields));
        let found = documents(data);

        if let Some(key) = key {
            if let Some(cache) = self.state(table).cache.as_mut() {
                cache.put(key, found.clone());
            }
        }
        Ok(found)
    }

    fn get(&mut self, table: &str, query: &Query) -> StoreResult<Option<Document>> {
        Ok(self
            .read_table(table)?
            .into_iter()
            .find(|(_, fields)| query.matches(fields))
            .map(|(id, fields)| Document::new(id, fields)))
    }

    fn get_by_id(&mut self, table: &str, id: DocId) -> StoreResult<Option<Document>> {
        Ok(self
            .read_table(table)?
            .remove(&id)
            .map(|fields| Document::new(id, fields)))
    }

    fn get_many(&mut self, table: &str, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        let mut data = self.read_table(table)?;
        data.retain(|id, _| ids.contains(id));
        Ok(documents(data))
    }

    fn contains(&mut self, table: &str, query: &Query) -> StoreResult<bool> {
        Ok(self.get(table, query)?.is_some())
    }

    fn contains_id(&mut self, table: &str, id: DocId) -> StoreResult<bool> {
        Ok(self.read_table(table)?.contains_key(&id))
    }

    fn update(
        &mut self,
        table: &str,
        update: &Update,
        selector: &Selector,
    ) -> StoreResult<Vec<DocId>> {
        self.modify_table(table, |data, _| {
            let ids = Self::select_ids(data, selector)?;
            for id in &ids {
                if let Some(fields) = data.get_mut(id) {
                    update.apply(fields)?;
                }
            }
            Ok(ids)
        })
    }

    fn update_multiple(
        &mut self,
        table: &str,
        updates: &[(Update, Query)],
    ) -> StoreResult<Vec<DocId>> {
        self.modify_table(table, |data, _| {
            let mut updated = Vec::new();
            for (id, fields) in data.iter_mut() {
                for (update, query) in updates {
                    if query.matches(fields) {
                        updated.push(*id);
                        update.apply(fields)?;
                    }
                }
            }
            Ok(updated)
        })
    }

    fn upsert(&mut self, table: &str, document: Value, query: &Query) -> StoreResult<Vec<DocId>> {
        let fields = Value::Object(to_fields(document)?);
        let updated = self.update(
            table,
            &Update::Fields(fields.clone()),
            &Selector::Query(query.clone()),
        )?;
        if !updated.is_empty() {
            return Ok(updated);
        }
        Ok(vec![self.insert(table, fields)?])
    }

    fn remove(&mut self, table: &str, selector: &Selector) -> StoreResult<Vec<DocId>> {
        if let Selector::All = selector {
            return Err(StoreError::InvalidArgument(
                "remove needs a query or ids; use truncate to remove all documents".into(),
            ));
        }
        self.modify_table(table, |data, _| {
            let ids = Self::select_ids(data, selector)?;
            for id in &ids {
                data.remove(id);
            }
            Ok(ids)
        })
    }

    fn truncate(&mut self, table: &str) -> StoreResult<()> {
        self.modify_table(table, |data, state| {
            data.clear();
            state.next_id = None;
            Ok(())
        })
    }

    fn count(&mut self, table: &str, query: &Query) -> StoreResult<usize> {
        Ok(self.search(table, query)?.len())
    }

    fn clear_cache(&mut self, table: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.state(table).clear_cache();
        Ok(())
    }

    /// Supports `"len"` with `{"table": <name>}`: the number of documents in the table.
    fn call(&mut self, name: &str, args: Value) -> StoreResult<Value> {
        match name {
            "len" => {
                let table = args
                    .get("table")
                    .and_then(Value::as_str)
                    .unwrap_or(super::DEFAULT_TABLE)
                    .to_string();
                Ok(Value::from(self.read_table(&table)?.len()))
            }
            other => Err(StoreError::UnknownOperation(other.to_string())),
        }
    }
}
