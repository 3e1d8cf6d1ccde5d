//! The synchronous document store behind a gateway.
//!
//! `DocumentStore` is the blocking operation surface a `Bridge` forwards to.
//! Implementations are not required to be thread-safe: the gateway only ever
//! calls them from one blocking worker at a time, through `&mut self`.
//!
//! `Database` is the bundled implementation, a small JSON document database:
//!
//! ```ignore
//! use docbridge::{Database, DatabaseOptions, DocumentStore, Query};
//! use serde_json::json;
//!
//! let mut db = Database::open(None, DatabaseOptions::default())?;
//! let id = db.insert("_default", json!({"name": "Alice", "age": 28}))?;
//! let found = db.search("_default", &Query::field("name").eq("Alice"))?;
//! assert_eq!(found[0].id(), id);
//! ```

mod database;
mod query;
mod storage;

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

pub use database::{Database, DatabaseOptions};
pub use query::{Field, Query};
pub use storage::{JsonStorage, MemoryStorage, Storage};

/// Name of the table used by the database-level operation surface.
pub const DEFAULT_TABLE: &str = "_default";

/// The field map of a document.
pub type Fields = Map<String, Value>;

/// Identifier assigned to a document by its table. Ids start at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocId(pub u64);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

impl PartialEq<u64> for DocId {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

/// A stored document: its fields plus the id its table assigned.
///
/// Compares equal to a plain JSON object with the same fields, ignoring the id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    id: DocId,
    fields: Fields,
}

impl Document {
    pub fn new(id: DocId, fields: Fields) -> Self {
        Document { id, fields }
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl Deref for Document {
    type Target = Fields;

    fn deref(&self) -> &Fields {
        &self.fields
    }
}

impl PartialEq<Fields> for Document {
    fn eq(&self, other: &Fields) -> bool {
        &self.fields == other
    }
}

impl PartialEq<Value> for Document {
    fn eq(&self, other: &Value) -> bool {
        other.as_object() == Some(&self.fields)
    }
}

/// Converts a JSON value into a document field map, rejecting non-objects.
pub fn to_fields(value: Value) -> StoreResult<Fields> {
    match value {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::InvalidArgument(format!(
            "document must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// How matched documents are changed by `update`.
#[derive(Clone)]
pub enum Update {
    /// Merge these fields into the document (must be a JSON object).
    Fields(Value),
    /// Mutate the document's fields in place.
    Transform(Arc<dyn Fn(&mut Fields) + Send + Sync>),
}

impl Update {
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&mut Fields) + Send + Sync + 'static,
    {
        Update::Transform(Arc::new(f))
    }

    /// Apply to one document's fields.
    pub fn apply(&self, fields: &mut Fields) -> StoreResult<()> {
        match self {
            Update::Fields(value) => {
                let Value::Object(changes) = value else {
                    return Err(StoreError::InvalidArgument(format!(
                        "update fields must be a JSON object, got {}",
                        json_kind(value)
                    )));
                };
                for (key, value) in changes {
                    fields.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            Update::Transform(f) => {
                f(fields);
                Ok(())
            }
        }
    }
}

impl From<Value> for Update {
    fn from(value: Value) -> Self {
        Update::Fields(value)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Fields(value) => f.debug_tuple("Fields").field(value).finish(),
            Update::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Which documents an `update` or `remove` applies to.
#[derive(Debug, Clone)]
pub enum Selector {
    All,
    Query(Query),
    Ids(Vec<DocId>),
}

impl From<Query> for Selector {
    fn from(query: Query) -> Self {
        Selector::Query(query)
    }
}

impl From<Vec<DocId>> for Selector {
    fn from(ids: Vec<DocId>) -> Self {
        Selector::Ids(ids)
    }
}

/// The blocking operation surface of a document store.
///
/// Every table-level method takes the table name first. A gateway calls these
/// opaquely and hands back whatever they return.
pub trait DocumentStore: Send + Sized + 'static {
    /// Construction options, forwarded verbatim from the gateway builder.
    type Options: Clone + Default + Send + Sync + 'static;

    /// Open a handle. `None` means an anonymous in-memory resource.
    fn open(path: Option<&Path>, options: Self::Options) -> StoreResult<Self>;

    /// Access (or lazily create) a table.
    fn table(&mut self, name: &str) -> StoreResult<()>;

    /// Names of the tables that hold data.
    fn tables(&mut self) -> StoreResult<BTreeSet<String>>;

    fn drop_tables(&mut self) -> StoreResult<()>;

    fn drop_table(&mut self, name: &str) -> StoreResult<()>;

    /// Release the storage. Closing twice is not an error.
    fn close(&mut self) -> StoreResult<()>;

    fn insert(&mut self, table: &str, document: Value) -> StoreResult<DocId>;

    fn insert_multiple(&mut self, table: &str, documents: Vec<Value>) -> StoreResult<Vec<DocId>>;

    fn all(&mut self, table: &str) -> StoreResult<Vec<Document>>;

    fn search(&mut self, table: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// First document matching `query`.
    fn get(&mut self, table: &str, query: &Query) -> StoreResult<Option<Document>>;

    fn get_by_id(&mut self, table: &str, id: DocId) -> StoreResult<Option<Document>>;

    /// Documents for the ids that exist; missing ids are skipped.
    fn get_many(&mut self, table: &str, ids: &[DocId]) -> StoreResult<Vec<Document>>;

    fn contains(&mut self, table: &str, query: &Query) -> StoreResult<bool>;

    fn contains_id(&mut self, table: &str, id: DocId) -> StoreResult<bool>;

    /// Returns the ids of the updated documents.
    fn update(&mut self, table: &str, update: &Update, selector: &Selector)
        -> StoreResult<Vec<DocId>>;

    /// Apply each `(update, query)` pair to every document it matches.
    fn update_multiple(&mut self, table: &str, updates: &[(Update, Query)])
        -> StoreResult<Vec<DocId>>;

    /// Update the documents matching `query`, or insert `document` if none match.
    fn upsert(&mut self, table: &str, document: Value, query: &Query) -> StoreResult<Vec<DocId>>;

    /// Returns the ids of the removed documents.
    fn remove(&mut self, table: &str, selector: &Selector) -> StoreResult<Vec<DocId>>;

    fn truncate(&mut self, table: &str) -> StoreResult<()>;

    fn count(&mut self, table: &str, query: &Query) -> StoreResult<usize>;

    /// Drop any cached query results for `table`.
    fn clear_cache(&mut self, table: &str) -> StoreResult<()>;

    /// Engine-specific operations addressed by name.
    fn call(&mut self, name: &str, args: Value) -> StoreResult<Value> {
        let _ = args;
        Err(StoreError::UnknownOperation(name.to_string()))
    }
}
