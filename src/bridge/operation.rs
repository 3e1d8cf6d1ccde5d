use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::store::{DocId, Document, DocumentStore, Query, Selector, Update};

/// A store operation as a value, for `Bridge::invoke`.
///
/// Covers the whole typed surface plus `Call`, which reaches operations a
/// store only knows by name.
#[derive(Debug, Clone)]
pub enum Operation {
    Table { name: String },
    Tables,
    DropTables,
    DropTable { name: String },
    Close,
    Insert { table: String, document: Value },
    InsertMultiple { table: String, documents: Vec<Value> },
    All { table: String },
    Search { table: String, query: Query },
    Get { table: String, query: Query },
    GetById { table: String, id: DocId },
    GetMany { table: String, ids: Vec<DocId> },
    Contains { table: String, query: Query },
    ContainsId { table: String, id: DocId },
    Update { table: String, update: Update, selector: Selector },
    UpdateMultiple { table: String, updates: Vec<(Update, Query)> },
    Upsert { table: String, document: Value, query: Query },
    Remove { table: String, selector: Selector },
    Truncate { table: String },
    Count { table: String, query: Query },
    ClearCache { table: String },
    Call { name: String, args: Value },
}

/// What an `Operation` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unit,
    Id(DocId),
    Ids(Vec<DocId>),
    Documents(Vec<Document>),
    Document(Option<Document>),
    Bool(bool),
    Count(usize),
    Tables(BTreeSet<String>),
    Value(Value),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Table { .. } => "table",
            Operation::Tables => "tables",
            Operation::DropTables => "drop_tables",
            Operation::DropTable { .. } => "drop_table",
            Operation::Close => "close",
            Operation::Insert { .. } => "insert",
            Operation::InsertMultiple { .. } => "insert_multiple",
            Operation::All { .. } => "all",
            Operation::Search { .. } => "search",
            Operation::Get { .. } => "get",
            Operation::GetById { .. } => "get_by_id",
            Operation::GetMany { .. } => "get_many",
            Operation::Contains { .. } => "contains",
            Operation::ContainsId { .. } => "contains_id",
            Operation::Update { .. } => "update",
            Operation::UpdateMultiple { .. } => "update_multiple",
            Operation::Upsert { .. } => "upsert",
            Operation::Remove { .. } => "remove",
            Operation::Truncate { .. } => "truncate",
            Operation::Count { .. } => "count",
            Operation::ClearCache { .. } => "clear_cache",
            Operation::Call { .. } => "call",
        }
    }

    pub(crate) fn apply<S: DocumentStore>(self, store: &mut S) -> StoreResult<Outcome> {
        let outcome = match self {
            Operation::Table { name } => store.table(&name).map(|()| Outcome::Unit)?,
            Operation::Tables => Outcome::Tables(store.tables()?),
            Operation::DropTables => store.drop_tables().map(|()| Outcome::Unit)?,
            Operation::DropTable { name } => store.drop_table(&name).map(|()| Outcome::Unit)?,
            // closing is a session transition, owned by `Bridge::close`
            Operation::Close => {
                return Err(StoreError::InvalidArgument(
                    "close must go through the gateway".into(),
                ))
            }
            Operation::Insert { table, document } => Outcome::Id(store.insert(&table, document)?),
            Operation::InsertMultiple { table, documents } => {
                Outcome::Ids(store.insert_multiple(&table, documents)?)
            }
            Operation::All { table } => Outcome::Documents(store.all(&table)?),
            Operation::Search { table, query } => Outcome::Documents(store.search(&table, &query)?),
            Operation::Get { table, query } => Outcome::Document(store.get(&table, &query)?),
            Operation::GetById { table, id } => Outcome::Document(store.get_by_id(&table, id)?),
            Operation::GetMany { table, ids } => Outcome::Documents(store.get_many(&table, &ids)?),
            Operation::Contains { table, query } => Outcome::Bool(store.contains(&table, &query)?),
            Operation::ContainsId { table, id } => Outcome::Bool(store.contains_id(&table, id)?),
            Operation::Update {
                table,
                update,
                selector,
            } => Outcome::Ids(store.update(&table, &update, &selector)?),
            Operation::UpdateMultiple { table, updates } => {
                Outcome::Ids(store.update_multiple(&table, &updates)?)
            }
            Operation::Upsert {
                table,
                document,
                query,
            } => Outcome::Ids(store.upsert(&table, document, &query)?),
            Operation::Remove { table, selector } => Outcome::Ids(store.remove(&table, &selector)?),
            Operation::Truncate { table } => store.truncate(&table).map(|()| Outcome::Unit)?,
            Operation::Count { table, query } => Outcome::Count(store.count(&table, &query)?),
            Operation::ClearCache { table } => store.clear_cache(&table).map(|()| Outcome::Unit)?,
            Operation::Call { name, args } => Outcome::Value(store.call(&name, args)?),
        };
        Ok(outcome)
    }
}
