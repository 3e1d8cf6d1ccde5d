//! Single calls through the gateway against the seeded database.

use docbridge::{DocId, Query, Selector, Update};
use serde_json::json;

use crate::support::{verify_db_file, Fixture};

fn name(value: &str) -> Query {
    Query::field("name").eq(value)
}

// ============================================================================
// Inserts
// ============================================================================

#[tokio::test]
async fn insert_returns_integer_ids() {
    let fixture = Fixture::empty();
    let bridge = fixture.open().await;

    for data in [
        json!({"name": "Jane"}),
        json!({"name": "John", "age": 30}),
        json!({"name": "Alice", "age": 25, "city": "Wonderland", "active": true}),
    ] {
        bridge.insert(data).await.unwrap();
    }
    assert_eq!(bridge.all().await.unwrap().len(), 3);
    assert_eq!(bridge.insert(json!({"n": 4})).await.unwrap(), DocId(4));
}

#[tokio::test]
async fn insert_multiple_returns_one_id_per_document() {
    let fixture = Fixture::empty();
    let bridge = fixture.open().await;

    assert!(bridge.insert_multiple(vec![]).await.unwrap().is_empty());
    let ids = bridge
        .insert_multiple(vec![
            json!({"name": "Alice", "age": 25}),
            json!({"name": "John", "age": 30}),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec![DocId(1), DocId(2)]);
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn reads_see_the_seeded_documents() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    assert_eq!(bridge.all().await.unwrap().len(), 3);
    assert_eq!(bridge.search(name("Alice")).await.unwrap().len(), 1);
    assert!(bridge.search(name("Bob")).await.unwrap().is_empty());

    let alice = bridge.get(name("Alice")).await.unwrap().unwrap();
    assert_eq!(
        alice,
        json!({"name": "Alice", "age": 28, "city": "Wonderland", "active": true})
    );
    assert_eq!(alice.id(), DocId(3));
    assert!(bridge.get(name("Bob")).await.unwrap().is_none());

    assert!(bridge.contains(name("Alice")).await.unwrap());
    assert!(!bridge.contains(name("Bob")).await.unwrap());
    assert_eq!(bridge.count(Query::field("active").eq(true)).await.unwrap(), 2);
}

#[tokio::test]
async fn reads_by_id() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    let jane = bridge.get_by_id(DocId(2)).await.unwrap().unwrap();
    assert_eq!(jane["name"], "Jane");
    assert!(bridge.get_by_id(DocId(9)).await.unwrap().is_none());
    assert!(bridge.contains_id(DocId(1)).await.unwrap());

    let many = bridge.get_many(vec![DocId(3), DocId(1)]).await.unwrap();
    let names: Vec<_> = many.iter().map(|d| d["name"].clone()).collect();
    assert_eq!(names, vec![json!("John"), json!("Alice")]);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn update_reports_touched_ids() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    let ids = bridge
        .update(json!({"status": "updated"}), name("Alice"))
        .await
        .unwrap();
    assert_eq!(ids, vec![DocId(3)]);
    assert!(bridge
        .update(json!({"status": "none"}), name("Bob"))
        .await
        .unwrap()
        .is_empty());

    let bumped = bridge
        .update(
            Update::transform(|doc| {
                let age = doc["age"].as_u64().unwrap_or(0);
                doc.insert("age".into(), json!(age + 1));
            }),
            Selector::All,
        )
        .await
        .unwrap();
    assert_eq!(bumped, vec![DocId(1), DocId(2), DocId(3)]);
    assert_eq!(bridge.get_by_id(DocId(1)).await.unwrap().unwrap()["age"], 31);
}

#[tokio::test]
async fn update_multiple_reports_ids_in_table_order() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    let ids = bridge
        .update_multiple(vec![
            (Update::from(json!({"status": "updated"})), name("Alice")),
            (Update::from(json!({"age": 28})), name("John")),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec![DocId(1), DocId(3)]);
}

#[tokio::test]
async fn upsert_updates_then_inserts() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    assert_eq!(
        bridge
            .upsert(json!({"status": "updated"}), name("Alice"))
            .await
            .unwrap(),
        vec![DocId(3)]
    );
    assert_eq!(
        bridge
            .upsert(json!({"name": "Bob", "status": "new"}), name("Bob"))
            .await
            .unwrap(),
        vec![DocId(4)]
    );
}

#[tokio::test]
async fn remove_and_truncate() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    assert_eq!(bridge.remove(name("Alice")).await.unwrap(), vec![DocId(3)]);
    assert!(bridge.remove(name("Alice")).await.unwrap().is_empty());
    assert_eq!(bridge.remove(vec![DocId(1)]).await.unwrap(), vec![DocId(1)]);

    bridge.truncate().await.unwrap();
    assert!(bridge.all().await.unwrap().is_empty());
    bridge.clear_cache().await.unwrap();

    let data = verify_db_file(&fixture.path);
    assert_eq!(data["_default"], json!({}));
}

#[tokio::test]
async fn writes_are_persisted_in_the_tinydb_layout() {
    let fixture = Fixture::empty();
    let bridge = fixture.open().await;
    bridge.insert(json!({"name": "Jane"})).await.unwrap();
    bridge.close().await.unwrap();

    let data = verify_db_file(&fixture.path);
    assert_eq!(data, json!({"_default": {"1": {"name": "Jane"}}}));
}

// ============================================================================
// Tables
// ============================================================================

#[tokio::test]
async fn named_tables_share_the_file() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    let users = bridge.table("users").await.unwrap();
    assert_eq!(users.insert(json!({"name": "Bob"})).await.unwrap(), DocId(1));
    assert_eq!(users.count(Query::noop()).await.unwrap(), 1);
    assert_eq!(bridge.count(Query::noop()).await.unwrap(), 3);

    let tables = bridge.tables().await.unwrap();
    assert_eq!(
        tables.into_iter().collect::<Vec<_>>(),
        vec!["_default".to_string(), "users".to_string()]
    );

    let data = verify_db_file(&fixture.path);
    assert_eq!(data["users"], json!({"1": {"name": "Bob"}}));

    bridge.drop_tables().await.unwrap();
    assert!(bridge.tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn queries_compose() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;

    let active_adults = Query::field("active").eq(true) & Query::field("age").ge(29);
    let found = bridge.search(active_adults).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "John");

    let either = name("Jane") | name("Alice");
    assert_eq!(bridge.count(either).await.unwrap(), 2);

    let wonder = Query::field("city").search("land").unwrap();
    assert_eq!(bridge.count(!wonder).await.unwrap(), 2);
}
