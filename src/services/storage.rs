use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::Row;

use super::store::{read_at, StoreError, StorePath};
use crate::db::DbPool;

/// Row key used when a whole collection holds a plain value.
const COLLECTION_VALUE: &str = "";

/// Persists the store tree one record (`collection/key`) per row.
#[derive(Clone)]
pub struct StorageService {
    pool: DbPool,
}

impl StorageService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn load_tree(&self) -> Result<Value, StoreError> {
        let rows = sqlx::query("SELECT collection, record_key, body FROM store_records")
            .fetch_all(&self.pool)
            .await?;

        let mut root = Map::new();
        for row in rows {
            let collection: String = row.get("collection");
            let key: String = row.get("record_key");
            let body: Value = serde_json::from_str(row.get::<&str, _>("body"))?;
            if key == COLLECTION_VALUE {
                root.insert(collection, body);
                continue;
            }
            let entry = root
                .entry(collection)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(records) = entry {
                records.insert(key, body);
            }
        }

        if root.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(Value::Object(root))
        }
    }

    /// Rewrites every row touched by `writes`, reading final values from `next`.
    pub async fn persist_change(
        &self,
        previous: &Value,
        next: &Value,
        writes: &[(StorePath, Option<Value>)],
    ) -> Result<(), StoreError> {
        let mut touched = BTreeSet::new();
        for (path, _) in writes {
            touched_records(previous, path, &mut touched);
            touched_records(next, path, &mut touched);
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for (collection, key) in touched {
            let value = if key == COLLECTION_VALUE {
                next.get(&collection).filter(|value| !value.is_object())
            } else {
                read_at(next, &StorePath::parse(&format!("{collection}/{key}"))?)
            };
            match value {
                Some(value) => {
                    sqlx::query(
                        r#"INSERT INTO store_records (collection, record_key, body, updated_at)
                           VALUES (?1, ?2, ?3, ?4)
                           ON CONFLICT(collection, record_key)
                           DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at"#,
                    )
                    .bind(&collection)
                    .bind(&key)
                    .bind(serde_json::to_string(value)?)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "DELETE FROM store_records WHERE collection = ?1 AND record_key = ?2",
                    )
                    .bind(&collection)
                    .bind(&key)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

fn touched_records(tree: &Value, path: &StorePath, out: &mut BTreeSet<(String, String)>) {
    match path.segments() {
        [] => {
            if let Some(collections) = tree.as_object() {
                for (collection, value) in collections {
                    collection_records(collection, value, out);
                }
            }
        }
        [collection] => {
            if let Some(value) = tree.get(collection) {
                collection_records(collection, value, out);
            }
            out.insert((collection.clone(), COLLECTION_VALUE.to_string()));
        }
        [collection, key, ..] => {
            out.insert((collection.clone(), key.clone()));
            out.insert((collection.clone(), COLLECTION_VALUE.to_string()));
        }
    }
}

fn collection_records(collection: &str, value: &Value, out: &mut BTreeSet<(String, String)>) {
    out.insert((collection.to_string(), COLLECTION_VALUE.to_string()));
    if let Some(records) = value.as_object() {
        for key in records.keys() {
            out.insert((collection.to_string(), key.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        db::{init_pool, run_migrations},
        services::store::{RealtimeStore, StoreWriter, TreeStore},
    };

    async fn storage(root: &TempDir) -> StorageService {
        let url = format!("sqlite://{}", root.path().join("store.sqlite").display());
        let pool = init_pool(&url).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        StorageService::new(pool)
    }

    #[tokio::test]
    async fn tree_survives_reopen() {
        let root = TempDir::new().expect("tempdir");
        let store = TreeStore::open(storage(&root).await).await.expect("open");
        store
            .set("trips/john-doe", json!({ "driverName": "John Doe", "status": "active" }))
            .await
            .expect("set trip");
        store
            .set("locations/john-doe", json!({ "lat": 12.97, "lng": 77.59, "timestamp": 1 }))
            .await
            .expect("set location");
        store
            .set("trips/john-doe/status", json!("ended"))
            .await
            .expect("end");
        store.set("locations/ghost", json!({ "lat": 0.0, "lng": 0.0 })).await.expect("ghost");
        store.remove("locations/ghost").await.expect("remove");

        let reopened = TreeStore::open(storage(&root).await).await.expect("reopen");
        assert_eq!(
            reopened.get("trips/john-doe/status").await.expect("get"),
            Some(json!("ended"))
        );
        assert_eq!(reopened.get("locations/ghost").await.expect("get"), None);
        assert_eq!(*reopened.snapshot().await, *store.snapshot().await);
    }

    #[tokio::test]
    async fn replacing_a_collection_drops_old_records() {
        let root = TempDir::new().expect("tempdir");
        let store = TreeStore::open(storage(&root).await).await.expect("open");
        store.set("trips/a", json!({ "driverName": "A" })).await.expect("a");
        store.set("trips/b", json!({ "driverName": "B" })).await.expect("b");
        store.set("trips", json!({ "c": { "driverName": "C" } })).await.expect("c");

        let reopened = TreeStore::open(storage(&root).await).await.expect("reopen");
        assert_eq!(
            *reopened.snapshot().await,
            json!({ "trips": { "c": { "driverName": "C" } } })
        );
    }
}
