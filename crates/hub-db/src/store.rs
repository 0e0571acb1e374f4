//! Two [`hub_models::DocumentStore`] adapters: an embedded SQLite-backed
//! store (the production HubDB backend) and an in-memory map (tests).
//!
//! Keeping both behind the same trait avoids a storage strategy leaking
//! a specific store's bulk-write idiom: HubDB itself is just another
//! `DocumentStore` consumer.

use async_trait::async_trait;
use hub_models::{BulkWriteReport, Document, Filter, Mutation, WriteError, WriteOp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An embedded, file-backed `DocumentStore`. One SQLite table per
/// collection, `(id TEXT PRIMARY KEY, doc TEXT NOT NULL)`.
pub struct SqliteHubStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteHubStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(rusqlite::Connection::open_in_memory()?)),
        })
    }

    fn table(collection: &str) -> String {
        // Collection names are our own identifiers (source ids, plugin
        // ids, ...); sanitize defensively rather than trust them as SQL.
        let sanitized: String = collection
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("col_{sanitized}")
    }

    fn ensure_table(conn: &rusqlite::Connection, collection: &str) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
                Self::table(collection)
            ),
            [],
        )?;
        Ok(())
    }

    async fn with_conn<T: Send + 'static>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
    ) -> anyhow::Result<T> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("hubdb sqlite mutex poisoned");
            f(&guard)
        })
        .await?
    }
}

fn row_to_doc(doc_json: String) -> anyhow::Result<Document> {
    Ok(serde_json::from_str(&doc_json)?)
}

#[async_trait]
impl hub_models::DocumentStore for SqliteHubStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> anyhow::Result<Option<Document>> {
        let rows = self.find(collection, filter).await?;
        Ok(rows.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> anyhow::Result<Vec<Document>> {
        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_conn(move |conn| {
            Self::ensure_table(conn, &collection)?;
            let mut stmt = conn.prepare(&format!("SELECT doc FROM {}", Self::table(&collection)))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut docs = Vec::new();
            for raw in rows {
                let doc = row_to_doc(raw)?;
                if filter.matches(&doc) {
                    docs.push(doc);
                }
            }
            Ok(docs)
        })
        .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> anyhow::Result<BulkWriteReport> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            Self::ensure_table(conn, &collection)?;
            let mut report = BulkWriteReport::default();
            for doc in docs {
                let Some(id) = hub_models::document::doc_id(&doc) else {
                    report.write_errors.push(WriteError {
                        id: String::new(),
                        message: "document missing string _id".to_string(),
                    });
                    continue;
                };
                let serialized = serde_json::to_string(&doc)?;
                let res = conn.execute(
                    &format!(
                        "INSERT INTO {} (id, doc) VALUES (?1, ?2)",
                        Self::table(&collection)
                    ),
                    rusqlite::params![id, serialized],
                );
                match res {
                    Ok(_) => report.n_inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        report.write_errors.push(WriteError {
                            id,
                            message: "duplicate key".to_string(),
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(report)
        })
        .await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
    ) -> anyhow::Result<BulkWriteReport> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            Self::ensure_table(conn, &collection)?;
            let table = Self::table(&collection);
            let mut report = BulkWriteReport::default();
            for op in ops {
                match op {
                    WriteOp::InsertOne(doc) => {
                        let Some(id) = hub_models::document::doc_id(&doc) else {
                            report.write_errors.push(WriteError {
                                id: String::new(),
                                message: "document missing string _id".to_string(),
                            });
                            continue;
                        };
                        let serialized = serde_json::to_string(&doc)?;
                        match conn.execute(
                            &format!("INSERT INTO {table} (id, doc) VALUES (?1, ?2)"),
                            rusqlite::params![id, serialized],
                        ) {
                            Ok(_) => report.n_inserted += 1,
                            Err(rusqlite::Error::SqliteFailure(e, _))
                                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                            {
                                report.write_errors.push(WriteError {
                                    id,
                                    message: "duplicate key".to_string(),
                                });
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    WriteOp::ReplaceOne { id, doc } => {
                        let serialized = serde_json::to_string(&doc)?;
                        let n = conn.execute(
                            &format!("UPDATE {table} SET doc = ?2 WHERE id = ?1"),
                            rusqlite::params![id, serialized],
                        )?;
                        if n == 0 {
                            conn.execute(
                                &format!("INSERT INTO {table} (id, doc) VALUES (?1, ?2)"),
                                rusqlite::params![id, serialized],
                            )?;
                            report.n_inserted += 1;
                        } else {
                            report.n_updated += 1;
                        }
                    }
                    WriteOp::UpdateOne { id, mutation } => {
                        let existing: Option<String> = conn
                            .query_row(
                                &format!("SELECT doc FROM {table} WHERE id = ?1"),
                                [&id],
                                |row| row.get(0),
                            )
                            .ok();
                        let mut doc = match existing {
                            Some(raw) => row_to_doc(raw)?,
                            None => {
                                let mut d = Document::new();
                                d.insert("_id".into(), serde_json::Value::String(id.clone()));
                                d
                            }
                        };
                        mutation.apply(&mut doc);
                        let serialized = serde_json::to_string(&doc)?;
                        conn.execute(
                            &format!(
                                "INSERT INTO {table} (id, doc) VALUES (?1, ?2)
                                 ON CONFLICT(id) DO UPDATE SET doc = excluded.doc"
                            ),
                            rusqlite::params![id, serialized],
                        )?;
                        report.n_updated += 1;
                    }
                    WriteOp::DeleteOne { id } => {
                        let n = conn.execute(
                            &format!("DELETE FROM {table} WHERE id = ?1"),
                            [&id],
                        )?;
                        report.n_deleted += n as u64;
                    }
                }
            }
            Ok(report)
        })
        .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        upsert: bool,
    ) -> anyhow::Result<BulkWriteReport> {
        let existing = self.find(collection, filter).await?;
        if existing.is_empty() && !upsert {
            return Ok(BulkWriteReport::default());
        }
        if existing.is_empty() {
            let id = filter
                .id_in
                .as_ref()
                .and_then(|ids| ids.first())
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            return self
                .bulk_write(
                    collection,
                    vec![WriteOp::UpdateOne {
                        id,
                        mutation: mutation.clone(),
                    }],
                )
                .await;
        }
        let ops = existing
            .into_iter()
            .filter_map(|d| hub_models::document::doc_id(&d))
            .map(|id| WriteOp::UpdateOne {
                id,
                mutation: mutation.clone(),
            })
            .collect();
        self.bulk_write(collection, ops).await
    }

    async fn rename(&self, from: &str, to: &str, drop_target: bool) -> anyhow::Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.with_conn(move |conn| {
            Self::ensure_table(conn, &from)?;
            if drop_target {
                conn.execute(&format!("DROP TABLE IF EXISTS {}", Self::table(&to)), [])?;
            }
            conn.execute(
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    Self::table(&from),
                    Self::table(&to)
                ),
                [],
            )?;
            Ok(())
        })
        .await
    }

    async fn drop(&self, collection: &str) -> anyhow::Result<()> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            conn.execute(&format!("DROP TABLE IF EXISTS {}", Self::table(&collection)), [])?;
            Ok(())
        })
        .await
    }

    async fn list_collections(&self) -> anyhow::Result<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'col_%'")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names
                .into_iter()
                .map(|n| n.strip_prefix("col_").unwrap_or(&n).to_string())
                .collect())
        })
        .await
    }

    async fn find_ids_page(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            Self::ensure_table(conn, &collection)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {} ORDER BY id LIMIT ?1 OFFSET ?2",
                Self::table(&collection)
            ))?;
            let ids = stmt
                .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }
}

/// A process-local in-memory store, for unit tests that don't need
/// restart durability.
#[derive(Default)]
pub struct InMemoryHubStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
}

impl InMemoryHubStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl hub_models::DocumentStore for InMemoryHubStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> anyhow::Result<Option<Document>> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> anyhow::Result<Vec<Document>> {
        let map = self.collections.lock().unwrap();
        Ok(map
            .get(collection)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> anyhow::Result<BulkWriteReport> {
        let mut map = self.collections.lock().unwrap();
        let col = map.entry(collection.to_string()).or_default();
        let mut report = BulkWriteReport::default();
        for doc in docs {
            let Some(id) = hub_models::document::doc_id(&doc) else {
                report.write_errors.push(WriteError {
                    id: String::new(),
                    message: "document missing string _id".to_string(),
                });
                continue;
            };
            if col.contains_key(&id) {
                report.write_errors.push(WriteError {
                    id,
                    message: "duplicate key".to_string(),
                });
            } else {
                col.insert(id, doc);
                report.n_inserted += 1;
            }
        }
        Ok(report)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
    ) -> anyhow::Result<BulkWriteReport> {
        let mut map = self.collections.lock().unwrap();
        let col = map.entry(collection.to_string()).or_default();
        let mut report = BulkWriteReport::default();
        for op in ops {
            match op {
                WriteOp::InsertOne(doc) => {
                    let Some(id) = hub_models::document::doc_id(&doc) else {
                        report.write_errors.push(WriteError {
                            id: String::new(),
                            message: "document missing string _id".to_string(),
                        });
                        continue;
                    };
                    if col.contains_key(&id) {
                        report.write_errors.push(WriteError {
                            id,
                            message: "duplicate key".to_string(),
                        });
                    } else {
                        col.insert(id, doc);
                        report.n_inserted += 1;
                    }
                }
                WriteOp::ReplaceOne { id, doc } => {
                    if col.insert(id, doc).is_some() {
                        report.n_updated += 1;
                    } else {
                        report.n_inserted += 1;
                    }
                }
                WriteOp::UpdateOne { id, mutation } => {
                    let doc = col.entry(id.clone()).or_insert_with(|| {
                        let mut d = Document::new();
                        d.insert("_id".into(), serde_json::Value::String(id.clone()));
                        d
                    });
                    mutation.apply(doc);
                    report.n_updated += 1;
                }
                WriteOp::DeleteOne { id } => {
                    if col.remove(&id).is_some() {
                        report.n_deleted += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        upsert: bool,
    ) -> anyhow::Result<BulkWriteReport> {
        let existing = self.find(collection, filter).await?;
        if existing.is_empty() {
            if !upsert {
                return Ok(BulkWriteReport::default());
            }
            let id = filter
                .id_in
                .as_ref()
                .and_then(|ids| ids.first())
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            return self
                .bulk_write(
                    collection,
                    vec![WriteOp::UpdateOne {
                        id,
                        mutation: mutation.clone(),
                    }],
                )
                .await;
        }
        let ops = existing
            .into_iter()
            .filter_map(|d| hub_models::document::doc_id(&d))
            .map(|id| WriteOp::UpdateOne {
                id,
                mutation: mutation.clone(),
            })
            .collect();
        self.bulk_write(collection, ops).await
    }

    async fn rename(&self, from: &str, to: &str, drop_target: bool) -> anyhow::Result<()> {
        let mut map = self.collections.lock().unwrap();
        let data = map.remove(from).unwrap_or_default();
        if !drop_target && map.contains_key(to) {
            anyhow::bail!("target collection {to} already exists");
        }
        map.insert(to.to_string(), data);
        Ok(())
    }

    async fn drop(&self, collection: &str) -> anyhow::Result<()> {
        self.collections.lock().unwrap().remove(collection);
        Ok(())
    }

    async fn list_collections(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.collections.lock().unwrap().keys().cloned().collect())
    }
}
