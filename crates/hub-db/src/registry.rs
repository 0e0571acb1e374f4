//! Typed accessors over the generic [`hub_models::DocumentStore`] engine,
//! for HubDB's registered collections.

use crate::collections;
use hub_models::{BuildConfig, DocumentStore, Filter, PluginRecord, Source, WriteOp};
use std::sync::Arc;

#[derive(Clone)]
pub struct HubDb {
    store: Arc<dyn DocumentStore>,
}

impl HubDb {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ---- src_dump ------------------------------------------------------

    pub async fn get_source(&self, id: &str) -> anyhow::Result<Option<Source>> {
        self.get_typed(collections::SRC_DUMP, id).await
    }

    pub async fn list_sources(&self) -> anyhow::Result<Vec<Source>> {
        self.list_typed(collections::SRC_DUMP).await
    }

    pub async fn put_source(&self, source: &Source) -> anyhow::Result<()> {
        self.replace_typed(collections::SRC_DUMP, &source.id, source)
            .await
    }

    pub async fn remove_source(&self, id: &str) -> anyhow::Result<()> {
        self.store
            .bulk_write(
                collections::SRC_DUMP,
                vec![WriteOp::DeleteOne { id: id.to_string() }],
            )
            .await?;
        Ok(())
    }

    // ---- src_master ------------------------------------------------------

    /// Fetches a source's master document as a raw JSON object; its shape
    /// (`{name, timestamp, mapping?, src_meta?, id_type?}`) is owned by
    /// the uploader, not HubDB itself.
    pub async fn get_master(&self, source_id: &str) -> anyhow::Result<Option<hub_models::Document>> {
        self.store
            .find_one(collections::SRC_MASTER, &Filter::by_id(source_id))
            .await
    }

    pub async fn put_master(&self, source_id: &str, mut doc: hub_models::Document) -> anyhow::Result<()> {
        doc.insert("_id".into(), serde_json::Value::String(source_id.to_string()));
        self.store
            .bulk_write(
                collections::SRC_MASTER,
                vec![WriteOp::ReplaceOne {
                    id: source_id.to_string(),
                    doc,
                }],
            )
            .await?;
        Ok(())
    }

    // ---- src_build -------------------------------------------------------

    pub async fn get_build_config(&self, name: &str) -> anyhow::Result<Option<BuildConfig>> {
        self.get_typed(collections::SRC_BUILD, name).await
    }

    pub async fn list_build_configs(&self) -> anyhow::Result<Vec<BuildConfig>> {
        self.list_typed(collections::SRC_BUILD).await
    }

    pub async fn put_build_config(&self, config: &BuildConfig) -> anyhow::Result<()> {
        self.replace_typed(collections::SRC_BUILD, &config.name, config)
            .await
    }

    // ---- data_plugin -----------------------------------------------------

    pub async fn get_plugin(&self, id: &str) -> anyhow::Result<Option<PluginRecord>> {
        self.get_typed(collections::DATA_PLUGIN, id).await
    }

    pub async fn list_plugins(&self) -> anyhow::Result<Vec<PluginRecord>> {
        self.list_typed(collections::DATA_PLUGIN).await
    }

    pub async fn register_plugin(&self, plugin: &PluginRecord) -> anyhow::Result<()> {
        self.replace_typed(collections::DATA_PLUGIN, &plugin.id, plugin)
            .await
    }

    /// Atomically renames a plugin (and, by convention, its source/state
    /// records which share the same id): insert under the new id, then
    /// remove the old.
    pub async fn rename_plugin(&self, old_id: &str, new_id: &str) -> anyhow::Result<()> {
        tracing::info!(old_id, new_id, "renaming plugin");
        let Some(mut plugin) = self.get_plugin(old_id).await? else {
            anyhow::bail!("no such plugin: {old_id}");
        };
        plugin.id = new_id.to_string();
        self.register_plugin(&plugin).await?;
        self.store
            .bulk_write(
                collections::DATA_PLUGIN,
                vec![WriteOp::DeleteOne {
                    id: old_id.to_string(),
                }],
            )
            .await?;

        if let Some(mut source) = self.get_source(old_id).await? {
            source.id = new_id.to_string();
            self.put_source(&source).await?;
            self.remove_source(old_id).await?;
        }
        Ok(())
    }

    // ---- generic_config ----------------------------------------------

    pub async fn get_config(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let doc = self
            .store
            .find_one(collections::GENERIC_CONFIG, &Filter::by_id(key))
            .await?;
        Ok(doc.map(serde_json::Value::Object))
    }

    pub async fn set_config(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut obj = value.as_object().cloned().unwrap_or_default();
        obj.insert("_id".into(), serde_json::Value::String(key.to_string()));
        self.store
            .bulk_write(
                collections::GENERIC_CONFIG,
                vec![WriteOp::ReplaceOne {
                    id: key.to_string(),
                    doc: obj,
                }],
            )
            .await?;
        Ok(())
    }

    // ---- command_history / events --------------------------------------

    /// Records an event against the registered `command_history`/`events`
    /// collections.
    pub async fn append_event(&self, kind: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let mut doc = payload.as_object().cloned().unwrap_or_default();
        doc.insert(
            "_id".into(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
        doc.insert("kind".into(), serde_json::Value::String(kind.to_string()));
        doc.insert(
            "at".into(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        self.store.insert_many(collections::EVENTS, vec![doc]).await?;
        Ok(())
    }

    pub async fn append_command(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut doc = serde_json::Map::new();
        doc.insert(
            "_id".into(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
        doc.insert("command".into(), serde_json::Value::String(command.to_string()));
        doc.insert("args".into(), args);
        doc.insert(
            "at".into(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        self.store
            .insert_many(collections::COMMAND_HISTORY, vec![doc])
            .await?;
        Ok(())
    }

    // ---- generic typed helpers ------------------------------------------

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> anyhow::Result<Option<T>> {
        match self.store.find_one(collection, &Filter::by_id(id)).await? {
            Some(doc) => Ok(Some(serde_json::from_value(serde_json::Value::Object(doc))?)),
            None => Ok(None),
        }
    }

    async fn list_typed<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
    ) -> anyhow::Result<Vec<T>> {
        let docs = self.store.find(collection, &Filter::all()).await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(serde_json::Value::Object(doc))?))
            .collect()
    }

    async fn replace_typed<T: serde::Serialize>(
        &self,
        collection: &str,
        id: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let mut doc = serde_json::to_value(value)?
            .as_object()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("expected object"))?;
        doc.insert("_id".into(), serde_json::Value::String(id.to_string()));
        self.store
            .bulk_write(
                collection,
                vec![WriteOp::ReplaceOne {
                    id: id.to_string(),
                    doc,
                }],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryHubStore;

    fn db() -> HubDb {
        HubDb::new(Arc::new(InMemoryHubStore::new()))
    }

    #[tokio::test]
    async fn round_trips_a_source() {
        let db = db();
        let source = Source::new("demo");
        db.put_source(&source).await.unwrap();
        let fetched = db.get_source("demo").await.unwrap().unwrap();
        assert_eq!(fetched.id, "demo");
    }

    #[tokio::test]
    async fn round_trips_a_master_doc() {
        let db = db();
        let doc: hub_models::Document =
            serde_json::json!({"name": "demo", "timestamp": "2024-01-01"})
                .as_object()
                .unwrap()
                .clone();
        db.put_master("demo", doc).await.unwrap();
        let fetched = db.get_master("demo").await.unwrap().unwrap();
        assert_eq!(fetched["name"], serde_json::json!("demo"));
    }

    #[tokio::test]
    async fn rename_plugin_moves_id_atomically() {
        let db = db();
        db.register_plugin(&PluginRecord::local("tmp_id", "/data/tmp_id"))
            .await
            .unwrap();
        db.rename_plugin("tmp_id", "demo").await.unwrap();
        assert!(db.get_plugin("tmp_id").await.unwrap().is_none());
        assert!(db.get_plugin("demo").await.unwrap().is_some());
    }
}
