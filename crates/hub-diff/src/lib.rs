//! Differ & syncer: computes JSON-patch deltas between a collection's
//! two states, frames them as `HDF1` batch files, and replays them
//! idempotently against a document store or search index.

pub mod differ;
mod framing;
pub mod resolver;
pub mod snapshot;
pub mod syncer;

pub use differ::{Differ, Error as DiffError, Mode, Step};
pub use framing::{decode as decode_frame, encode as encode_frame, FrameError};
pub use resolver::{CollectionRef, MapResolver, Scope, StoreResolver};
pub use snapshot::{Error as SnapshotError, JobStatus as SnapshotJobStatus, SnapshotPublisher, Step as SnapshotStep};
pub use syncer::{Error as SyncError, SyncStats, SyncTarget, Syncer};

#[cfg(test)]
mod tests {
    use super::*;
    use hub_db::InMemoryHubStore;
    use hub_models::diff::DiffVariant;
    use hub_models::{Document, DocumentStore};
    use serde_json::json;
    use std::sync::Arc;

    fn doc(id: &str, v: i64) -> Document {
        json!({"_id": id, "v": v}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn diff_and_sync_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let old_store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let new_store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());

        old_store.insert_many("genes", vec![doc("a", 1), doc("b", 2)]).await.unwrap();
        new_store.insert_many("genes", vec![doc("a", 99), doc("c", 3)]).await.unwrap();

        let resolver = Arc::new(
            MapResolver::new()
                .with_source(old_store.clone())
                .with_target(new_store.clone()),
        );
        let differ = Differ::new(resolver.clone(), tmp.path());

        let old_ref = CollectionRef::Scoped { scope: Scope::Source, name: "genes".into() };
        let new_ref = CollectionRef::Scoped { scope: Scope::Target, name: "genes".into() };

        let metadata = differ
            .diff(
                old_ref.clone(),
                new_ref.clone(),
                10,
                &[Step::Count, Step::Content],
                Mode::None,
                &[],
                DiffVariant::SelfContained,
            )
            .await
            .unwrap();
        assert_eq!(metadata.total_adds(), 1); // "c"
        assert_eq!(metadata.total_updates(), 1); // "a" changed
        assert_eq!(metadata.total_deletes(), 1); // "b" gone

        let syncer = Syncer::new(resolver, tmp.path());
        let target = SyncTarget::Store {
            name: "genes".into(),
            store: old_store.clone(),
        };
        let stats = syncer
            .sync("doc_store", &target, old_ref.clone(), new_ref.clone(), 10, None, false)
            .await
            .unwrap();
        assert_eq!(stats.applied, 3);

        let a = old_store.find_one("genes", &hub_models::Filter::by_id("a")).await.unwrap().unwrap();
        assert_eq!(a["v"], json!(99));
        assert!(old_store.find_one("genes", &hub_models::Filter::by_id("b")).await.unwrap().is_none());
        assert!(old_store.find_one("genes", &hub_models::Filter::by_id("c")).await.unwrap().is_some());

        // Idempotent retry: nothing left to apply without force.
        let stats2 = syncer
            .sync("doc_store", &target, old_ref, new_ref, 10, None, false)
            .await
            .unwrap();
        assert_eq!(stats2.applied, 0);
    }

    #[test]
    fn collection_ref_labels_are_deterministic() {
        let a = CollectionRef::Scoped { scope: Scope::Source, name: "genes".into() };
        let b = CollectionRef::Scoped { scope: Scope::Source, name: "genes".into() };
        assert_eq!(a.label(), b.label());
        assert_eq!(a.label(), "source_genes");
    }
}
