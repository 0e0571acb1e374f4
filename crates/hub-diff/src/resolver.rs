//! Addressing for diff/sync endpoints: `old`/`new` may be a bare
//! collection name, a `(scope, name)` pair, or a `(uri, db, collection)`
//! triple addressing an arbitrary external store.

use hub_models::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRef {
    Bare(String),
    Scoped { scope: Scope, name: String },
    External { uri: String, db: String, collection: String },
}

impl CollectionRef {
    /// The collection name portion, used for folder naming and as the
    /// key into the resolved store.
    pub fn collection_name(&self) -> &str {
        match self {
            CollectionRef::Bare(name) => name,
            CollectionRef::Scoped { name, .. } => name,
            CollectionRef::External { collection, .. } => collection,
        }
    }

    /// A filesystem-safe label identifying this endpoint, used to build
    /// the deterministic diff folder path.
    pub fn label(&self) -> String {
        match self {
            CollectionRef::Bare(name) => name.clone(),
            CollectionRef::Scoped { scope, name } => {
                let scope = match scope {
                    Scope::Source => "source",
                    Scope::Target => "target",
                };
                format!("{scope}_{name}")
            }
            CollectionRef::External { uri, db, collection } => {
                format!("ext_{}_{}_{}", sanitize(uri), sanitize(db), sanitize(collection))
            }
        }
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Resolves a [`CollectionRef`] to a concrete [`DocumentStore`]. The hub
/// core never hard-codes a Mongo/ES client; production wiring of
/// `Scoped`/`External` refs to real backends happens outside this
/// workspace, same as `hub_models::store`'s doc comment describes.
pub trait StoreResolver: Send + Sync {
    fn resolve(&self, r: &CollectionRef) -> anyhow::Result<Arc<dyn DocumentStore>>;
}

/// A resolver over a fixed set of named stores, sufficient for tests and
/// for single-process deployments where source and target collections
/// live in the same backend.
#[derive(Clone, Default)]
pub struct MapResolver {
    source: Option<Arc<dyn DocumentStore>>,
    target: Option<Arc<dyn DocumentStore>>,
    external: HashMap<String, Arc<dyn DocumentStore>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.source = Some(store);
        self
    }

    pub fn with_target(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.target = Some(store);
        self
    }

    pub fn with_external(mut self, uri: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        self.external.insert(uri.into(), store);
        self
    }
}

impl StoreResolver for MapResolver {
    fn resolve(&self, r: &CollectionRef) -> anyhow::Result<Arc<dyn DocumentStore>> {
        match r {
            CollectionRef::Bare(_) => self
                .source
                .clone()
                .or_else(|| self.target.clone())
                .ok_or_else(|| anyhow::anyhow!("no default store configured")),
            CollectionRef::Scoped { scope: Scope::Source, .. } => self
                .source
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no source store configured")),
            CollectionRef::Scoped { scope: Scope::Target, .. } => self
                .target
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no target store configured")),
            CollectionRef::External { uri, .. } => self
                .external
                .get(uri)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no external store registered for {uri:?}")),
        }
    }
}
