//! Effective Schema Cache
//!
//! Process-wide cache of assembled schemas, keyed by type and view:
//!
//! - **Raw**: the type's own effective schema
//! - **Decorated**: the type plus the effective schemas of every child type
//!   its Table fields reference
//!
//! # Cache Invalidation
//!
//! Invalidation is explicit and synchronous. Every write to a base definition,
//! Custom Field or Property Setter invalidates the affected type before the
//! write returns. Invalidating a type also drops every Decorated entry that
//! embeds it as a child, so a parent never serves a stale child schema.
//!
//! Fills are guarded by a generation counter: a loader reads
//! [`SchemaCache::generation`] before touching the database and hands it back
//! on insert. If any invalidation happened in between, the insert is dropped,
//! so a schema read before a committed change is never cached after it.

use crate::services::schema_assembler::{EffectiveSchema, SchemaBundle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which form of a type's schema an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaView {
    Raw,
    Decorated,
}

/// Shared cache handle; clones share the same maps
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    raw: Arc<RwLock<HashMap<String, Arc<EffectiveSchema>>>>,
    decorated: Arc<RwLock<HashMap<String, Arc<SchemaBundle>>>>,
    generation: Arc<AtomicU64>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_raw(&self, doctype: &str) -> Option<Arc<EffectiveSchema>> {
        let hit = self.raw.read().await.get(doctype).cloned();
        tracing::debug!(
            "Schema cache {} for {} (raw)",
            if hit.is_some() { "hit" } else { "miss" },
            doctype
        );
        hit
    }

    /// Current invalidation generation; read it before loading a schema
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache a schema loaded at `generation`; returns false if it went stale
    pub async fn insert_raw(&self, schema: Arc<EffectiveSchema>, generation: u64) -> bool {
        let mut raw = self.raw.write().await;
        if self.generation() != generation {
            tracing::debug!("Dropping stale schema fill for {}", schema.doctype.name);
            return false;
        }
        raw.insert(schema.doctype.name.clone(), schema);
        true
    }

    pub async fn get_decorated(&self, doctype: &str) -> Option<Arc<SchemaBundle>> {
        let hit = self.decorated.read().await.get(doctype).cloned();
        tracing::debug!(
            "Schema cache {} for {} (decorated)",
            if hit.is_some() { "hit" } else { "miss" },
            doctype
        );
        hit
    }

    pub async fn insert_decorated(&self, bundle: Arc<SchemaBundle>, generation: u64) -> bool {
        let mut decorated = self.decorated.write().await;
        if self.generation() != generation {
            tracing::debug!("Dropping stale bundle fill for {}", bundle.parent.doctype.name);
            return false;
        }
        decorated.insert(bundle.parent.doctype.name.clone(), bundle);
        true
    }

    /// Whether an entry is cached for the type and view
    pub async fn contains(&self, doctype: &str, view: SchemaView) -> bool {
        match view {
            SchemaView::Raw => self.raw.read().await.contains_key(doctype),
            SchemaView::Decorated => self.decorated.read().await.contains_key(doctype),
        }
    }

    /// Drop every entry of the type, including Decorated entries embedding it
    pub async fn invalidate(&self, doctype: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.raw.write().await.remove(doctype);
        self.decorated
            .write()
            .await
            .retain(|key, bundle| key != doctype && !bundle.children.contains_key(doctype));
        tracing::debug!("Invalidated schema cache for {}", doctype);
    }

    pub async fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.raw.write().await.clear();
        self.decorated.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocType;

    fn effective(name: &str) -> Arc<EffectiveSchema> {
        Arc::new(EffectiveSchema {
            doctype: DocType::new(name),
            diagnostics: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_raw_entries() {
        let cache = SchemaCache::new();
        assert!(cache.get_raw("Task").await.is_none());

        cache.insert_raw(effective("Task"), cache.generation()).await;
        assert!(cache.contains("Task", SchemaView::Raw).await);
        assert_eq!(cache.get_raw("Task").await.unwrap().doctype.name, "Task");

        cache.invalidate("Task").await;
        assert!(cache.get_raw("Task").await.is_none());
    }

    #[tokio::test]
    async fn test_child_invalidation_drops_decorated_parent() {
        let cache = SchemaCache::new();
        let mut children = HashMap::new();
        children.insert("Order Item".to_string(), effective("Order Item"));

        let generation = cache.generation();
        cache
            .insert_decorated(
                Arc::new(SchemaBundle {
                    parent: effective("Order"),
                    children,
                }),
                generation,
            )
            .await;
        cache.insert_raw(effective("Order"), cache.generation()).await;
        assert!(cache.contains("Order", SchemaView::Decorated).await);

        cache.invalidate("Order Item").await;

        assert!(!cache.contains("Order", SchemaView::Decorated).await);
        assert!(cache.contains("Order", SchemaView::Raw).await);
    }

    #[tokio::test]
    async fn test_fill_after_invalidation_is_dropped() {
        let cache = SchemaCache::new();

        // loader reads the generation, then a writer invalidates mid-load
        let seen = cache.generation();
        cache.invalidate("Task").await;

        assert!(!cache.insert_raw(effective("Task"), seen).await);
        assert!(cache.get_raw("Task").await.is_none());

        let fresh = cache.generation();
        assert!(cache.insert_raw(effective("Task"), fresh).await);
        assert!(cache.contains("Task", SchemaView::Raw).await);
    }

    #[test]
    fn test_clones_share_entries() {
        tokio_test::block_on(async {
            let cache = SchemaCache::new();
            let other = cache.clone();
            cache.insert_raw(effective("Task"), cache.generation()).await;
            assert!(other.get_raw("Task").await.is_some());

            other.clear().await;
            assert!(cache.get_raw("Task").await.is_none());
        });
    }
}
