//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relata::{Entity, EntityRef, EntityType, LoadResult, Record, RelationLoader, TypeRegistry};
use serde_json::{json, Value};

/// Loader that counts its invocations and builds results synchronously
pub struct CountingLoader<F> {
    produce: F,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl<F> RelationLoader for CountingLoader<F>
where
    F: Fn(&dyn Entity) -> LoadResult + Send + Sync,
{
    async fn load(&self, owner: &dyn Entity) -> LoadResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        (self.produce)(owner)
    }
}

/// Build a counting loader plus a handle on its call counter
pub fn counting<F>(produce: F) -> (CountingLoader<F>, Arc<AtomicUsize>)
where
    F: Fn(&dyn Entity) -> LoadResult + Send + Sync,
{
    let calls = Arc::new(AtomicUsize::new(0));
    (
        CountingLoader {
            produce,
            calls: calls.clone(),
        },
        calls,
    )
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Author/Book types without any relations declared yet
pub struct Library {
    pub registry: Arc<TypeRegistry>,
    pub author: Arc<EntityType>,
    pub book: Arc<EntityType>,
}

pub fn library() -> Library {
    let registry = TypeRegistry::with_defaults();
    let author = registry.define("library", "Author", &["id", "name"]);
    let book = registry.define("library", "Book", &["id", "author_id", "genre"]);
    Library {
        registry,
        author,
        book,
    }
}

pub fn author(ty: &Arc<EntityType>, id: i64) -> Record {
    Record::new(ty, [("id", json!(id)), ("name", json!(format!("author-{}", id)))])
}

pub fn book(ty: &Arc<EntityType>, id: i64, author_id: &Value, genre: &str) -> EntityRef {
    Record::new(
        ty,
        [("id", json!(id)), ("author_id", author_id.clone()), ("genre", json!(genre))],
    )
    .into_ref()
}

pub fn ids(entities: &[EntityRef]) -> Vec<Value> {
    entities.iter().map(|e| e.field("id").unwrap_or_default()).collect()
}
