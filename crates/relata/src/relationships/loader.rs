//! Relation capabilities - loaders, queries and validators
//!
//! These are the only seams through which data enters a relation. Any I/O,
//! timeouts or retries belong inside the implementations.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::related::{QueryParams, Related};
use crate::entity::Entity;
use crate::error::BoxError;
use crate::model::EntityType;

/// Result of a loader or query invocation
pub type LoadResult = Result<Related, BoxError>;

/// Loads the related value(s) for one owning instance
#[async_trait]
pub trait RelationLoader: Send + Sync {
    /// Load the relation; the full owner is available, not just its key
    async fn load(&self, owner: &dyn Entity) -> LoadResult;
}

/// A parameterized query for one relation access
#[async_trait]
pub trait RelationQuery: Send + Sync {
    /// Run the query. `owner` is `None` for type-level queries.
    async fn execute(&self, owner: Option<&dyn Entity>, params: &QueryParams) -> LoadResult;
}

/// Produces a fresh query object for every parameterized access
pub trait QueryFactory: Send + Sync {
    fn create(&self) -> Box<dyn RelationQuery>;
}

/// Extra structural check run once the target type is known
pub trait RelationValidator: Send + Sync {
    fn validate(&self, owner: &EntityType, target: &EntityType) -> Result<(), BoxError>;
}

impl<F> RelationValidator for F
where
    F: Fn(&EntityType, &EntityType) -> Result<(), BoxError> + Send + Sync,
{
    fn validate(&self, owner: &EntityType, target: &EntityType) -> Result<(), BoxError> {
        self(owner, target)
    }
}

/// Loader backed by a closure returning a boxed future.
///
/// The closure runs synchronously with the owner borrowed, so it should pull
/// out whatever it needs (usually a key field) before building the future.
pub struct LoaderFn<F>(F);

/// Build a [`RelationLoader`] from a closure
pub fn loader_fn<F>(f: F) -> LoaderFn<F>
where
    F: Fn(&dyn Entity) -> BoxFuture<'static, LoadResult> + Send + Sync,
{
    LoaderFn(f)
}

#[async_trait]
impl<F> RelationLoader for LoaderFn<F>
where
    F: Fn(&dyn Entity) -> BoxFuture<'static, LoadResult> + Send + Sync,
{
    async fn load(&self, owner: &dyn Entity) -> LoadResult {
        (self.0)(owner).await
    }
}

impl<F> fmt::Debug for LoaderFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoaderFn")
    }
}

/// Query backed by a closure; also acts as its own factory
pub struct QueryFn<F>(std::sync::Arc<F>);

/// Build a [`QueryFactory`] from a closure
pub fn query_fn<F>(f: F) -> QueryFn<F>
where
    F: Fn(Option<&dyn Entity>, &QueryParams) -> BoxFuture<'static, LoadResult> + Send + Sync + 'static,
{
    QueryFn(std::sync::Arc::new(f))
}

#[async_trait]
impl<F> RelationQuery for QueryFn<F>
where
    F: Fn(Option<&dyn Entity>, &QueryParams) -> BoxFuture<'static, LoadResult> + Send + Sync + 'static,
{
    async fn execute(&self, owner: Option<&dyn Entity>, params: &QueryParams) -> LoadResult {
        (self.0)(owner, params).await
    }
}

impl<F> QueryFactory for QueryFn<F>
where
    F: Fn(Option<&dyn Entity>, &QueryParams) -> BoxFuture<'static, LoadResult> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn RelationQuery> {
        Box::new(QueryFn(self.0.clone()))
    }
}

impl<F> fmt::Debug for QueryFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryFn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::registry::TypeRegistry;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loader_fn_sees_owner_fields() {
        let registry = TypeRegistry::with_defaults();
        let author = registry.define("library", "Author", &["id"]);
        let book = registry.define("library", "Book", &["id", "author_id"]);

        let loader = loader_fn(move |owner| {
            let author_id = owner.field("id");
            let book = book.clone();
            async move {
                let record = Record::new(&book, [("id", json!(10)), ("author_id", author_id.unwrap_or_default())]);
                Ok(Related::one(Arc::new(record)))
            }
            .boxed()
        });

        let owner = Record::new(&author, [("id", json!(3))]);
        let related = loader.load(&owner).await.unwrap();
        assert_eq!(related.as_one().unwrap().field("author_id"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_query_fn_creates_independent_queries() {
        let factory = query_fn(|owner, params| {
            let has_owner = owner.is_some();
            let args = params.args.len();
            async move {
                assert!(!has_owner);
                assert_eq!(args, 1);
                Ok(Related::many(Vec::new()))
            }
            .boxed()
        });

        let query = factory.create();
        let result = query.execute(None, &QueryParams::new().arg(1)).await.unwrap();
        assert!(result.is_many());
    }

    #[test]
    fn test_closure_validator() {
        let registry = TypeRegistry::with_defaults();
        let a = registry.define("m", "A", &["id"]);
        let b = registry.define("m", "B", &["id"]);

        let reject = |_: &EntityType, target: &EntityType| -> Result<(), BoxError> {
            Err(format!("{} is not allowed", target.qualified_name()).into())
        };
        let err = reject.validate(&a, &b).unwrap_err();
        assert_eq!(err.to_string(), "m.B is not allowed");
    }
}
