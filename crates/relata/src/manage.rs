//! Per-instance relation access

use std::sync::Arc;

use async_trait::async_trait;
use relata_cache::CachePrefix;

use crate::entity::Entity;
use crate::error::RelationResult;
use crate::relationships::{QueryParams, Related, RelationDescriptor};

/// Relation access for entity instances.
///
/// Implemented for every [`Entity`] and for `dyn Entity`, so both typed
/// entities and [`crate::EntityRef`] handles can call it directly.
///
/// ```rust,no_run
/// # async fn demo(author: relata::EntityRef) -> relata::RelationResult<()> {
/// use relata::{QueryParams, RelationManageable};
///
/// let books = author.related("books").await?;
/// let recent = author.related_with("books", &QueryParams::new().filter("year", 2024)).await?;
/// author.clear_relation_cache(Some("books"))?;
/// # let _ = (books, recent);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait RelationManageable: Send + Sync {
    fn as_entity(&self) -> &dyn Entity;

    /// Most specific relation with this name for the instance's runtime type
    fn get_relation(&self, name: &str) -> RelationResult<Arc<RelationDescriptor>> {
        self.as_entity().entity_type().get_relation(name)
    }

    fn relation_names(&self) -> Vec<String> {
        self.as_entity().entity_type().relation_names()
    }

    /// Resolve a relation, served from cache while the entry is live
    async fn related(&self, name: &str) -> RelationResult<Related> {
        let relation = self.get_relation(name)?;
        relation.resolve(self.as_entity()).await
    }

    /// Resolve a relation with query parameters, bypassing the cache
    async fn related_with(&self, name: &str, params: &QueryParams) -> RelationResult<Related> {
        let relation = self.get_relation(name)?;
        relation.resolve_with_params(self.as_entity(), params).await
    }

    /// Drop cached values for one relation, or for all of them with `None`.
    ///
    /// Returns how many entries were removed.
    fn clear_relation_cache(&self, name: Option<&str>) -> RelationResult<usize> {
        let entity = self.as_entity();
        match name {
            Some(name) => {
                let relation = self.get_relation(name)?;
                Ok(usize::from(relation.clear_cache(entity)))
            }
            None => Ok(entity
                .entity_type()
                .relation_cache()
                .clear(&CachePrefix::Owner(entity.instance_id()))),
        }
    }
}

impl<E: Entity> RelationManageable for E {
    fn as_entity(&self) -> &dyn Entity {
        self
    }
}

impl RelationManageable for dyn Entity {
    fn as_entity(&self) -> &dyn Entity {
        self
    }
}
