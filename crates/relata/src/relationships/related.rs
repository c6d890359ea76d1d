//! Resolved relation values and query parameters

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::kind::RelationKind;
use crate::entity::{Entity, EntityRef};

/// The value of a resolved relation.
///
/// Cloning is cheap and keeps pointing at the same entities, which is what
/// the cache hands back on every hit. Callers mutating shared entities
/// through interior mutability will see each other's changes.
#[derive(Clone)]
pub enum Related {
    /// `BelongsTo` / `HasOne`: the related entity, or `None` if there is none
    One(Option<EntityRef>),
    /// `HasMany`: the related entities in loader order
    Many(Arc<Vec<EntityRef>>),
}

impl Related {
    /// Explicit "no related value"
    pub fn none() -> Self {
        Related::One(None)
    }

    pub fn one(entity: EntityRef) -> Self {
        Related::One(Some(entity))
    }

    pub fn many(entities: Vec<EntityRef>) -> Self {
        Related::Many(Arc::new(entities))
    }

    /// The empty value of the right shape for `kind`
    pub fn empty_for(kind: RelationKind) -> Self {
        if kind.is_collection() {
            Related::many(Vec::new())
        } else {
            Related::none()
        }
    }

    /// The single related entity; `None` for sequences and absent values
    pub fn as_one(&self) -> Option<&EntityRef> {
        match self {
            Related::One(entity) => entity.as_ref(),
            Related::Many(_) => None,
        }
    }

    /// All related entities as a slice
    pub fn as_many(&self) -> &[EntityRef] {
        match self {
            Related::One(Some(entity)) => std::slice::from_ref(entity),
            Related::One(None) => &[],
            Related::Many(entities) => entities.as_slice(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef> {
        self.as_many().iter()
    }

    pub fn len(&self) -> usize {
        self.as_many().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_many().is_empty()
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Related::Many(_))
    }

    /// Whether both values are the very same object, not merely equal
    pub fn same_as(&self, other: &Related) -> bool {
        match (self, other) {
            (Related::One(Some(a)), Related::One(Some(b))) => Arc::ptr_eq(a, b),
            (Related::One(None), Related::One(None)) => true,
            (Related::Many(a), Related::Many(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Coerce a loader result into the shape `kind` promises
    pub(crate) fn into_shape(self, kind: RelationKind) -> Result<Self, ShapeMismatch> {
        match (kind.is_collection(), self) {
            (true, Related::Many(entities)) => Ok(Related::Many(entities)),
            (true, Related::One(entity)) => Ok(Related::many(entity.into_iter().collect())),
            (false, Related::One(entity)) => Ok(Related::One(entity)),
            (false, Related::Many(entities)) => match entities.len() {
                0 => Ok(Related::none()),
                1 => Ok(Related::One(entities.first().cloned())),
                count => Err(ShapeMismatch { kind, count }),
            },
        }
    }

    /// Keep the entities matching every filter of `params`
    pub(crate) fn filtered(&self, params: &QueryParams) -> Vec<EntityRef> {
        self.iter()
            .filter(|entity| params.matches(&***entity))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::One(entity) => f.debug_tuple("One").field(entity).finish(),
            Related::Many(entities) => f.debug_tuple("Many").field(&entities.as_slice()).finish(),
        }
    }
}

/// A loader returned several entities for a single-valued relation
#[derive(Debug, Error)]
#[error("loader returned {count} values for a single-valued {kind:?} relation")]
pub struct ShapeMismatch {
    pub kind: RelationKind,
    pub count: usize,
}

/// Parameters of a parameterized relation access.
///
/// Positional `args` are passed through to the query object untouched;
/// keyword `filters` are also understood by the in-memory fallback, which
/// keeps entities whose field equals the filter value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub args: Vec<Value>,
    pub filters: Map<String, Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a keyword filter
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn has_args(&self) -> bool {
        !self.args.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.filters.is_empty()
    }

    /// Whether `entity` satisfies every keyword filter
    pub fn matches(&self, entity: &dyn Entity) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| entity.field(field).as_ref() == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::registry::TypeRegistry;
    use serde_json::json;

    fn books(count: usize) -> Vec<EntityRef> {
        let registry = TypeRegistry::with_defaults();
        let book = registry.define("library", "Book", &["id", "author_id", "genre"]);
        (0..count)
            .map(|i| {
                Record::new(&book, [("id", json!(i)), ("genre", json!(if i % 2 == 0 { "sf" } else { "crime" }))])
                    .into_ref()
            })
            .collect()
    }

    #[test]
    fn test_shape_for_collections() {
        let one = Related::one(books(1).remove(0));
        let shaped = one.into_shape(RelationKind::HasMany).unwrap();
        assert!(shaped.is_many());
        assert_eq!(shaped.len(), 1);

        let none = Related::none().into_shape(RelationKind::HasMany).unwrap();
        assert!(none.is_many());
        assert!(none.is_empty());
    }

    #[test]
    fn test_shape_for_single_values() {
        let single = Related::many(books(1)).into_shape(RelationKind::BelongsTo).unwrap();
        assert!(single.as_one().is_some());

        let empty = Related::many(Vec::new()).into_shape(RelationKind::HasOne).unwrap();
        assert!(empty.as_one().is_none());
        assert!(!empty.is_many());

        let err = Related::many(books(3)).into_shape(RelationKind::HasOne).unwrap_err();
        assert_eq!(err.count, 3);
    }

    #[test]
    fn test_same_as_is_identity() {
        let entities = books(2);
        let a = Related::many(entities.clone());
        let b = a.clone();
        let c = Related::many(entities);

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(Related::none().same_as(&Related::none()));
    }

    #[test]
    fn test_filter_params() {
        let all = Related::many(books(4));
        let params = QueryParams::new().filter("genre", "sf");

        let matching = all.filtered(&params);
        assert_eq!(matching.len(), 2);
        assert!(matching.iter().all(|e| e.field("genre") == Some(json!("sf"))));

        assert_eq!(all.filtered(&QueryParams::new()).len(), 4);
    }
}
