//! Relationships - declaration, validation and cached resolution

pub mod descriptor;
pub mod kind;
pub mod loader;
pub mod related;

pub use descriptor::{Relation, RelationCache, RelationDescriptor, RelationId};
pub use kind::RelationKind;
pub use loader::{
    loader_fn, query_fn, LoadResult, LoaderFn, QueryFactory, QueryFn, RelationLoader, RelationQuery,
    RelationValidator,
};
pub use related::{QueryParams, Related, ShapeMismatch};
