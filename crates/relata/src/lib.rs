//! # relata: relation resolution for plain entities
//!
//! Entity types declare typed associations (`BelongsTo`, `HasOne`,
//! `HasMany`) to each other without any database layer. Related values are
//! loaded on demand through caller-supplied loaders and cached per owning
//! instance under a TTL and size policy.
//!
//! - Targets are named by string and resolved on first access, so types may
//!   point at each other in any declaration order
//! - Subtypes inherit relations and may override them without disturbing the
//!   parent
//! - Parameterized access goes through a query factory and never touches the
//!   cache
//!
//! ```rust
//! use futures::FutureExt;
//! use relata::{loader_fn, Record, Related, Relation, RelationManageable, TypeRegistry};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> relata::RelationResult<()> {
//! let registry = TypeRegistry::with_defaults();
//! let author = registry.define("library", "Author", &["id", "name"]);
//! let book = registry.define("library", "Book", &["id", "author_id"]);
//!
//! let book_type = book.clone();
//! author.register_relation(
//!     "books",
//!     Relation::has_many("Book")
//!         .foreign_key("author_id")
//!         .inverse_of("author")
//!         .loader(loader_fn(move |owner| {
//!             let id = owner.field("id").unwrap_or_default();
//!             let book = book_type.clone();
//!             async move { Ok(Related::many(vec![Record::new(&book, [("id", json!(1)), ("author_id", id)]).into_ref()])) }
//!                 .boxed()
//!         })),
//! )?;
//! book.register_relation("author", Relation::belongs_to("Author").foreign_key("author_id").inverse_of("books"))?;
//! registry.validate_all()?;
//!
//! let ann = Record::new(&author, [("id", json!(1)), ("name", json!("Ann"))]);
//! let books = ann.related("books").await?;
//! assert_eq!(books.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod entity;
pub mod error;
pub mod manage;
pub mod model;
pub mod registry;
pub mod relationships;

pub use entity::{Entity, EntityRef, InstanceId, Record};
pub use error::{BoxError, ConfigViolation, RelationError, RelationResult};
pub use manage::RelationManageable;
pub use model::EntityType;
pub use registry::{RegistryStats, TypeRegistry};
pub use relationships::*;

pub use relata_cache::{CacheDefaults, CacheOptions, CachePolicy, CachePolicyBuilder, CacheStats};
