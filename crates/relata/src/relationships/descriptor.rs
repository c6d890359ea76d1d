//! Relation descriptors
//!
//! A [`Relation`] is an unregistered declaration. Registering it on an
//! [`EntityType`] produces a shared [`RelationDescriptor`], which checks its
//! own configuration, resolves its target type on first use and caches loaded
//! values per owning instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use relata_cache::{CacheKey, CacheOptions, CachePolicy, CachePrefix, CacheStore};
use tracing::{debug, warn};

use super::kind::RelationKind;
use super::loader::{LoadResult, QueryFactory, RelationLoader, RelationValidator};
use super::related::{QueryParams, Related};
use crate::entity::{Entity, InstanceId};
use crate::error::{BoxError, ConfigViolation, RelationError, RelationResult};
use crate::model::EntityType;
use crate::registry::TypeRegistry;

/// The store every relation of a registry caches into
pub type RelationCache = CacheStore<RelationId, InstanceId, Related>;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of a relation: the declaring type, the relation name and the
/// registration it came from.
///
/// A subtype overriding a relation gets its own identity, so the ancestor's
/// cache entries stay untouched. Registering the same name again also yields a
/// fresh identity, so a replaced descriptor never shares a cache scope with its
/// successor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationId {
    owner: Arc<str>,
    name: Arc<str>,
    generation: u64,
}

impl RelationId {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Qualified name of the declaring type
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Declaration of a relation, before it is registered on a type
pub struct Relation {
    kind: RelationKind,
    target: String,
    foreign_key: String,
    inverse_of: Option<String>,
    loader: Option<Arc<dyn RelationLoader>>,
    query_factory: Option<Arc<dyn QueryFactory>>,
    validator: Option<Arc<dyn RelationValidator>>,
    cache: CacheOptions,
}

impl Relation {
    fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: String::new(),
            inverse_of: None,
            loader: None,
            query_factory: None,
            validator: None,
            cache: CacheOptions::default(),
        }
    }

    /// The owner holds the foreign key and points at one target
    pub fn belongs_to(target: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, target)
    }

    /// One target points back at the owner
    pub fn has_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, target)
    }

    /// Many targets point back at the owner
    pub fn has_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, target)
    }

    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = field.into();
        self
    }

    /// Name of the paired relation on the target type
    pub fn inverse_of(mut self, relation: impl Into<String>) -> Self {
        self.inverse_of = Some(relation.into());
        self
    }

    pub fn loader(mut self, loader: impl RelationLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn query_factory(mut self, factory: impl QueryFactory + 'static) -> Self {
        self.query_factory = Some(Arc::new(factory));
        self
    }

    pub fn validator(mut self, validator: impl RelationValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Per-relation overrides of the registry's cache defaults
    pub fn cache(mut self, options: CacheOptions) -> Self {
        self.cache = options;
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("foreign_key", &self.foreign_key)
            .field("inverse_of", &self.inverse_of)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// A relation registered on an entity type
pub struct RelationDescriptor {
    id: RelationId,
    kind: RelationKind,
    foreign_key: String,
    inverse_of: Option<String>,
    target_ref: String,
    context_module: String,
    loader: Option<Arc<dyn RelationLoader>>,
    query_factory: Option<Arc<dyn QueryFactory>>,
    validator: Option<Arc<dyn RelationValidator>>,
    cache_options: CacheOptions,
    cache: Arc<RelationCache>,
    owner: Weak<EntityType>,
    registry: Weak<TypeRegistry>,
    target: OnceCell<Arc<EntityType>>,
}

impl RelationDescriptor {
    /// Build a descriptor, enforcing the rules that only need the owner
    pub(crate) fn new(
        owner: &Arc<EntityType>,
        name: &str,
        relation: Relation,
        cache: Arc<RelationCache>,
        registry: Weak<TypeRegistry>,
    ) -> RelationResult<Self> {
        let owner_name = owner.qualified_name();

        if name.trim().is_empty() {
            return Err(RelationError::config(owner_name, name, ConfigViolation::EmptyName));
        }
        if relation.foreign_key.trim().is_empty() {
            return Err(RelationError::config(owner_name, name, ConfigViolation::EmptyForeignKey));
        }
        if relation.kind.owner_holds_key() && !owner.has_field(&relation.foreign_key) {
            return Err(RelationError::config(
                owner_name,
                name,
                ConfigViolation::MissingForeignKey {
                    field: relation.foreign_key,
                    type_name: owner_name.to_string(),
                },
            ));
        }

        Ok(Self {
            id: RelationId::new(owner_name, name),
            kind: relation.kind,
            foreign_key: relation.foreign_key,
            inverse_of: relation.inverse_of,
            target_ref: relation.target,
            context_module: owner.module().to_string(),
            loader: relation.loader,
            query_factory: relation.query_factory,
            validator: relation.validator,
            cache_options: relation.cache,
            cache,
            owner: Arc::downgrade(owner),
            registry,
            target: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &RelationId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Qualified name of the type this relation was declared on
    pub fn owner_type_name(&self) -> &str {
        self.id.owner()
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn inverse_of(&self) -> Option<&str> {
        self.inverse_of.as_deref()
    }

    /// The target reference as declared, before resolution
    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    pub fn cache_options(&self) -> &CacheOptions {
        &self.cache_options
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn has_query_factory(&self) -> bool {
        self.query_factory.is_some()
    }

    /// Whether the target has been resolved and validated
    pub fn is_resolved(&self) -> bool {
        self.target.get().is_some()
    }

    /// Cache policy in force right now: overrides merged over live defaults
    pub fn effective_policy(&self) -> CachePolicy {
        self.cache.policy_for(&self.cache_options)
    }

    /// Key under which `instance`'s value of this relation is cached
    pub fn cache_key(&self, instance: &dyn Entity) -> CacheKey<RelationId, InstanceId> {
        CacheKey::new(self.id.clone(), instance.instance_id())
    }

    /// The resolved target type.
    ///
    /// The first successful call resolves the reference and runs every
    /// target-side check; the outcome is memoized. Failures are not, so a
    /// relation whose target shows up later becomes usable then.
    pub fn target_type(&self) -> RelationResult<Arc<EntityType>> {
        if let Some(target) = self.target.get() {
            return Ok(target.clone());
        }

        let target = self.lookup_target()?;
        self.check_target(&target)?;

        debug!(
            relation = %self.id,
            target = target.qualified_name(),
            "resolved relation target"
        );
        Ok(self.target.get_or_init(|| target).clone())
    }

    /// Run every structural check now instead of on first access
    pub fn validate(&self) -> RelationResult<()> {
        self.target_type().map(|_| ())
    }

    /// The target type without running target-side checks
    fn lookup_target(&self) -> RelationResult<Arc<EntityType>> {
        if let Some(target) = self.target.get() {
            return Ok(target.clone());
        }
        let registry = self.registry.upgrade().ok_or_else(|| RelationError::UnresolvedType {
            reference: self.target_ref.clone(),
            context: self.context_module.clone(),
            reason: "type registry has been dropped".to_string(),
        })?;
        registry.resolve(&self.target_ref, &self.context_module)
    }

    fn owner_type(&self) -> RelationResult<Arc<EntityType>> {
        self.owner.upgrade().ok_or_else(|| RelationError::UnresolvedType {
            reference: self.id.owner().to_string(),
            context: self.context_module.clone(),
            reason: "owning type is no longer alive".to_string(),
        })
    }

    /// Fails with `NotFound` once the owner's registration for this name has
    /// been replaced
    fn ensure_registered(&self) -> RelationResult<()> {
        let current = self.owner.upgrade().and_then(|owner| owner.own_relation(self.name()));
        match current {
            Some(current) if std::ptr::eq(Arc::as_ptr(&current), self) => Ok(()),
            _ => Err(RelationError::not_found(self.id.owner(), self.id.name())),
        }
    }

    fn config_error(&self, violation: ConfigViolation) -> RelationError {
        RelationError::config(self.id.owner(), self.id.name(), violation)
    }

    fn check_target(&self, target: &Arc<EntityType>) -> RelationResult<()> {
        if !self.kind.owner_holds_key() && !target.has_field(&self.foreign_key) {
            return Err(self.config_error(ConfigViolation::MissingForeignKey {
                field: self.foreign_key.clone(),
                type_name: target.qualified_name().to_string(),
            }));
        }

        if let Some(inverse_name) = &self.inverse_of {
            let inverse = target.find_relation(inverse_name).ok_or_else(|| {
                self.config_error(ConfigViolation::MissingInverse {
                    inverse: inverse_name.clone(),
                    target: target.qualified_name().to_string(),
                })
            })?;

            if !self.kind.pairs_with(inverse.kind()) {
                return Err(self.config_error(ConfigViolation::IncompatibleInverse {
                    kind: self.kind,
                    inverse: inverse_name.clone(),
                    inverse_kind: inverse.kind(),
                }));
            }

            if let Some(points_to) = inverse.inverse_of() {
                if points_to != self.name() {
                    return Err(self.config_error(ConfigViolation::InconsistentInverse {
                        target: target.qualified_name().to_string(),
                        inverse: inverse_name.clone(),
                        points_to: points_to.to_string(),
                    }));
                }
            }

            // the inverse must lead back to this type or one of its ancestors;
            // its own target-side checks are left to its first access
            let owner = self.owner_type()?;
            let inverse_target = inverse.lookup_target()?;
            if !owner.is_subtype_of(&inverse_target) {
                return Err(self.config_error(ConfigViolation::InverseTargetMismatch {
                    inverse: format!("{}.{}", target.qualified_name(), inverse_name),
                    points_at: inverse_target.qualified_name().to_string(),
                    owner: owner.qualified_name().to_string(),
                }));
            }
        }

        if let Some(validator) = &self.validator {
            let owner = self.owner_type()?;
            validator
                .validate(&owner, target)
                .map_err(|err| self.config_error(ConfigViolation::ValidatorRejected(err)))?;
        }

        Ok(())
    }

    /// Resolve the relation for `instance`, serving from cache when possible
    pub async fn resolve(&self, instance: &dyn Entity) -> RelationResult<Related> {
        self.ensure_registered()?;
        self.target_type()?;

        let policy = self.effective_policy();
        let key = self.cache_key(instance);
        if let Some(hit) = self.cache.get(&key, &policy) {
            return Ok(hit);
        }

        let Some(loader) = &self.loader else {
            debug!(relation = %self.id, "no loader configured, returning empty value");
            return Ok(Related::empty_for(self.kind));
        };

        debug!(relation = %self.id, instance = %instance.instance_id(), "loading relation");
        let value = self.shaped(loader.load(instance).await)?;
        self.cache.set(key, value.clone(), &policy);
        Ok(value)
    }

    /// Resolve with query parameters. Never reads or writes the cache.
    pub async fn resolve_with_params(&self, instance: &dyn Entity, params: &QueryParams) -> RelationResult<Related> {
        self.query(Some(instance), params).await
    }

    /// Run a parameterized query, optionally without an owning instance.
    ///
    /// Without a query factory the loader's full result is filtered in
    /// memory, which needs an instance and supports keyword filters only.
    pub async fn query(&self, instance: Option<&dyn Entity>, params: &QueryParams) -> RelationResult<Related> {
        self.target_type()?;

        if let Some(factory) = &self.query_factory {
            debug!(relation = %self.id, ?params, "running relation query");
            let query = factory.create();
            return self.shaped(query.execute(instance, params).await);
        }

        let Some(instance) = instance else {
            return Err(self.config_error(ConfigViolation::QueryUnsupported(
                "type-level queries need a query factory",
            )));
        };
        if params.has_args() {
            return Err(self.config_error(ConfigViolation::QueryUnsupported(
                "positional arguments need a query factory",
            )));
        }
        let Some(loader) = &self.loader else {
            return Ok(Related::empty_for(self.kind));
        };

        debug!(relation = %self.id, ?params, "filtering loaded relation in memory");
        let loaded = loader.load(instance).await;
        self.shaped(loaded.map(|all| Related::many(all.filtered(params))))
    }

    /// Normalize a loader/query outcome into this relation's shape
    fn shaped(&self, result: LoadResult) -> RelationResult<Related> {
        result
            .and_then(|value| value.into_shape(self.kind).map_err(BoxError::from))
            .map_err(|source| {
                warn!(relation = %self.id, error = %source, "relation load failed");
                RelationError::load(self.id.owner(), self.id.name(), source)
            })
    }

    /// Drop the cached value of this relation for one instance
    pub fn clear_cache(&self, instance: &dyn Entity) -> bool {
        let removed = self.cache.delete(&self.cache_key(instance));
        debug!(relation = %self.id, instance = %instance.instance_id(), removed, "cleared relation cache");
        removed
    }

    /// Drop the cached values of this relation for every instance
    pub fn clear_all(&self) -> usize {
        self.cache.clear(&CachePrefix::Scope(self.id.clone()))
    }

    /// Number of instances with a cached value
    pub fn cached_len(&self) -> usize {
        self.cache.scope_len(&self.id)
    }
}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("foreign_key", &self.foreign_key)
            .field("inverse_of", &self.inverse_of)
            .field("target", &self.target_ref)
            .field("resolved", &self.is_resolved())
            .field("cache", &self.cache_options)
            .finish_non_exhaustive()
    }
}
