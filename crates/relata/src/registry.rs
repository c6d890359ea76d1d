//! Type Registry - entity types by name and forward-reference resolution

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use relata_cache::{CacheDefaults, CacheStats};
use tracing::debug;

use crate::error::{RelationError, RelationResult};
use crate::model::EntityType;
use crate::relationships::{RelationCache, RelationKind};

/// Counts over everything a registry holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    pub types: usize,
    pub relations: usize,
    pub belongs_to: usize,
    pub has_one: usize,
    pub has_many: usize,
    /// Relations whose target is resolved and validated
    pub resolved: usize,
    pub cache: CacheStats,
}

/// Registry of entity types.
///
/// Relations name their targets by string, so a type may be declared before
/// the types it points at exist. Names are looked up here on first access.
pub struct TypeRegistry {
    this: Weak<TypeRegistry>,
    types: DashMap<String, Arc<EntityType>>,
    cache: Arc<RelationCache>,
}

impl TypeRegistry {
    /// Create a registry whose relations fall back to `defaults` for caching
    pub fn new(defaults: Arc<CacheDefaults>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            types: DashMap::new(),
            cache: Arc::new(RelationCache::new(defaults)),
        })
    }

    /// Create a registry with its own default cache policy
    pub fn with_defaults() -> Arc<Self> {
        Self::new(Arc::new(CacheDefaults::default()))
    }

    /// Create and register a root entity type
    pub fn define(&self, module: &str, name: &str, fields: &[&str]) -> Arc<EntityType> {
        self.define_inner(None, module, name, fields)
    }

    /// Create and register a subtype of `parent`
    pub fn define_subtype(&self, parent: &Arc<EntityType>, module: &str, name: &str, fields: &[&str]) -> Arc<EntityType> {
        self.define_inner(Some(parent.clone()), module, name, fields)
    }

    fn define_inner(&self, parent: Option<Arc<EntityType>>, module: &str, name: &str, fields: &[&str]) -> Arc<EntityType> {
        let entity_type = Arc::new(EntityType::new(
            module,
            name,
            fields,
            parent,
            self.this.clone(),
            self.cache.clone(),
        ));
        self.register(entity_type.clone());
        entity_type
    }

    /// Register a type under its qualified name, returning any type it replaces
    pub fn register(&self, entity_type: Arc<EntityType>) -> Option<Arc<EntityType>> {
        let key = entity_type.qualified_name().to_string();
        debug!(entity_type = %key, "registered entity type");
        self.types.insert(key, entity_type)
    }

    /// Resolve a type reference as seen from `context_module`.
    ///
    /// `module.Name` must match exactly. A bare `Name` is looked up in
    /// `context_module` first, then across all modules, where it must be
    /// unambiguous.
    pub fn resolve(&self, reference: &str, context_module: &str) -> RelationResult<Arc<EntityType>> {
        let unresolved = |reason: String| RelationError::UnresolvedType {
            reference: reference.to_string(),
            context: context_module.to_string(),
            reason,
        };

        if reference.contains('.') {
            return self
                .get(reference)
                .ok_or_else(|| unresolved("no type registered under this qualified name".to_string()));
        }

        if let Some(local) = self.get(&format!("{}.{}", context_module, reference)) {
            return Ok(local);
        }

        let mut candidates: Vec<Arc<EntityType>> = self
            .types
            .iter()
            .filter(|entry| entry.value().name() == reference)
            .map(|entry| entry.value().clone())
            .collect();

        match candidates.len() {
            0 => Err(unresolved("no type with this name is registered".to_string())),
            1 => Ok(candidates.remove(0)),
            _ => {
                let mut modules: Vec<&str> = candidates.iter().map(|ty| ty.module()).collect();
                modules.sort_unstable();
                Err(unresolved(format!(
                    "ambiguous, defined in modules: {}",
                    modules.join(", ")
                )))
            }
        }
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<EntityType>> {
        self.types.get(qualified_name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.types.contains_key(qualified_name)
    }

    /// Qualified names of all registered types, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> Vec<Arc<EntityType>> {
        let mut types: Vec<Arc<EntityType>> = self.types.iter().map(|entry| entry.value().clone()).collect();
        types.sort_by(|a, b| a.qualified_name().cmp(b.qualified_name()));
        types
    }

    /// Resolve and validate every registered relation now.
    ///
    /// Call once all types are declared to surface configuration errors
    /// before the first access does.
    pub fn validate_all(&self) -> RelationResult<()> {
        for entity_type in self.snapshot() {
            let mut relations = entity_type.own_relations();
            relations.sort_by(|a, b| a.name().cmp(b.name()));
            for relation in relations {
                relation.validate()?;
            }
        }
        debug!(types = self.types.len(), "validated all relations");
        Ok(())
    }

    /// The cache shared by every relation of this registry
    pub fn cache(&self) -> &Arc<RelationCache> {
        &self.cache
    }

    pub fn defaults(&self) -> &Arc<CacheDefaults> {
        self.cache.defaults()
    }

    /// Drop every cached relation value
    pub fn clear_caches(&self) {
        self.cache.clear_all();
        debug!("cleared all relation caches");
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            cache: self.cache.stats(),
            ..RegistryStats::default()
        };

        for entity_type in self.snapshot() {
            stats.types += 1;
            for relation in entity_type.own_relations() {
                stats.relations += 1;
                match relation.kind() {
                    RelationKind::BelongsTo => stats.belongs_to += 1,
                    RelationKind::HasOne => stats.has_one += 1,
                    RelationKind::HasMany => stats.has_many += 1,
                }
                if relation.is_resolved() {
                    stats.resolved += 1;
                }
            }
        }
        stats
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .field("cache", &self.cache)
            .finish()
    }
}
