//! Entity types and their relation tables

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{RelationError, RelationResult};
use crate::registry::TypeRegistry;
use crate::relationships::{QueryParams, Related, Relation, RelationCache, RelationDescriptor};

/// Runtime handle of an entity type.
///
/// Created through [`TypeRegistry::define`] or
/// [`TypeRegistry::define_subtype`]. A subtype starts with all of its parent's
/// fields and sees every parent relation it does not override.
pub struct EntityType {
    module: String,
    name: String,
    qualified_name: String,
    fields: Vec<String>,
    parent: Option<Arc<EntityType>>,
    registry: Weak<TypeRegistry>,
    cache: Arc<RelationCache>,
    relations: RwLock<HashMap<String, Arc<RelationDescriptor>>>,
}

impl EntityType {
    pub(crate) fn new(
        module: &str,
        name: &str,
        fields: &[&str],
        parent: Option<Arc<EntityType>>,
        registry: Weak<TypeRegistry>,
        cache: Arc<RelationCache>,
    ) -> Self {
        let mut all_fields: Vec<String> = parent.as_ref().map(|p| p.fields.clone()).unwrap_or_default();
        for field in fields {
            if !all_fields.iter().any(|f| f == field) {
                all_fields.push(field.to_string());
            }
        }

        Self {
            module: module.to_string(),
            name: name.to_string(),
            qualified_name: format!("{}.{}", module, name),
            fields: all_fields,
            parent,
            registry,
            cache,
            relations: RwLock::new(HashMap::new()),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `module.Name`, unique within a registry
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Declared fields, inherited ones first
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    pub fn parent(&self) -> Option<&Arc<EntityType>> {
        self.parent.as_ref()
    }

    /// Whether this is `other` or derives from it, by identity
    pub fn is_subtype_of(&self, other: &EntityType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if std::ptr::eq(ty, other) {
                return true;
            }
            current = ty.parent.as_deref();
        }
        false
    }

    pub fn registry(&self) -> Option<Arc<TypeRegistry>> {
        self.registry.upgrade()
    }

    /// The store this type's relations cache into
    pub fn relation_cache(&self) -> &Arc<RelationCache> {
        &self.cache
    }

    /// Declare a relation on this type.
    ///
    /// Owner-side rules are checked here; everything that needs the target
    /// type waits until first access or [`RelationDescriptor::validate`].
    /// Registering a name the type already declares replaces that relation
    /// and drops its cached values. Shadowing a parent's relation leaves the
    /// parent untouched.
    pub fn register_relation(self: &Arc<Self>, name: &str, relation: Relation) -> RelationResult<Arc<RelationDescriptor>> {
        let descriptor = Arc::new(RelationDescriptor::new(
            self,
            name,
            relation,
            self.cache.clone(),
            self.registry.clone(),
        )?);

        let replaced = self
            .relations
            .write()
            .insert(name.to_string(), descriptor.clone());
        if let Some(previous) = replaced {
            previous.clear_all();
        }

        debug!(
            owner = %self.qualified_name,
            relation = name,
            kind = ?descriptor.kind(),
            target = descriptor.target_ref(),
            "registered relation"
        );
        Ok(descriptor)
    }

    /// Relation declared directly on this type
    pub fn own_relation(&self, name: &str) -> Option<Arc<RelationDescriptor>> {
        self.relations.read().get(name).cloned()
    }

    /// Most specific relation with this name, searching ancestors
    pub fn find_relation(&self, name: &str) -> Option<Arc<RelationDescriptor>> {
        self.own_relation(name)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.find_relation(name)))
    }

    /// Like [`EntityType::find_relation`], failing with `NotFound`
    pub fn get_relation(&self, name: &str) -> RelationResult<Arc<RelationDescriptor>> {
        self.find_relation(name)
            .ok_or_else(|| RelationError::not_found(&self.qualified_name, name))
    }

    /// Names of every relation visible on this type, sorted
    pub fn relation_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut current = Some(self);
        while let Some(ty) = current {
            names.extend(ty.relations.read().keys().cloned());
            current = ty.parent.as_deref();
        }
        names.into_iter().collect()
    }

    /// Relations declared directly on this type
    pub fn own_relations(&self) -> Vec<Arc<RelationDescriptor>> {
        self.relations.read().values().cloned().collect()
    }

    /// Query a relation without an owning instance
    pub async fn query_relation(&self, name: &str, params: &QueryParams) -> RelationResult<Related> {
        self.get_relation(name)?.query(None, params).await
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.qualified_name)
            .field("fields", &self.fields)
            .field("parent", &self.parent.as_ref().map(|p| p.qualified_name()))
            .field("relations", &self.relations.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name)
    }
}
