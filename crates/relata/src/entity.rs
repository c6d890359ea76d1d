//! Entity contract - identity, runtime type and field access
//!
//! Relations never look inside an entity beyond [`Entity::field`]; how fields
//! are declared, validated or serialized is up to the implementing type.
//! [`Record`] is a ready-made implementation backed by a JSON object.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::model::EntityType;

/// Object identity of an entity instance.
///
/// Allocated once per instance and never derived from field values, so two
/// instances with identical fields still get separate cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Allocate a fresh, process-unique identity
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        InstanceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A record participating in relations
pub trait Entity: Any + Send + Sync + 'static {
    /// Identity, stable for the lifetime of the instance
    fn instance_id(&self) -> InstanceId;

    /// The concrete runtime type, used for relation lookup
    fn entity_type(&self) -> &Arc<EntityType>;

    /// Value of a field, `None` if the instance has no such field
    fn field(&self, name: &str) -> Option<Value>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an entity of any type
pub type EntityRef = Arc<dyn Entity>;

impl dyn Entity {
    /// Downcast to a concrete entity type
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Qualified name of the runtime type
    pub fn type_name(&self) -> &str {
        self.entity_type().qualified_name()
    }

    /// Whether this instance is of `entity_type` or one of its subtypes
    pub fn is_instance_of(&self, entity_type: &EntityType) -> bool {
        self.entity_type().is_subtype_of(entity_type)
    }
}

impl fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.type_name(), self.instance_id())
    }
}

/// Generic entity backed by a JSON field map.
///
/// Deliberately not `Clone`: a copy would be a different instance with a
/// different identity.
pub struct Record {
    id: InstanceId,
    entity_type: Arc<EntityType>,
    fields: Map<String, Value>,
}

impl Record {
    /// Create a record of `entity_type` with the given field values
    pub fn new<I, K>(entity_type: &Arc<EntityType>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            id: InstanceId::next(),
            entity_type: entity_type.clone(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Create a record from a JSON object; anything else yields no fields
    pub fn from_json(entity_type: &Arc<EntityType>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(entity_type, fields)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }
}

impl Entity for Record {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.entity_type.qualified_name())
            .field("id", &self.id)
            .field("fields", &self.fields)
            .finish()
    }
}
