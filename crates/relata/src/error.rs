//! Error types for relation resolution
//!
//! Every failure is scoped to the single relation access that triggered it
//! and is returned to the caller of the accessor; nothing is retried or
//! swallowed here.

use thiserror::Error;

use crate::relationships::RelationKind;

/// Result type alias for relation operations
pub type RelationResult<T> = Result<T, RelationError>;

/// Error produced by a caller-supplied loader, query or validator
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for relation operations
#[derive(Debug, Error)]
pub enum RelationError {
    /// The relation is structurally misconfigured
    #[error("Invalid relation configuration for '{owner}.{relation}': {violation}")]
    Config {
        owner: String,
        relation: String,
        violation: ConfigViolation,
    },

    /// A forward type reference could not be resolved
    #[error("Unresolved type reference '{reference}' (declared in module '{context}'): {reason}")]
    UnresolvedType {
        reference: String,
        context: String,
        reason: String,
    },

    /// The loader or query capability failed
    #[error("Failed to load relation '{owner}.{relation}': {source}")]
    Load {
        owner: String,
        relation: String,
        #[source]
        source: BoxError,
    },

    /// No relation with this name exists on the type or any ancestor, or the
    /// descriptor used has since been replaced
    #[error("Relation '{relation}' not found on '{owner}'")]
    NotFound { owner: String, relation: String },
}

impl RelationError {
    pub fn config(owner: impl Into<String>, relation: impl Into<String>, violation: ConfigViolation) -> Self {
        RelationError::Config {
            owner: owner.into(),
            relation: relation.into(),
            violation,
        }
    }

    pub fn load(owner: impl Into<String>, relation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RelationError::Load {
            owner: owner.into(),
            relation: relation.into(),
            source: source.into(),
        }
    }

    pub fn not_found(owner: impl Into<String>, relation: impl Into<String>) -> Self {
        RelationError::NotFound {
            owner: owner.into(),
            relation: relation.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, RelationError::Config { .. })
    }

    pub fn is_unresolved_type(&self) -> bool {
        matches!(self, RelationError::UnresolvedType { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self, RelationError::Load { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RelationError::NotFound { .. })
    }

    /// The broken rule, for configuration errors
    pub fn violation(&self) -> Option<&ConfigViolation> {
        match self {
            RelationError::Config { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

/// The specific structural rule a relation breaks
#[derive(Debug, Error)]
pub enum ConfigViolation {
    #[error("relation name must not be empty")]
    EmptyName,

    #[error("foreign key must not be empty")]
    EmptyForeignKey,

    #[error("foreign key '{field}' is not a field of '{type_name}'")]
    MissingForeignKey { field: String, type_name: String },

    #[error("inverse relation '{inverse}' not found on '{target}'")]
    MissingInverse { inverse: String, target: String },

    #[error("{kind:?} cannot pair with inverse '{inverse}' of kind {inverse_kind:?}")]
    IncompatibleInverse {
        kind: RelationKind,
        inverse: String,
        inverse_kind: RelationKind,
    },

    #[error("inverse relation '{target}.{inverse}' points back to '{points_to}' instead")]
    InconsistentInverse {
        target: String,
        inverse: String,
        points_to: String,
    },

    #[error("inverse relation '{inverse}' targets '{points_at}', which is not '{owner}' or an ancestor of it")]
    InverseTargetMismatch {
        inverse: String,
        points_at: String,
        owner: String,
    },

    #[error("validator rejected the relation: {0}")]
    ValidatorRejected(#[source] BoxError),

    #[error("no query factory configured; {0}")]
    QueryUnsupported(&'static str),
}
