//! Relation kinds and their structural pairing rules

use serde::{Deserialize, Serialize};

/// Defines the type of association between two entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Many-to-one or one-to-one; the owner holds the foreign key
    BelongsTo,
    /// One-to-one; the target holds the foreign key
    HasOne,
    /// One-to-many; the target holds the foreign key
    HasMany,
}

impl RelationKind {
    /// Returns true if this relation resolves to an ordered sequence
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany)
    }

    /// Returns true if the owning side stores the foreign key
    pub fn owner_holds_key(self) -> bool {
        matches!(self, Self::BelongsTo)
    }

    /// Whether `inverse` is a valid kind for the paired relation
    pub fn pairs_with(self, inverse: RelationKind) -> bool {
        matches!(
            (self, inverse),
            (Self::BelongsTo, Self::HasOne)
                | (Self::BelongsTo, Self::HasMany)
                | (Self::HasOne, Self::BelongsTo)
                | (Self::HasMany, Self::BelongsTo)
        )
    }
}
