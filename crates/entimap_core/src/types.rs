//! Core type definitions for entimap.

use entimap_storage::RowId;
use std::fmt;
use uuid::Uuid;

/// Identifier of a persisted or identity-reserved entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<RowId> for EntityId {
    fn from(id: RowId) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique token identifying one entity instance.
///
/// Used as the identity-map key of entities that have no id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceToken(Uuid);

impl InstanceToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp:{}", self.0)
    }
}

/// Identity-map key of a tracked entity.
///
/// Ids and instance tokens live in separate variants, so a token can never
/// collide with an id assigned later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    /// Key of an entity with an assigned id.
    Id(EntityId),
    /// Key of an entity without an id.
    Transient(InstanceToken),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Transient(token) => write!(f, "{token}"),
        }
    }
}

/// Static description of an entity type.
///
/// Every entity type declares one `EntityKind` as a `static` and returns it
/// from [`Entity::kind`](crate::Entity::kind). Kinds compare by name.
///
/// ```rust
/// use entimap_core::EntityKind;
///
/// static ORDER: EntityKind = EntityKind::new("Order", "order")
///     .id_generated_by_storage()
///     .aggregate_root();
///
/// assert!(ORDER.is_id_generated_by_storage());
/// assert!(ORDER.attach_on_load());
/// ```
#[derive(Debug)]
pub struct EntityKind {
    name: &'static str,
    table: &'static str,
    id_generated_by_storage: bool,
    aggregate_root: bool,
    attach_on_load: bool,
}

impl EntityKind {
    /// Declares a kind with application-assigned ids.
    #[must_use]
    pub const fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            id_generated_by_storage: false,
            aggregate_root: false,
            attach_on_load: true,
        }
    }

    /// Lets the storage assign ids on insert (auto-increment).
    #[must_use]
    pub const fn id_generated_by_storage(mut self) -> Self {
        self.id_generated_by_storage = true;
        self
    }

    /// Marks the kind as an aggregate root.
    #[must_use]
    pub const fn aggregate_root(mut self) -> Self {
        self.aggregate_root = true;
        self
    }

    /// Keeps entities loaded through a repository out of the identity map.
    #[must_use]
    pub const fn detached_on_load(mut self) -> Self {
        self.attach_on_load = false;
        self
    }

    /// Returns the kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the table name.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Returns whether ids are assigned by the storage on insert.
    #[must_use]
    pub const fn is_id_generated_by_storage(&self) -> bool {
        self.id_generated_by_storage
    }

    /// Returns whether the kind is an aggregate root.
    #[must_use]
    pub const fn is_aggregate_root(&self) -> bool {
        self.aggregate_root
    }

    /// Returns whether repositories attach loaded entities.
    #[must_use]
    pub const fn attach_on_load(&self) -> bool {
        self.attach_on_load
    }

    /// Returns the join table column referencing this kind.
    #[must_use]
    pub fn foreign_column(&self) -> String {
        format!("{}_id", self.table)
    }
}

impl PartialEq for EntityKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityKind {}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
