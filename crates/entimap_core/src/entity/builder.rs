//! Typed construction of entities.

use super::Entity;
use crate::error::CoreResult;
use crate::types::{EntityId, EntityKind};
use entimap_storage::Row;
use std::any::Any;

/// A concrete entity type that can be built and hydrated.
pub trait EntityType: Entity + Sized {
    /// The builder describing a new instance.
    type Builder: EntityBuilder<Entity = Self>;

    /// Returns the static kind of the type.
    fn entity_kind() -> &'static EntityKind;

    /// Creates a builder from a storage row.
    ///
    /// Timestamps are applied by the caller; implementations read the id and
    /// their domain columns.
    fn builder_from_row(row: &Row) -> CoreResult<Self::Builder>;
}

/// Describes the initial field values of an entity.
pub trait EntityBuilder: 'static {
    /// The entity type this builder produces.
    type Entity: EntityType;

    /// Returns the id, if one was given.
    fn id(&self) -> Option<EntityId>;

    /// Sets the id.
    fn set_id(&mut self, id: EntityId);

    /// Returns whether a missing id should be reserved from the sequence
    /// before the entity is built.
    ///
    /// Defaults to `true` unless the storage assigns ids.
    fn generate_id(&self) -> bool {
        !<Self::Entity as EntityType>::entity_kind().is_id_generated_by_storage()
    }

    /// Builds the entity.
    fn build(self) -> Self::Entity;

    /// Serializes the described fields.
    fn to_fields(&self) -> Row;
}

/// Type-erased builder, accepted where the concrete type is only known at
/// run time.
pub trait AnyBuilder {
    /// Returns the kind of the entity the builder produces.
    fn entity_kind(&self) -> &'static EntityKind;

    /// Converts into `Box<dyn Any>` for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<B: EntityBuilder> AnyBuilder for B {
    fn entity_kind(&self) -> &'static EntityKind {
        <B::Entity as EntityType>::entity_kind()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
