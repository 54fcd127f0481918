//! Entity construction and initialization.

use crate::entity::{
    AnyBuilder, EntityBuilder, EntityRef, EntityRefExt, EntityState, EntityType,
};
use crate::error::{CoreError, CoreResult};
use crate::event::DomainEventPublisher;
use crate::types::{EntityId, EntityKind};
use entimap_storage::{Mapper, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// Context values handed to a type's initializer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitArgs {
    /// First context value.
    pub first: Option<Value>,
    /// Second context value.
    pub second: Option<Value>,
}

impl InitArgs {
    /// Creates empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates arguments from two values.
    #[must_use]
    pub fn with(first: Option<Value>, second: Option<Value>) -> Self {
        Self { first, second }
    }
}

/// Type-specific initialization step.
pub type Initializer<E> = Box<dyn Fn(&mut E, &InitArgs) -> CoreResult<()>>;

/// Builds and initializes entities of one type.
pub struct EntityFactory<E: EntityType> {
    mapper: Arc<dyn Mapper>,
    publisher: Rc<DomainEventPublisher>,
    initializer: Option<Initializer<E>>,
    min_identity: u64,
    floor_applied: Cell<bool>,
}

impl<E: EntityType> EntityFactory<E> {
    /// Creates a factory reserving ids from `mapper`'s sequence.
    pub fn new(mapper: Arc<dyn Mapper>, publisher: Rc<DomainEventPublisher>) -> Self {
        Self {
            mapper,
            publisher,
            initializer: None,
            min_identity: 1,
            floor_applied: Cell::new(false),
        }
    }

    /// Sets the lowest id the type's sequence may hand out.
    #[must_use]
    pub fn with_min_identity(mut self, min_identity: u64) -> Self {
        self.min_identity = min_identity;
        self
    }

    /// Raises the type's sequence to the configured floor, once.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; the floor is retried on the next call.
    pub(crate) fn apply_identity_floor(&self) -> CoreResult<()> {
        if self.floor_applied.get() || self.min_identity <= 1 {
            return Ok(());
        }
        self.mapper.raise_identity(self.min_identity)?;
        self.floor_applied.set(true);
        trace!(kind = %self.kind(), min = self.min_identity, "identity floor");
        Ok(())
    }

    /// Sets the type-specific initialization step.
    #[must_use]
    pub fn with_initializer(mut self, initializer: Initializer<E>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Returns the kind this factory builds.
    #[must_use]
    pub fn kind(&self) -> &'static EntityKind {
        E::entity_kind()
    }

    /// Builds an entity from a builder.
    ///
    /// A builder without id gets `assigned_id`, or a freshly reserved id when
    /// it asks for one, and yields a new entity. A builder with an id yields
    /// a persisted entity.
    ///
    /// # Errors
    ///
    /// Propagates id reservation and initializer failures.
    pub fn build(
        &self,
        mut builder: E::Builder,
        initialize: bool,
        assigned_id: Option<EntityId>,
    ) -> CoreResult<E> {
        let state = if builder.id().is_some() {
            EntityState::Persisted
        } else {
            if let Some(id) = assigned_id {
                builder.set_id(id);
            } else if builder.generate_id() {
                builder.set_id(self.next_identity()?);
            }
            EntityState::New
        };

        let mut entity = builder.build();
        entity.metadata_mut().set_state(state);
        trace!(kind = %self.kind(), id = ?entity.id(), state = %state, "build");
        if initialize {
            self.initialize(&mut entity, &InitArgs::new())?;
        }
        Ok(entity)
    }

    /// Initializes an entity once: injects the event publisher, runs the
    /// initializer and, for persisted entities, takes the original data
    /// snapshot last.
    ///
    /// # Errors
    ///
    /// Propagates initializer failures; the entity stays uninitialized.
    pub fn initialize(&self, entity: &mut E, args: &InitArgs) -> CoreResult<()> {
        if entity.metadata().is_initialized() {
            return Ok(());
        }
        entity.core_mut().set_publisher(Rc::clone(&self.publisher));
        if let Some(initializer) = &self.initializer {
            initializer(entity, args)?;
        }
        entity.metadata_mut().initialize();
        if !entity.metadata().state().is_new() {
            entity.update_original_data();
        }
        Ok(())
    }

    /// Reserves the next id from the type's sequence.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn next_identity(&self) -> CoreResult<EntityId> {
        self.apply_identity_floor()?;
        Ok(EntityId::from(self.mapper.next_identity()?))
    }
}

impl<E: EntityType> fmt::Debug for EntityFactory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFactory")
            .field("kind", &self.kind().name())
            .field("initializer", &self.initializer.is_some())
            .field("min_identity", &self.min_identity)
            .finish()
    }
}

/// [`EntityFactory`] with the entity type erased, used where the type is
/// only known at run time.
pub trait ErasedFactory {
    /// Returns the kind this factory builds.
    fn kind(&self) -> &'static EntityKind;

    /// Builds an entity from a type-erased builder.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the builder belongs to
    /// another type, and otherwise what [`EntityFactory::build`] returns.
    fn build_any(
        &self,
        builder: Box<dyn AnyBuilder>,
        initialize: bool,
        assigned_id: Option<EntityId>,
    ) -> CoreResult<EntityRef>;

    /// Initializes an entity handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the entity belongs to
    /// another type.
    fn initialize_ref(&self, entity: &EntityRef, args: &InitArgs) -> CoreResult<()>;

    /// Reserves the next id from the type's sequence.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    fn next_identity(&self) -> CoreResult<EntityId>;

    /// Raises the type's sequence to its configured floor.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    fn apply_identity_floor(&self) -> CoreResult<()>;
}

impl<E: EntityType> ErasedFactory for EntityFactory<E> {
    fn kind(&self) -> &'static EntityKind {
        E::entity_kind()
    }

    fn build_any(
        &self,
        builder: Box<dyn AnyBuilder>,
        initialize: bool,
        assigned_id: Option<EntityId>,
    ) -> CoreResult<EntityRef> {
        let given = builder.entity_kind();
        let builder = builder.into_any().downcast::<E::Builder>().map_err(|_| {
            CoreError::invalid_argument(format!(
                "{} factory cannot build {given}",
                self.kind()
            ))
        })?;
        let entity = self.build(*builder, initialize, assigned_id)?;
        Ok(Rc::new(RefCell::new(entity)))
    }

    fn initialize_ref(&self, entity: &EntityRef, args: &InitArgs) -> CoreResult<()> {
        let mut typed = entity.borrow_mut_as::<E>().ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "{} factory cannot initialize another entity type",
                self.kind()
            ))
        })?;
        self.initialize(&mut typed, args)
    }

    fn next_identity(&self) -> CoreResult<EntityId> {
        EntityFactory::next_identity(self)
    }

    fn apply_identity_floor(&self) -> CoreResult<()> {
        EntityFactory::apply_identity_floor(self)
    }
}
