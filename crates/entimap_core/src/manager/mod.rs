//! The entity manager.
//!
//! An [`EntityManager`] owns one unit of work and coordinates it with the
//! registered DAOs. It is either unlocked, accepting changes, or locked
//! while [`flush`](EntityManager::flush) writes them; every mutation
//! attempted while locked fails with [`CoreError::LockViolation`].
//!
//! ```text
//! UNLOCKED --flush()--> LOCKED --commit/rollback--> UNLOCKED
//! ```

mod flush;

use crate::cache::Cache;
use crate::config::Config;
use crate::dao::{Dao, EntityDao};
use crate::entity::{AnyBuilder, EntityBuilder, EntityRef, EntityRefExt, EntityType};
use crate::error::{CoreError, CoreResult};
use crate::event::{DomainEventPublisher, ManageEntityEventSubscriber};
use crate::factory::{EntityFactory, ErasedFactory, InitArgs, Initializer};
use crate::registry::Registry;
use crate::relation::ManyToManyRelation;
use crate::repository::Repository;
use crate::stats::ManagerStats;
use crate::unit_of_work::UnitOfWork;
use entimap_storage::{Connection, Mapper};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs once around the next flush.
pub type FlushHook = Box<dyn FnOnce(&EntityManager) -> CoreResult<()>>;

/// Runs for every entity deleted by a flush or an immediate removal.
pub type EntityRemovedHook = Rc<dyn Fn(&EntityManager, &EntityRef) -> CoreResult<()>>;

/// Lock state of an entity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// Accepting changes.
    Unlocked,
    /// Flushing; mutations are rejected.
    Locked,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => f.write_str("unlocked"),
            Self::Locked => f.write_str("locked"),
        }
    }
}

/// What [`EntityManager::persist`] persists.
pub enum PersistTarget {
    /// An existing entity.
    Entity(EntityRef),
    /// A builder the registered factory turns into a new entity.
    Builder(Box<dyn AnyBuilder>),
}

impl PersistTarget {
    /// Wraps a typed builder.
    pub fn builder<B: EntityBuilder>(builder: B) -> Self {
        Self::Builder(Box::new(builder))
    }
}

impl From<EntityRef> for PersistTarget {
    fn from(entity: EntityRef) -> Self {
        Self::Entity(entity)
    }
}

impl From<&EntityRef> for PersistTarget {
    fn from(entity: &EntityRef) -> Self {
        Self::Entity(Rc::clone(entity))
    }
}

/// Coordinates the unit of work, the DAOs and the storage transaction.
///
/// Created behind an [`Rc`] so that the event subscriber it registers can
/// hold it weakly.
pub struct EntityManager {
    connection: Arc<dyn Connection>,
    cache: Arc<dyn Cache>,
    config: Config,
    state: Cell<ManagerState>,
    unit_of_work: RefCell<UnitOfWork>,
    registry: RefCell<Registry>,
    processed: RefCell<Vec<EntityRef>>,
    before_flush: RefCell<Vec<FlushHook>>,
    after_flush: RefCell<Vec<FlushHook>>,
    entity_removed: RefCell<Vec<EntityRemovedHook>>,
    insert_chunk: Cell<usize>,
    publisher: Rc<DomainEventPublisher>,
    stats: ManagerStats,
}

impl EntityManager {
    /// Creates a manager writing through `connection`.
    pub fn new(connection: Arc<dyn Connection>, cache: Arc<dyn Cache>, config: Config) -> Rc<Self> {
        Rc::new_cyclic(|weak| {
            let publisher = Rc::new(DomainEventPublisher::new());
            publisher.subscribe(Rc::new(ManageEntityEventSubscriber::new(weak.clone())));
            Self {
                connection,
                cache,
                insert_chunk: Cell::new(config.insert_batch_size),
                config,
                state: Cell::new(ManagerState::Unlocked),
                unit_of_work: RefCell::new(UnitOfWork::new()),
                registry: RefCell::new(Registry::new()),
                processed: RefCell::new(Vec::new()),
                before_flush: RefCell::new(Vec::new()),
                after_flush: RefCell::new(Vec::new()),
                entity_removed: RefCell::new(Vec::new()),
                publisher,
                stats: ManagerStats::new(),
            }
        })
    }

    /// Registers entity type `E` stored through `mapper`.
    pub fn register<E: EntityType>(&self, mapper: Arc<dyn Mapper>) {
        self.register_factory::<E>(mapper, None);
    }

    /// Registers entity type `E` with a type-specific initializer.
    pub fn register_with<E: EntityType>(&self, mapper: Arc<dyn Mapper>, initializer: Initializer<E>) {
        self.register_factory::<E>(mapper, Some(initializer));
    }

    fn register_factory<E: EntityType>(
        &self,
        mapper: Arc<dyn Mapper>,
        initializer: Option<Initializer<E>>,
    ) {
        let mut factory = EntityFactory::<E>::new(Arc::clone(&mapper), Rc::clone(&self.publisher))
            .with_min_identity(self.config.min_identity);
        if let Some(initializer) = initializer {
            factory = factory.with_initializer(initializer);
        }
        let factory = Rc::new(factory);
        let dao = Rc::new(EntityDao::new(
            mapper,
            Arc::clone(&self.cache),
            Rc::clone(&factory),
            self.config.clone(),
        ));
        debug!(kind = %E::entity_kind(), "register");
        self.registry.borrow_mut().register(dao, factory);
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Returns the event publisher injected into initialized entities.
    #[must_use]
    pub fn publisher(&self) -> &Rc<DomainEventPublisher> {
        &self.publisher
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// Returns the lock state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.state.get()
    }

    /// Returns `true` while a flush is running.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.get() == ManagerState::Locked
    }

    /// Borrows the unit of work for inspection.
    ///
    /// Release the borrow before calling back into the manager.
    #[must_use]
    pub fn unit_of_work(&self) -> Ref<'_, UnitOfWork> {
        self.unit_of_work.borrow()
    }

    fn ensure_unlocked(&self, operation: &'static str) -> CoreResult<()> {
        if self.is_locked() {
            self.stats.record_lock_violation();
            warn!(operation, "entity manager is locked");
            return Err(CoreError::lock_violation(operation));
        }
        Ok(())
    }

    /// Tracks an entity for the next flush and returns it.
    ///
    /// Builders are turned into new entities by the registered factory.
    /// Uninitialized entities are initialized. Entities without id get one
    /// from the type's sequence unless storage assigns ids.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockViolation`] during a flush and with
    /// [`CoreError::InvalidArgument`] for unregistered types.
    pub fn persist(&self, target: impl Into<PersistTarget>) -> CoreResult<EntityRef> {
        self.ensure_unlocked("persist")?;
        let entity = match target.into() {
            PersistTarget::Entity(entity) => entity,
            PersistTarget::Builder(builder) => {
                let factory = self.get_entity_factory(builder.entity_kind().name())?;
                factory.build_any(builder, true, None)?
            }
        };

        let kind = entity.entity_kind();
        let factory = self.get_entity_factory(kind.name())?;
        let initialized = entity.borrow().metadata().is_initialized();
        if !initialized {
            factory.initialize_ref(&entity, &InitArgs::new())?;
        }
        let needs_id = entity.borrow().id().is_none() && !kind.is_id_generated_by_storage();
        if needs_id {
            let id = factory.next_identity()?;
            entity.borrow_mut().assign_id(id);
        }

        self.unit_of_work.borrow_mut().attach(Rc::clone(&entity));
        Ok(entity)
    }

    /// Schedules an entity for removal at the next flush, or deletes it
    /// right away when `immediately` is set.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockViolation`] during a flush. Immediate
    /// removal propagates DAO and hook failures.
    pub fn remove(&self, entity: &EntityRef, immediately: bool) -> CoreResult<()> {
        self.ensure_unlocked("remove")?;
        if !immediately {
            self.unit_of_work.borrow_mut().remove(entity);
            return Ok(());
        }

        let dao = self.dao_of(entity)?;
        dao.delete(entity)?;
        self.stats.record_delete();
        self.run_remove_hooks(entity)?;
        self.unit_of_work.borrow_mut().detach(entity, true);
        self.run_entity_removed_hooks(entity)
    }

    /// Deletes every row of a type and stops tracking its instances.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockViolation`] during a flush and with
    /// [`CoreError::InvalidArgument`] for unknown type names.
    pub fn remove_all(&self, name: &str) -> CoreResult<usize> {
        self.ensure_unlocked("remove_all")?;
        let kind = self.registry.borrow().resolve(name)?;
        self.unit_of_work.borrow_mut().clear(Some(kind.name()));
        let dao = self.get_dao(kind.name())?;
        let count = dao.delete_all()?;
        debug!(kind = %kind, count, "remove all");
        Ok(count)
    }

    /// Queues a relation operation for the next flush.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockViolation`] during a flush.
    pub fn add_relation(&self, relation: ManyToManyRelation) -> CoreResult<()> {
        self.ensure_unlocked("add_relation")?;
        self.unit_of_work.borrow_mut().add_relation(relation);
        Ok(())
    }

    /// Tracks an entity without touching its id or initialization.
    pub fn attach(&self, entity: EntityRef) {
        self.unit_of_work.borrow_mut().attach(entity);
    }

    /// Stops tracking an entity.
    pub fn detach(&self, entity: &EntityRef, cascade: bool) {
        self.unit_of_work.borrow_mut().detach(entity, cascade);
    }

    /// Stops tracking the entities of one type, or everything.
    pub fn clear(&self, name: Option<&str>) {
        let kind = name.map(|name| {
            self.registry
                .borrow()
                .resolve(name)
                .map_or_else(|_| name.to_string(), |kind| kind.name().to_string())
        });
        self.unit_of_work.borrow_mut().clear(kind.as_deref());
    }

    /// Returns the DAO of a type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown names.
    pub fn get_dao(&self, name: &str) -> CoreResult<Rc<dyn Dao>> {
        self.registry.borrow().dao(name)
    }

    /// Returns the DAO of an entity's type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unregistered types.
    pub fn dao_of(&self, entity: &EntityRef) -> CoreResult<Rc<dyn Dao>> {
        self.get_dao(entity.entity_kind().name())
    }

    /// Returns the typed DAO of `E`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `E` is not registered.
    pub fn dao<E: EntityType>(&self) -> CoreResult<Rc<EntityDao<E>>> {
        self.registry.borrow().typed_dao::<E>()
    }

    /// Returns the factory of a type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown names.
    pub fn get_entity_factory(&self, name: &str) -> CoreResult<Rc<dyn ErasedFactory>> {
        self.registry.borrow().factory(name)
    }

    /// Returns the typed factory of `E`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `E` is not registered.
    pub fn entity_factory<E: EntityType>(&self) -> CoreResult<Rc<EntityFactory<E>>> {
        self.registry.borrow().typed_factory::<E>()
    }

    /// Returns the repository of `E`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `E` is not registered.
    pub fn get_repository<E: EntityType>(&self) -> CoreResult<Repository<'_, E>> {
        Ok(Repository::new(self, self.dao::<E>()?, self.entity_factory::<E>()?))
    }

    /// Registers a hook run once before the next flush locks the manager.
    pub fn on_before_flush(&self, hook: FlushHook) {
        self.before_flush.borrow_mut().push(hook);
    }

    /// Registers a hook run once after the next successful flush.
    pub fn on_flush(&self, hook: FlushHook) {
        self.after_flush.borrow_mut().push(hook);
    }

    /// Registers a hook run for every deleted entity.
    pub fn on_entity_removed(&self, hook: EntityRemovedHook) {
        self.entity_removed.borrow_mut().push(hook);
    }

    /// Sets how many rows a flush inserts per statement (0 = all rows of a
    /// type in one statement).
    pub fn optimize_imports(&self, chunk_size: usize) {
        self.insert_chunk.set(chunk_size);
    }

    /// Returns the current insert chunk size.
    #[must_use]
    pub fn insert_chunk_size(&self) -> usize {
        self.insert_chunk.get()
    }

    fn run_remove_hooks(&self, entity: &EntityRef) -> CoreResult<()> {
        let hooks = entity.borrow().core().remove_hooks();
        hooks.iter().try_for_each(|hook| hook(entity))
    }

    fn run_save_hooks(&self, entity: &EntityRef) -> CoreResult<()> {
        let hooks = entity.borrow().core().save_hooks();
        hooks.iter().try_for_each(|hook| hook(entity))
    }

    fn run_entity_removed_hooks(&self, entity: &EntityRef) -> CoreResult<()> {
        let hooks = self.entity_removed.borrow().clone();
        hooks.iter().try_for_each(|hook| hook(self, entity))
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("state", &self.state.get())
            .field("registry", &*self.registry.borrow())
            .field("tracked", &self.unit_of_work.borrow().entities_count())
            .finish_non_exhaustive()
    }
}
