//! Typed read facade over a DAO.

use crate::dao::{Dao, EntityDao};
use crate::entity::{EntityRef, EntityRefExt, EntityType};
use crate::error::{CoreError, CoreResult};
use crate::factory::{EntityFactory, InitArgs};
use crate::manager::{EntityManager, PersistTarget};
use crate::types::EntityId;
use entimap_storage::{Filter, FindOptions, Row, Value};
use std::fmt;
use std::rc::Rc;

/// Loads entities of type `E` through the identity map.
///
/// Every entity handed out is initialized, and at most one instance per id
/// is live: when the unit of work already tracks an entity, that instance
/// is returned instead of the freshly loaded one.
pub struct Repository<'a, E: EntityType> {
    manager: &'a EntityManager,
    dao: Rc<EntityDao<E>>,
    factory: Rc<EntityFactory<E>>,
}

impl<'a, E: EntityType> Repository<'a, E> {
    pub(crate) fn new(
        manager: &'a EntityManager,
        dao: Rc<EntityDao<E>>,
        factory: Rc<EntityFactory<E>>,
    ) -> Self {
        Self {
            manager,
            dao,
            factory,
        }
    }

    /// Returns the DAO.
    #[must_use]
    pub fn dao(&self) -> &Rc<EntityDao<E>> {
        &self.dao
    }

    /// Returns the factory.
    #[must_use]
    pub fn factory(&self) -> &Rc<EntityFactory<E>> {
        &self.factory
    }

    fn tracked(&self, id: EntityId) -> Option<EntityRef> {
        self.manager
            .unit_of_work()
            .load(id, E::entity_kind().name())
    }

    fn manage(&self, loaded: EntityRef) -> CoreResult<EntityRef> {
        if let Some(tracked) = loaded.entity_id().and_then(|id| self.tracked(id)) {
            return Ok(tracked);
        }
        {
            let mut entity = loaded.borrow_mut_as::<E>().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "DAO returned another type than {}",
                    E::entity_kind()
                ))
            })?;
            self.factory.initialize(&mut entity, &InitArgs::new())?;
        }
        if E::entity_kind().attach_on_load() {
            self.manager.attach(Rc::clone(&loaded));
        }
        Ok(loaded)
    }

    fn manage_all(&self, loaded: Vec<EntityRef>) -> CoreResult<Vec<EntityRef>> {
        loaded.into_iter().map(|e| self.manage(e)).collect()
    }

    /// Finds one entity by id.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find(&self, id: EntityId) -> CoreResult<Option<EntityRef>> {
        if let Some(tracked) = self.tracked(id) {
            return Ok(Some(tracked));
        }
        self.dao.find(id)?.map(|e| self.manage(e)).transpose()
    }

    /// Finds several entities, in the requested order.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find_by_ids(&self, ids: &[EntityId]) -> CoreResult<Vec<EntityRef>> {
        let loaded = self.dao.find_by_ids(ids)?;
        self.manage_all(loaded)
    }

    /// Finds the entities matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find_by(&self, filter: &Filter, options: &FindOptions) -> CoreResult<Vec<EntityRef>> {
        let loaded = self.dao.find_by(filter, options)?;
        self.manage_all(loaded)
    }

    /// Finds the first entity matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find_one_by(&self, filter: &Filter) -> CoreResult<Option<EntityRef>> {
        self.dao
            .find_one_by(filter)?
            .map(|e| self.manage(e))
            .transpose()
    }

    /// Finds every entity.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find_all(&self, options: &FindOptions) -> CoreResult<Vec<EntityRef>> {
        let loaded = self.dao.find_all(options)?;
        self.manage_all(loaded)
    }

    /// Counts every stored entity.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn find_count(&self) -> CoreResult<usize> {
        self.dao.find_count()
    }

    /// Counts the stored entities matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn find_count_by(&self, filter: &Filter) -> CoreResult<usize> {
        self.dao.find_count_by(filter)
    }

    /// Returns whether an entity with `id` is tracked or stored.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn exists(&self, id: EntityId) -> CoreResult<bool> {
        if self.tracked(id).is_some() {
            return Ok(true);
        }
        self.dao.exists(id)
    }

    /// Returns whether a stored entity matches `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn exists_by(&self, filter: &Filter) -> CoreResult<bool> {
        self.dao.exists_by(filter)
    }

    /// Finds the entities whose `column` equals one of `values`, ordered
    /// by id.
    ///
    /// # Errors
    ///
    /// Propagates storage and initialization failures.
    pub fn find_in(&self, column: &str, values: &[Value]) -> CoreResult<Vec<EntityRef>> {
        let loaded = self.dao.find_in(column, values)?;
        self.manage_all(loaded)
    }

    /// Reads the listed columns of one stored row without building an entity.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn find_fields(&self, id: EntityId, columns: &[&str]) -> CoreResult<Option<Row>> {
        self.dao.find_fields(id, columns)
    }

    /// Reads one column of one stored row.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn find_field(&self, id: EntityId, column: &str) -> CoreResult<Option<Value>> {
        self.dao.find_field(id, column)
    }

    /// Reads one column of every stored row matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn find_field_by(
        &self,
        column: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> CoreResult<Vec<Value>> {
        self.dao.find_field_by(column, filter, options)
    }

    /// Returns the stored join rows of `join_table` referencing entity `id`.
    ///
    /// Queued, unflushed relations are not included.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn relations(&self, join_table: &str, id: EntityId) -> CoreResult<Vec<Row>> {
        self.dao.relations(join_table, id)
    }

    /// Returns the ids of `R` entities linked to entity `id`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn relation_ids<R: EntityType>(
        &self,
        join_table: &str,
        id: EntityId,
    ) -> CoreResult<Vec<EntityId>> {
        self.dao.relation_ids(join_table, id, R::entity_kind())
    }

    /// Loads the `R` entities linked to entity `id` through the identity map.
    ///
    /// # Errors
    ///
    /// Propagates registry, storage and initialization failures.
    pub fn related<R: EntityType>(
        &self,
        join_table: &str,
        id: EntityId,
    ) -> CoreResult<Vec<EntityRef>> {
        let ids = self.relation_ids::<R>(join_table, id)?;
        self.manager.get_repository::<R>()?.find_by_ids(&ids)
    }

    /// Writes `changes` to every stored row matching `filter`.
    ///
    /// Tracked instances are not refreshed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn update_many(&self, filter: &Filter, changes: Row) -> CoreResult<usize> {
        self.dao.update_many(filter, changes)
    }

    /// Reserves the next id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn next_identity(&self) -> CoreResult<EntityId> {
        self.factory.next_identity()
    }

    /// Builds a new entity and persists it.
    ///
    /// # Errors
    ///
    /// See [`EntityManager::persist`].
    pub fn create(&self, builder: E::Builder) -> CoreResult<EntityRef> {
        self.manager.persist(PersistTarget::builder(builder))
    }
}

impl<E: EntityType> fmt::Debug for Repository<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("kind", &E::entity_kind().name())
            .finish_non_exhaustive()
    }
}
