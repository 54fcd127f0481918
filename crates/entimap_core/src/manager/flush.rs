//! The flush state machine.

use super::{EntityManager, FlushHook, ManagerState};
use crate::entity::{AggregateLink, EntityRef, EntityRefExt};
use crate::error::CoreResult;
use crate::factory::InitArgs;
use crate::relation::ManyToManyRelation;
use crate::transaction::TransactionGuard;
use crate::types::{EntityId, EntityKey};
use std::rc::Rc;
use tracing::{debug, trace, warn};

impl EntityManager {
    /// Writes every tracked change in one storage transaction.
    ///
    /// Before-flush hooks run first, then the manager locks and, inside a
    /// transaction:
    ///
    /// 1. touches the modification time of aggregate roots with changed
    ///    members and of both endpoints of queued relations
    /// 2. deletes entities flagged for removal
    /// 3. suspends foreign key checks
    /// 4. updates changed persisted entities, grouped by type
    /// 5. inserts new entities, grouped by type
    /// 6. restores foreign key checks
    /// 7. writes and deletes queued join rows
    ///
    /// On success the transaction commits, the relation queue is cleared
    /// and after-flush hooks run once. On failure the transaction rolls
    /// back, the unit of work returns to its pre-flush state and the
    /// original error is returned. The manager is unlocked either way.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockViolation`](crate::CoreError::LockViolation)
    /// when called during a flush, and otherwise with the first hook or
    /// storage error.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_unlocked("flush")?;
        let before: Vec<FlushHook> = std::mem::take(&mut *self.before_flush.borrow_mut());
        for hook in before {
            hook(self)?;
        }

        self.state.set(ManagerState::Locked);
        let checkpoint = self.unit_of_work.borrow().checkpoint();
        debug!(
            entities = self.unit_of_work.borrow().entities_count(),
            relations = self.unit_of_work.borrow().relations_count(),
            "flush begin"
        );

        if let Err(err) = self.write_changes() {
            self.unit_of_work.borrow_mut().restore(checkpoint);
            if self.config.toggle_foreign_key_checks {
                if let Err(fk_err) = self.connection.set_foreign_key_checks(true) {
                    warn!(error = %fk_err, "failed to re-enable foreign key checks");
                }
            }
            self.cache.clean_all();
            self.processed.borrow_mut().clear();
            self.state.set(ManagerState::Unlocked);
            self.stats.record_rollback();
            warn!(error = %err, "flush rolled back");
            return Err(err);
        }

        self.state.set(ManagerState::Unlocked);
        let processed = std::mem::take(&mut *self.processed.borrow_mut());
        self.unit_of_work.borrow_mut().clear_relations();
        self.stats.record_commit();
        debug!(processed = processed.len(), "flush committed");

        let after: Vec<FlushHook> = std::mem::take(&mut *self.after_flush.borrow_mut());
        for hook in after {
            hook(self)?;
        }
        Ok(())
    }

    fn write_changes(&self) -> CoreResult<()> {
        let guard = TransactionGuard::begin(self.connection.as_ref())?;
        self.touch_modified()?;
        self.delete_removed()?;

        let toggle = self.config.toggle_foreign_key_checks;
        if toggle {
            self.connection.set_foreign_key_checks(false)?;
        }
        self.update_changed()?;
        self.insert_new()?;
        if toggle {
            self.connection.set_foreign_key_checks(true)?;
        }

        self.write_relations()?;
        guard.commit()
    }

    fn touch_modified(&self) -> CoreResult<()> {
        let (links, mut touched): (Vec<AggregateLink>, Vec<EntityRef>) = {
            let uow = self.unit_of_work.borrow();
            let links = uow
                .entities_by(|e| e.aggregate_link().is_some() && e.is_changed())
                .iter()
                .filter_map(|member| member.borrow().aggregate_link())
                .collect();
            let endpoints = uow
                .relations()
                .flat_map(|r| [Rc::clone(r.entity()), Rc::clone(r.related())])
                .collect();
            (links, endpoints)
        };
        for link in links {
            if let Some(root) = self.tracked_or_loaded(link.root.name(), link.root_id)? {
                touched.push(root);
            }
        }

        let mut seen: Vec<EntityRef> = Vec::new();
        for entity in touched {
            if seen.iter().any(|e| e.same_instance(&entity)) {
                continue;
            }
            entity.borrow_mut().set_modified(None);
            seen.push(entity);
        }
        trace!(count = seen.len(), "touched modification times");
        Ok(())
    }

    /// Returns the tracked entity, or loads, initializes and attaches it.
    fn tracked_or_loaded(&self, name: &str, id: EntityId) -> CoreResult<Option<EntityRef>> {
        if let Some(tracked) = self.unit_of_work.borrow().load(id, name) {
            return Ok(Some(tracked));
        }
        let Some(loaded) = self.get_dao(name)?.find(id)? else {
            return Ok(None);
        };
        self.get_entity_factory(name)?
            .initialize_ref(&loaded, &InitArgs::new())?;
        self.unit_of_work.borrow_mut().attach(Rc::clone(&loaded));
        trace!(kind = name, %id, "attached root");
        Ok(Some(loaded))
    }

    fn delete_removed(&self) -> CoreResult<()> {
        let removed = self.unit_of_work.borrow().entities_by(|e| e.should_remove());
        for entity in removed {
            // members detached by their root's cascade still get deleted
            if self.processed.borrow().iter().any(|e| e.same_instance(&entity)) {
                continue;
            }
            let is_new = entity.borrow().metadata().state().is_new();
            if !is_new {
                self.dao_of(&entity)?.delete(&entity)?;
                self.stats.record_delete();
            }
            self.unit_of_work
                .borrow_mut()
                .remove_relations_by_entity(&entity);
            self.run_remove_hooks(&entity)?;
            self.unit_of_work.borrow_mut().detach(&entity, true);
            self.processed.borrow_mut().push(Rc::clone(&entity));
            self.run_entity_removed_hooks(&entity)?;
        }
        Ok(())
    }

    fn update_changed(&self) -> CoreResult<()> {
        let groups = self
            .unit_of_work
            .borrow()
            .persisted_entities(|e| e.should_persist() && e.is_changed());
        for (kind, entities) in groups {
            let dao = self.get_dao(kind.name())?;
            for entity in entities {
                dao.update(&entity)?;
                self.stats.record_update();
                self.run_save_hooks(&entity)?;
                self.processed.borrow_mut().push(entity);
            }
        }
        Ok(())
    }

    fn insert_new(&self) -> CoreResult<()> {
        let groups = self
            .unit_of_work
            .borrow()
            .unpersisted_entities(|e| e.should_persist());
        let chunk = self.insert_chunk.get();
        for (kind, entities) in groups {
            let dao = self.get_dao(kind.name())?;
            let transient: Vec<bool> = entities
                .iter()
                .map(|e| matches!(e.borrow().key(), EntityKey::Transient(_)))
                .collect();
            let size = if chunk == 0 { entities.len() } else { chunk };
            for batch in entities.chunks(size.max(1)) {
                dao.batch_insert(batch)?;
                self.stats.record_inserts(batch.len() as u64);
            }
            debug!(kind = %kind, count = entities.len(), "inserted");

            for (entity, was_transient) in entities.into_iter().zip(transient) {
                if was_transient {
                    // re-key under the id storage assigned
                    self.unit_of_work.borrow_mut().attach(Rc::clone(&entity));
                }
                self.run_save_hooks(&entity)?;
                self.processed.borrow_mut().push(entity);
            }
        }
        Ok(())
    }

    fn write_relations(&self) -> CoreResult<()> {
        let relations: Vec<ManyToManyRelation> =
            self.unit_of_work.borrow().relations().cloned().collect();
        for relation in relations {
            let dao = self.dao_of(relation.entity())?;
            if relation.should_persist() {
                dao.add_relation(&relation)?;
            } else {
                dao.remove_relation(&relation)?;
            }
            self.stats.record_relation_write();
        }
        Ok(())
    }
}
