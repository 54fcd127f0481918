//! Data access objects.
//!
//! A DAO turns rows into entities and entities into rows for one entity
//! type. Reads go through a two-level cache: rows are cached per entity
//! under `"<Kind>/<id>"`, and id lists of queries under keys derived from
//! the filter and options. Writes evict what they invalidate.

use crate::cache::{Cache, SaveOptions};
use crate::config::Config;
use crate::entity::{
    entity_ref, parse_timestamp, Entity, EntityRef, EntityState, EntityType, CREATED_FIELD,
    MODIFIED_FIELD,
};
use crate::error::{CoreError, CoreResult};
use crate::factory::EntityFactory;
use crate::relation::ManyToManyRelation;
use crate::types::{EntityId, EntityKind};
use entimap_storage::{Filter, FindOptions, Mapper, Row, RowId, Value, ID_COLUMN};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Tag carried by every query cache entry.
pub const QUERY_TAG: &str = "query";

/// Returns the entity cache key of one row.
#[must_use]
pub fn entity_cache_key(kind: &EntityKind, id: EntityId) -> String {
    format!("{}/{id}", kind.name())
}

/// Returns the query cache tag of a kind or join table.
#[must_use]
pub fn query_tag(name: &str) -> String {
    format!("{QUERY_TAG}/{name}")
}

/// Object-safe access to the rows of one entity type.
///
/// Loaded entities are hydrated but not initialized; the repository
/// initializes and attaches them.
pub trait Dao {
    /// Returns the entity kind this DAO serves.
    fn kind(&self) -> &'static EntityKind;

    /// Reserves the next id from the table sequence.
    fn next_identity(&self) -> CoreResult<EntityId>;

    /// Loads one entity.
    fn find(&self, id: EntityId) -> CoreResult<Option<EntityRef>>;

    /// Loads several entities in the requested order, skipping missing ids.
    fn find_by_ids(&self, ids: &[EntityId]) -> CoreResult<Vec<EntityRef>>;

    /// Loads the entities matching `filter`.
    fn find_by(&self, filter: &Filter, options: &FindOptions) -> CoreResult<Vec<EntityRef>>;

    /// Loads the first entity matching `filter`.
    fn find_one_by(&self, filter: &Filter) -> CoreResult<Option<EntityRef>>;

    /// Loads every entity.
    fn find_all(&self, options: &FindOptions) -> CoreResult<Vec<EntityRef>>;

    /// Counts every row.
    fn find_count(&self) -> CoreResult<usize>;

    /// Counts the rows matching `filter`.
    fn find_count_by(&self, filter: &Filter) -> CoreResult<usize>;

    /// Returns whether a row with `id` exists.
    fn exists(&self, id: EntityId) -> CoreResult<bool>;

    /// Returns whether any row matches `filter`.
    fn exists_by(&self, filter: &Filter) -> CoreResult<bool>;

    /// Loads the entities whose `column` equals one of `values`, ordered by id.
    fn find_in(&self, column: &str, values: &[Value]) -> CoreResult<Vec<EntityRef>>;

    /// Loads the listed columns of one row.
    fn find_fields(&self, id: EntityId, columns: &[&str]) -> CoreResult<Option<Row>>;

    /// Loads one column of one row.
    fn find_field(&self, id: EntityId, column: &str) -> CoreResult<Option<Value>>;

    /// Loads one column of every row matching `filter`.
    fn find_field_by(
        &self,
        column: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> CoreResult<Vec<Value>>;

    /// Returns the join rows of `join_table` that reference entity `id`.
    fn relations(&self, join_table: &str, id: EntityId) -> CoreResult<Vec<Row>>;

    /// Returns the ids of `related` entities linked to entity `id` through
    /// `join_table`.
    fn relation_ids(
        &self,
        join_table: &str,
        id: EntityId,
        related: &EntityKind,
    ) -> CoreResult<Vec<EntityId>>;

    /// Inserts one entity and marks it persisted.
    fn insert(&self, entity: &EntityRef) -> CoreResult<()>;

    /// Inserts several entities as one statement and marks them persisted.
    fn batch_insert(&self, entities: &[EntityRef]) -> CoreResult<()>;

    /// Writes the changed columns of one entity.
    fn update(&self, entity: &EntityRef) -> CoreResult<()>;

    /// Deletes the row of an entity.
    fn delete(&self, entity: &EntityRef) -> CoreResult<bool>;

    /// Deletes one row by id.
    fn delete_by_id(&self, id: EntityId) -> CoreResult<bool>;

    /// Deletes every row.
    fn delete_all(&self) -> CoreResult<usize>;

    /// Writes `changes` to every row matching `filter`, bypassing the unit
    /// of work. Returns the number of rows written.
    fn update_many(&self, filter: &Filter, changes: Row) -> CoreResult<usize>;

    /// Writes the join row of a relation.
    fn add_relation(&self, relation: &ManyToManyRelation) -> CoreResult<()>;

    /// Deletes the join row of a relation.
    fn remove_relation(&self, relation: &ManyToManyRelation) -> CoreResult<bool>;
}

/// [`Dao`] implementation over a [`Mapper`].
pub struct EntityDao<E: EntityType> {
    mapper: Arc<dyn Mapper>,
    cache: Arc<dyn Cache>,
    factory: Rc<EntityFactory<E>>,
    config: Config,
}

impl<E: EntityType> EntityDao<E> {
    /// Creates a DAO.
    pub fn new(
        mapper: Arc<dyn Mapper>,
        cache: Arc<dyn Cache>,
        factory: Rc<EntityFactory<E>>,
        config: Config,
    ) -> Self {
        Self {
            mapper,
            cache,
            factory,
            config,
        }
    }

    /// Returns the underlying mapper.
    #[must_use]
    pub fn mapper(&self) -> &Arc<dyn Mapper> {
        &self.mapper
    }

    /// Builds an uninitialized entity from a row.
    ///
    /// # Errors
    ///
    /// Propagates row decoding failures.
    pub fn hydrate(&self, row: &Row) -> CoreResult<E> {
        let builder = E::builder_from_row(row)?;
        let mut entity = self.factory.build(builder, false, None)?;
        if let Some(at) = row.get(CREATED_FIELD).and_then(parse_timestamp) {
            entity.set_created(Some(at));
        }
        if let Some(at) = row.get(MODIFIED_FIELD).and_then(parse_timestamp) {
            entity.set_modified(Some(at));
        }
        Ok(entity)
    }

    fn entity_options(&self, id: EntityId) -> SaveOptions {
        SaveOptions::new()
            .tag(self.kind().name())
            .tag(entity_cache_key(self.kind(), id))
            .ttl(self.config.entity_cache_ttl)
            .sliding(self.config.entity_cache_sliding)
    }

    fn query_options(&self) -> SaveOptions {
        SaveOptions::new()
            .tag(QUERY_TAG)
            .tag(query_tag(self.kind().name()))
            .ttl(self.config.query_cache_ttl)
    }

    fn cached_row(&self, id: EntityId) -> Option<Row> {
        match self.cache.load(&entity_cache_key(self.kind(), id)) {
            Some(Value::Object(map)) => Some(map.into_iter().collect()),
            _ => None,
        }
    }

    fn cache_row(&self, row: &Row) {
        if let Some(id) = entimap_storage::row_id(row) {
            let id = EntityId::from(id);
            let value = Value::Object(row.clone().into_iter().collect());
            self.cache
                .save(&entity_cache_key(self.kind(), id), value, self.entity_options(id));
        }
    }

    fn find_row(&self, id: EntityId) -> CoreResult<Option<Row>> {
        if let Some(row) = self.cached_row(id) {
            trace!(kind = %self.kind(), %id, "entity cache hit");
            return Ok(Some(row));
        }
        let row = self.mapper.find(id.as_u64())?;
        if let Some(row) = &row {
            self.cache_row(row);
        }
        Ok(row)
    }

    fn find_rows(&self, ids: &[EntityId]) -> CoreResult<Vec<Row>> {
        let mut found: HashMap<EntityId, Row> = HashMap::new();
        let mut missing: Vec<RowId> = Vec::new();
        for id in ids {
            match self.cached_row(*id) {
                Some(row) => {
                    found.insert(*id, row);
                }
                None => missing.push(id.as_u64()),
            }
        }
        if !missing.is_empty() {
            for row in self.mapper.find_by_ids(&missing)? {
                self.cache_row(&row);
                if let Some(id) = entimap_storage::row_id(&row) {
                    found.insert(EntityId::from(id), row);
                }
            }
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    fn find_ids(&self, filter: &Filter, options: &FindOptions) -> CoreResult<Vec<EntityId>> {
        let key = format!(
            "{}/{}/{}",
            query_tag(self.kind().name()),
            filter.cache_key(),
            options.cache_key()
        );
        if self.config.query_cache {
            if let Some(Value::Array(ids)) = self.cache.load(&key) {
                trace!(kind = %self.kind(), %key, "query cache hit");
                return Ok(ids
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(EntityId::new)
                    .collect());
            }
        }
        let ids = self.mapper.find_ids_by(filter, options)?;
        if self.config.query_cache {
            let value = Value::Array(ids.iter().map(|id| Value::from(*id)).collect());
            self.cache.save(&key, value, self.query_options());
        }
        Ok(ids.into_iter().map(EntityId::from).collect())
    }

    fn find_join_rows(&self, join_table: &str, filter: &Filter) -> CoreResult<Vec<Row>> {
        let key = format!("{}/{}", query_tag(join_table), filter.cache_key());
        if self.config.query_cache {
            if let Some(Value::Array(rows)) = self.cache.load(&key) {
                trace!(join = join_table, %key, "relation cache hit");
                return Ok(rows
                    .into_iter()
                    .filter_map(|row| match row {
                        Value::Object(map) => Some(map.into_iter().collect()),
                        _ => None,
                    })
                    .collect());
            }
        }
        let rows = self.mapper.find_relations(join_table, filter)?;
        if self.config.query_cache {
            let value = Value::Array(
                rows.iter()
                    .map(|row| Value::Object(row.clone().into_iter().collect()))
                    .collect(),
            );
            let options = SaveOptions::new()
                .tag(QUERY_TAG)
                .tag(query_tag(join_table))
                .ttl(self.config.query_cache_ttl);
            self.cache.save(&key, value, options);
        }
        Ok(rows)
    }

    fn hydrate_all(&self, rows: &[Row]) -> CoreResult<Vec<EntityRef>> {
        rows.iter()
            .map(|row| self.hydrate(row).map(entity_ref))
            .collect()
    }

    fn check_kind(&self, entity: &dyn Entity) -> CoreResult<()> {
        if entity.kind() == self.kind() {
            Ok(())
        } else {
            Err(CoreError::invalid_argument(format!(
                "{} DAO cannot write {}",
                self.kind(),
                entity.kind()
            )))
        }
    }

    fn evict(&self, id: EntityId) {
        self.cache.remove(&entity_cache_key(self.kind(), id));
    }

    fn clean_queries(&self, name: &str) {
        self.cache.clean(&[query_tag(name)]);
    }

    /// Marks a written entity persisted and snapshots it.
    fn mark_written(&self, entity: &mut dyn Entity, id: EntityId) {
        entity.assign_id(id);
        entity.metadata_mut().set_state(EntityState::Persisted);
        entity.update_original_data();
        self.evict(id);
    }
}

impl<E: EntityType> Dao for EntityDao<E> {
    fn kind(&self) -> &'static EntityKind {
        E::entity_kind()
    }

    fn next_identity(&self) -> CoreResult<EntityId> {
        self.factory.next_identity()
    }

    fn find(&self, id: EntityId) -> CoreResult<Option<EntityRef>> {
        self.find_row(id)?
            .map(|row| self.hydrate(&row).map(entity_ref))
            .transpose()
    }

    fn find_by_ids(&self, ids: &[EntityId]) -> CoreResult<Vec<EntityRef>> {
        let rows = self.find_rows(ids)?;
        self.hydrate_all(&rows)
    }

    fn find_by(&self, filter: &Filter, options: &FindOptions) -> CoreResult<Vec<EntityRef>> {
        let ids = self.find_ids(filter, options)?;
        self.find_by_ids(&ids)
    }

    fn find_one_by(&self, filter: &Filter) -> CoreResult<Option<EntityRef>> {
        Ok(self
            .find_by(filter, &FindOptions::new().limit(1))?
            .into_iter()
            .next())
    }

    fn find_all(&self, options: &FindOptions) -> CoreResult<Vec<EntityRef>> {
        self.find_by(&Filter::all(), options)
    }

    fn find_count(&self) -> CoreResult<usize> {
        self.find_count_by(&Filter::all())
    }

    fn find_count_by(&self, filter: &Filter) -> CoreResult<usize> {
        let key = format!("{}/count/{}", query_tag(self.kind().name()), filter.cache_key());
        if self.config.query_cache {
            if let Some(count) = self.cache.load(&key).and_then(|v| v.as_u64()) {
                return Ok(usize::try_from(count).unwrap_or(usize::MAX));
            }
        }
        let count = self.mapper.count_by(filter)?;
        if self.config.query_cache {
            self.cache
                .save(&key, Value::from(count), self.query_options());
        }
        Ok(count)
    }

    fn exists(&self, id: EntityId) -> CoreResult<bool> {
        Ok(self.find_row(id)?.is_some())
    }

    fn exists_by(&self, filter: &Filter) -> CoreResult<bool> {
        Ok(self.find_count_by(filter)? > 0)
    }

    fn find_in(&self, column: &str, values: &[Value]) -> CoreResult<Vec<EntityRef>> {
        let mut ids = Vec::new();
        for value in values {
            ids.extend(self.find_ids(&Filter::eq(column, value.clone()), &FindOptions::new())?);
        }
        ids.sort_unstable();
        ids.dedup();
        self.find_by_ids(&ids)
    }

    fn find_fields(&self, id: EntityId, columns: &[&str]) -> CoreResult<Option<Row>> {
        Ok(self.find_row(id)?.map(|row| project(&row, columns)))
    }

    fn find_field(&self, id: EntityId, column: &str) -> CoreResult<Option<Value>> {
        Ok(self.find_row(id)?.and_then(|mut row| row.remove(column)))
    }

    fn find_field_by(
        &self,
        column: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> CoreResult<Vec<Value>> {
        let ids = self.find_ids(filter, options)?;
        Ok(self
            .find_rows(&ids)?
            .into_iter()
            .map(|mut row| row.remove(column).unwrap_or(Value::Null))
            .collect())
    }

    fn relations(&self, join_table: &str, id: EntityId) -> CoreResult<Vec<Row>> {
        let filter = Filter::eq(self.kind().foreign_column(), id.as_u64());
        self.find_join_rows(join_table, &filter)
    }

    fn relation_ids(
        &self,
        join_table: &str,
        id: EntityId,
        related: &EntityKind,
    ) -> CoreResult<Vec<EntityId>> {
        let column = related.foreign_column();
        Ok(self
            .relations(join_table, id)?
            .iter()
            .filter_map(|row| row.get(&column).and_then(Value::as_u64))
            .map(EntityId::new)
            .collect())
    }

    fn insert(&self, entity: &EntityRef) -> CoreResult<()> {
        let mut entity = entity.borrow_mut();
        self.check_kind(&*entity)?;
        if entity.created().is_none() {
            entity.set_created(None);
        }
        self.factory.apply_identity_floor()?;
        let id = self.mapper.insert(entity.data())?;
        self.mark_written(&mut *entity, EntityId::from(id));
        self.clean_queries(self.kind().name());
        debug!(kind = %self.kind(), id, "insert");
        Ok(())
    }

    fn batch_insert(&self, entities: &[EntityRef]) -> CoreResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut entity = entity.borrow_mut();
            self.check_kind(&*entity)?;
            if entity.created().is_none() {
                entity.set_created(None);
            }
            rows.push(entity.data());
        }
        self.factory.apply_identity_floor()?;
        let ids = self.mapper.batch_insert(rows)?;
        for (entity, id) in entities.iter().zip(ids) {
            self.mark_written(&mut *entity.borrow_mut(), EntityId::from(id));
        }
        self.clean_queries(self.kind().name());
        debug!(kind = %self.kind(), count = entities.len(), "batch insert");
        Ok(())
    }

    fn update(&self, entity: &EntityRef) -> CoreResult<()> {
        let mut entity = entity.borrow_mut();
        self.check_kind(&*entity)?;
        let id = entity.id().ok_or_else(|| {
            CoreError::invalid_argument(format!("cannot update {} without id", self.kind()))
        })?;
        let mut changes = entity.changed_data();
        changes.remove(ID_COLUMN);
        if !changes.is_empty() {
            trace!(kind = %self.kind(), %id, columns = changes.len(), "update");
            self.mapper.update(id.as_u64(), changes)?;
        }
        self.mark_written(&mut *entity, id);
        self.clean_queries(self.kind().name());
        Ok(())
    }

    fn delete(&self, entity: &EntityRef) -> CoreResult<bool> {
        let id = {
            let entity = entity.borrow();
            self.check_kind(&*entity)?;
            entity.id().ok_or_else(|| {
                CoreError::invalid_argument(format!("cannot delete {} without id", self.kind()))
            })?
        };
        self.delete_by_id(id)
    }

    fn delete_by_id(&self, id: EntityId) -> CoreResult<bool> {
        self.evict(id);
        let deleted = self.mapper.delete_by_id(id.as_u64())?;
        self.cache.clean(&[QUERY_TAG.to_string()]);
        debug!(kind = %self.kind(), %id, deleted, "delete");
        Ok(deleted)
    }

    fn delete_all(&self) -> CoreResult<usize> {
        let count = self.mapper.delete_all()?;
        self.cache
            .clean(&[self.kind().name().to_string(), QUERY_TAG.to_string()]);
        debug!(kind = %self.kind(), count, "delete all");
        Ok(count)
    }

    fn update_many(&self, filter: &Filter, mut changes: Row) -> CoreResult<usize> {
        changes.remove(ID_COLUMN);
        if changes.is_empty() {
            return Ok(0);
        }
        let ids = self.mapper.find_ids_by(filter, &FindOptions::new())?;
        for id in &ids {
            self.evict(EntityId::from(*id));
            self.mapper.update(*id, changes.clone())?;
        }
        self.clean_queries(self.kind().name());
        debug!(kind = %self.kind(), count = ids.len(), "update many");
        Ok(ids.len())
    }

    fn add_relation(&self, relation: &ManyToManyRelation) -> CoreResult<()> {
        let row = relation.join_row()?;
        self.mapper.add_relation(relation.table(), row)?;
        self.clean_queries(relation.table());
        Ok(())
    }

    fn remove_relation(&self, relation: &ManyToManyRelation) -> CoreResult<bool> {
        let row = relation.join_row()?;
        let removed = self.mapper.remove_relation(relation.table(), &row)?;
        self.clean_queries(relation.table());
        Ok(removed)
    }
}

/// Keeps the listed columns of a row; missing columns are skipped.
fn project(row: &Row, columns: &[&str]) -> Row {
    columns
        .iter()
        .filter_map(|column| row.get(*column).map(|v| ((*column).to_string(), v.clone())))
        .collect()
}

impl<E: EntityType> fmt::Debug for EntityDao<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDao")
            .field("kind", &self.kind().name())
            .field("table", &self.mapper.table())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::entity::tests::{Line, Note, LINE, NOTE};
    use crate::entity::{EntityCore, EntityRefExt};
    use crate::event::DomainEventPublisher;
    use crate::factory::tests::NoteBuilder;
    use entimap_storage::{MemoryStore, Statement, TableSchema};

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        dao: EntityDao<Note>,
    }

    fn create_fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.create_table(TableSchema::new("note"));
        store.create_table(TableSchema::join("note_line"));
        let cache = Arc::new(MemoryCache::new());
        let mapper: Arc<dyn Mapper> = Arc::new(store.mapper("note"));
        let factory = Rc::new(EntityFactory::new(
            Arc::clone(&mapper),
            Rc::new(DomainEventPublisher::new()),
        ));
        let dao = EntityDao::new(mapper, cache.clone(), factory, Config::default());
        Fixture { store, cache, dao }
    }

    fn create_note(text: &str) -> EntityRef {
        entity_ref(Note::new(None, text))
    }

    #[test]
    fn insert_assigns_id_and_snapshots() {
        let f = create_fixture();
        let note = create_note("a");
        f.dao.insert(&note).unwrap();

        let n = note.borrow();
        assert_eq!(n.id(), Some(EntityId::new(1)));
        assert!(n.metadata().state().is_persisted());
        assert!(n.created().is_some());
        assert!(!n.is_changed());
        assert_eq!(f.store.rows("note").len(), 1);
    }

    #[test]
    fn find_is_read_through() {
        let f = create_fixture();
        f.dao.insert(&create_note("a")).unwrap();
        f.store.clear_statements();

        let first = f.dao.find(EntityId::new(1)).unwrap().unwrap();
        let second = f.dao.find(EntityId::new(1)).unwrap().unwrap();

        assert_eq!(f.store.statements().len(), 1);
        assert!(f.cache.contains("Note/1"));
        assert!(!first.same_instance(&second));
        assert_eq!(second.borrow_as::<Note>().unwrap().text, "a");
        assert!(second.borrow().created().is_some());
        assert!(second.borrow().metadata().state().is_persisted());
    }

    #[test]
    fn find_missing_returns_none() {
        let f = create_fixture();
        assert!(f.dao.find(EntityId::new(5)).unwrap().is_none());
        assert!(!f.dao.exists(EntityId::new(5)).unwrap());
    }

    #[test]
    fn update_writes_changed_columns_and_evicts() {
        let f = create_fixture();
        let note = create_note("a");
        f.dao.insert(&note).unwrap();
        f.dao.find(EntityId::new(1)).unwrap();
        f.store.clear_statements();

        note.borrow_mut_as::<Note>().unwrap().text = "b".into();
        f.dao.update(&note).unwrap();

        let writes = f.store.writes();
        assert_eq!(writes.len(), 1);
        match &writes[0] {
            Statement::Update { changes, .. } => {
                assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["text"]);
            }
            other => panic!("unexpected statement {other}"),
        }
        assert!(!f.cache.contains("Note/1"));
        assert!(!note.borrow().is_changed());
    }

    #[test]
    fn unchanged_update_issues_no_statement() {
        let f = create_fixture();
        let note = create_note("a");
        f.dao.insert(&note).unwrap();
        f.store.clear_statements();

        f.dao.update(&note).unwrap();
        assert!(f.store.writes().is_empty());
    }

    #[test]
    fn batch_insert_keeps_input_order() {
        let f = create_fixture();
        let notes: Vec<EntityRef> = ["a", "b", "c"].iter().map(|t| create_note(t)).collect();
        f.dao.batch_insert(&notes).unwrap();

        let ids: Vec<_> = notes.iter().map(|n| n.entity_id().unwrap().as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(f.store.writes().len(), 1);
    }

    #[test]
    fn find_by_ids_preserves_requested_order() {
        let f = create_fixture();
        for text in ["a", "b", "c"] {
            f.dao.insert(&create_note(text)).unwrap();
        }
        f.dao.find(EntityId::new(2)).unwrap();

        let found = f
            .dao
            .find_by_ids(&[EntityId::new(3), EntityId::new(9), EntityId::new(2), EntityId::new(1)])
            .unwrap();
        let texts: Vec<String> = found
            .iter()
            .map(|n| n.borrow_as::<Note>().unwrap().text.clone())
            .collect();
        assert_eq!(texts, vec!["c", "b", "a"]);
    }

    #[test]
    fn query_cache_is_cleaned_by_writes() {
        let f = create_fixture();
        f.dao.insert(&create_note("a")).unwrap();
        assert_eq!(f.dao.find_count().unwrap(), 1);
        assert_eq!(f.dao.find_all(&FindOptions::new()).unwrap().len(), 1);

        f.dao.insert(&create_note("b")).unwrap();
        assert_eq!(f.dao.find_count().unwrap(), 2);
        assert_eq!(f.dao.find_all(&FindOptions::new()).unwrap().len(), 2);

        f.dao.delete_by_id(EntityId::new(1)).unwrap();
        assert_eq!(f.dao.find_count_by(&Filter::all()).unwrap(), 1);
        assert!(f.dao.exists_by(&Filter::eq("text", "b")).unwrap());
        assert!(f
            .dao
            .find_one_by(&Filter::eq("text", "a"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_requires_id_and_kind() {
        let f = create_fixture();
        assert!(matches!(
            f.dao.delete(&create_note("a")),
            Err(CoreError::InvalidArgument { .. })
        ));

        let line = entity_ref(Line {
            core: EntityCore::new(None),
            note_id: 1,
        });
        assert!(matches!(
            f.dao.insert(&line),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn delete_all_cleans_entity_cache() {
        let f = create_fixture();
        f.dao.insert(&create_note("a")).unwrap();
        f.dao.find(EntityId::new(1)).unwrap();

        assert_eq!(f.dao.delete_all().unwrap(), 1);
        assert!(f.cache.is_empty());
        assert!(f.dao.find(EntityId::new(1)).unwrap().is_none());
    }

    #[test]
    fn relations_write_join_rows() {
        let f = create_fixture();
        let note = create_note("a");
        f.dao.insert(&note).unwrap();
        let line = entity_ref(Line {
            core: EntityCore::new(Some(EntityId::new(8))),
            note_id: 1,
        });

        let relation = ManyToManyRelation::persist("note_line", note, line);
        f.dao.add_relation(&relation).unwrap();
        assert_eq!(f.store.links("note_line").len(), 1);
        assert!(f
            .dao
            .add_relation(&relation)
            .is_err_and(|e| e.is_duplicate_entry()));

        assert!(f.dao.remove_relation(&relation).unwrap());
        assert!(!f.dao.remove_relation(&relation).unwrap());
        assert!(f.store.links("note_line").is_empty());
    }

    #[test]
    fn relation_reads_are_cached_until_the_join_table_changes() {
        let f = create_fixture();
        let note = create_note("a");
        f.dao.insert(&note).unwrap();
        let line = |id: u64| {
            entity_ref(Line {
                core: EntityCore::new(Some(EntityId::new(id))),
                note_id: 1,
            })
        };
        f.dao
            .add_relation(&ManyToManyRelation::persist("note_line", Rc::clone(&note), line(8)))
            .unwrap();
        f.store.clear_statements();

        let ids = f.dao.relation_ids("note_line", EntityId::new(1), &LINE).unwrap();
        assert_eq!(ids, vec![EntityId::new(8)]);
        assert_eq!(f.dao.relations("note_line", EntityId::new(1)).unwrap().len(), 1);
        assert_eq!(f.store.statements().len(), 1);
        assert!(f.dao.relations("note_line", EntityId::new(2)).unwrap().is_empty());

        f.dao
            .add_relation(&ManyToManyRelation::persist("note_line", note, line(9)))
            .unwrap();
        let ids = f.dao.relation_ids("note_line", EntityId::new(1), &LINE).unwrap();
        assert_eq!(ids, vec![EntityId::new(8), EntityId::new(9)]);
    }

    #[test]
    fn field_projections_skip_hydration() {
        let f = create_fixture();
        for text in ["a", "b", "b"] {
            f.dao.insert(&create_note(text)).unwrap();
        }

        let fields = f.dao.find_fields(EntityId::new(2), &["text", "missing"]).unwrap().unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["text"]);
        assert_eq!(
            f.dao.find_field(EntityId::new(1), "text").unwrap(),
            Some(Value::from("a"))
        );
        assert!(f.dao.find_field(EntityId::new(7), "text").unwrap().is_none());
        assert_eq!(
            f.dao
                .find_field_by(ID_COLUMN, &Filter::eq("text", "b"), &FindOptions::new())
                .unwrap(),
            vec![Value::from(2), Value::from(3)]
        );
    }

    #[test]
    fn find_in_merges_matches_by_id() {
        let f = create_fixture();
        for text in ["a", "b", "c", "a"] {
            f.dao.insert(&create_note(text)).unwrap();
        }

        let found = f
            .dao
            .find_in("text", &[Value::from("c"), Value::from("a"), Value::from("z")])
            .unwrap();
        let ids: Vec<u64> = found.iter().map(|n| n.entity_id().unwrap().as_u64()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn update_many_writes_matching_rows_and_cleans_caches() {
        let f = create_fixture();
        for text in ["a", "b", "a"] {
            f.dao.insert(&create_note(text)).unwrap();
        }
        f.dao.find(EntityId::new(1)).unwrap();
        assert_eq!(f.dao.find_count_by(&Filter::eq("text", "z")).unwrap(), 0);

        let mut changes = Row::new();
        changes.insert("text".into(), Value::from("z"));
        changes.insert(ID_COLUMN.into(), Value::from(99));
        assert_eq!(f.dao.update_many(&Filter::eq("text", "a"), changes).unwrap(), 2);

        assert!(!f.cache.contains("Note/1"));
        assert_eq!(f.dao.find_count_by(&Filter::eq("text", "z")).unwrap(), 2);
        assert_eq!(f.store.row("note", 3).unwrap()["text"], Value::from("z"));
        assert!(f.store.row("note", 99).is_none());
        assert_eq!(f.dao.update_many(&Filter::all(), Row::new()).unwrap(), 0);
    }

    #[test]
    fn hydrate_reads_timestamps() {
        let f = create_fixture();
        let built = f
            .dao
            .factory
            .build(NoteBuilder::text("a"), false, None)
            .unwrap();
        let mut row = built.data();
        row.insert(CREATED_FIELD.into(), Value::from("2024-01-02T03:04:05.000000Z"));
        let hydrated = f.dao.hydrate(&row).unwrap();

        assert_eq!(hydrated.kind(), &NOTE);
        assert_eq!(
            hydrated.created().map(|c| c.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );
        assert!(hydrated.modified().is_none());
    }
}
