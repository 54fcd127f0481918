//! Identity map and change-tracking registry.
//!
//! The unit of work tracks at most one entity instance per
//! (kind, [`EntityKey`]) and queues many-to-many relation operations until
//! the next flush. It never talks to storage; the entity manager reads its
//! entity sets and drives the writes.
//!
//! Iteration follows attach order. Re-attaching an entity moves it to the
//! end.

use crate::entity::{EntityFlag, EntityRef, EntityRefExt, EntitySnapshot, Entity};
use crate::relation::ManyToManyRelation;
use crate::types::{EntityId, EntityKey, EntityKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

#[derive(Clone)]
struct KindEntries {
    kind: &'static EntityKind,
    entries: BTreeMap<u64, (EntityKey, EntityRef)>,
    index: HashMap<EntityKey, u64>,
}

impl KindEntries {
    fn new(kind: &'static EntityKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    fn remove_seq(&mut self, seq: u64) -> Option<EntityRef> {
        let (key, entity) = self.entries.remove(&seq)?;
        self.index.remove(&key);
        Some(entity)
    }
}

/// Entity groups keyed by kind, in order of first appearance.
pub type EntityGroups = Vec<(&'static EntityKind, Vec<EntityRef>)>;

/// State captured by [`UnitOfWork::checkpoint`].
pub struct UnitOfWorkCheckpoint {
    kinds: Vec<KindEntries>,
    relations: Vec<(&'static str, Vec<ManyToManyRelation>)>,
    next_seq: u64,
    snapshots: Vec<(EntityRef, EntitySnapshot)>,
}

impl fmt::Debug for UnitOfWorkCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkCheckpoint")
            .field("entities", &self.snapshots.len())
            .field("relations", &self.relations.len())
            .finish()
    }
}

fn address(entity: &EntityRef) -> usize {
    Rc::as_ptr(entity).cast::<()>() as usize
}

/// Identity map plus pending relation operations for one logical
/// transaction.
#[derive(Default)]
pub struct UnitOfWork {
    kinds: Vec<KindEntries>,
    relations: Vec<(&'static str, Vec<ManyToManyRelation>)>,
    next_seq: u64,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self, kind: &str) -> Option<&KindEntries> {
        self.kinds.iter().find(|k| k.kind.name() == kind)
    }

    fn entries_mut(&mut self, kind: &'static EntityKind) -> &mut KindEntries {
        let pos = match self.kinds.iter().position(|k| k.kind == kind) {
            Some(pos) => pos,
            None => {
                self.kinds.push(KindEntries::new(kind));
                self.kinds.len() - 1
            }
        };
        &mut self.kinds[pos]
    }

    /// Finds where an entity is tracked: first by its current key, then by
    /// instance for entities whose key changed after attach.
    fn locate(&self, entity: &EntityRef) -> Option<(usize, u64)> {
        let (kind, key) = {
            let e = entity.borrow();
            (e.kind(), e.key())
        };
        let pos = self.kinds.iter().position(|k| k.kind == kind)?;
        let entries = &self.kinds[pos];
        if let Some(seq) = entries.index.get(&key) {
            return Some((pos, *seq));
        }
        entries
            .entries
            .iter()
            .find(|(_, (_, tracked))| Rc::ptr_eq(tracked, entity))
            .map(|(seq, _)| (pos, *seq))
    }

    /// Tracks an entity, replacing any instance tracked under the same key.
    ///
    /// The replaced instance is detached without cascading.
    pub fn attach(&mut self, entity: EntityRef) {
        let (kind, key) = {
            let e = entity.borrow();
            (e.kind(), e.key())
        };
        if let Some(existing) = self.load_key(kind.name(), key) {
            self.detach(&existing, false);
        }
        if let Some((pos, seq)) = self.locate(&entity) {
            self.kinds[pos].remove_seq(seq);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let entries = self.entries_mut(kind);
        entries.entries.insert(seq, (key, entity));
        entries.index.insert(key, seq);
        trace!(kind = %kind, key = %key, "attach");
    }

    /// Stops tracking an entity and clears its removal flag.
    ///
    /// With `cascade`, queued relations referencing the entity are dropped
    /// and, for aggregate roots, every tracked member of the aggregate is
    /// detached too. Detaching an untracked entity does nothing.
    pub fn detach(&mut self, entity: &EntityRef, cascade: bool) {
        let Some((pos, seq)) = self.locate(entity) else {
            return;
        };
        self.kinds[pos].remove_seq(seq);
        entity
            .borrow_mut()
            .remove_flag(EntityFlag::PendingRemoval);

        let (kind, id) = {
            let e = entity.borrow();
            (e.kind(), e.id())
        };
        trace!(kind = %kind, cascade, "detach");
        if !cascade {
            return;
        }

        self.remove_relations_by_entity(entity);
        if let (true, Some(root_id)) = (kind.is_aggregate_root(), id) {
            for member in self.members_of(kind, root_id) {
                self.detach(&member, true);
            }
        }
    }

    fn members_of(&self, root: &'static EntityKind, root_id: EntityId) -> Vec<EntityRef> {
        self.entities_by(|e| {
            e.aggregate_link()
                .is_some_and(|link| link.root == root && link.root_id == root_id)
        })
    }

    /// Tracks an entity and schedules it for removal at the next flush.
    pub fn remove(&mut self, entity: &EntityRef) {
        self.attach(Rc::clone(entity));
        entity.borrow_mut().set_flag(EntityFlag::PendingRemoval);
    }

    fn load_key(&self, kind: &str, key: EntityKey) -> Option<EntityRef> {
        let entries = self.entries(kind)?;
        let seq = entries.index.get(&key)?;
        entries.entries.get(seq).map(|(_, e)| Rc::clone(e))
    }

    /// Looks up the tracked instance of `kind` with `id`.
    ///
    /// Callers consult this before storage so that at most one live
    /// instance exists per (kind, id).
    #[must_use]
    pub fn load(&self, id: EntityId, kind: &str) -> Option<EntityRef> {
        self.load_key(kind, EntityKey::Id(id))
    }

    /// Returns every tracked entity, in attach order.
    #[must_use]
    pub fn all_entities(&self) -> Vec<EntityRef> {
        let mut all: Vec<(u64, &EntityRef)> = self
            .kinds
            .iter()
            .flat_map(|k| k.entries.iter().map(|(seq, (_, e))| (*seq, e)))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, e)| Rc::clone(e)).collect()
    }

    /// Returns the tracked entities matching `predicate`, in attach order.
    pub fn entities_by<F>(&self, predicate: F) -> Vec<EntityRef>
    where
        F: Fn(&dyn Entity) -> bool,
    {
        self.all_entities()
            .into_iter()
            .filter(|e| predicate(&*e.borrow()))
            .collect()
    }

    fn grouped<F>(&self, predicate: F) -> EntityGroups
    where
        F: Fn(&dyn Entity) -> bool,
    {
        let mut groups: EntityGroups = Vec::new();
        for entity in self.entities_by(predicate) {
            let kind = entity.entity_kind();
            match groups.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, group)) => group.push(entity),
                None => groups.push((kind, vec![entity])),
            }
        }
        groups
    }

    /// Returns new entities matching `predicate`, grouped by kind.
    pub fn unpersisted_entities<F>(&self, predicate: F) -> EntityGroups
    where
        F: Fn(&dyn Entity) -> bool,
    {
        self.grouped(|e| e.metadata().state().is_new() && predicate(e))
    }

    /// Returns persisted entities matching `predicate`, grouped by kind.
    pub fn persisted_entities<F>(&self, predicate: F) -> EntityGroups
    where
        F: Fn(&dyn Entity) -> bool,
    {
        self.grouped(|e| e.metadata().state().is_persisted() && predicate(e))
    }

    /// Returns the tracked entities of one kind, in attach order.
    #[must_use]
    pub fn entities_by_kind(&self, kind: &str) -> Vec<EntityRef> {
        self.entries(kind)
            .map(|k| k.entries.values().map(|(_, e)| Rc::clone(e)).collect())
            .unwrap_or_default()
    }

    /// Returns the number of tracked entities.
    #[must_use]
    pub fn entities_count(&self) -> usize {
        self.kinds.iter().map(|k| k.entries.len()).sum()
    }

    /// Returns `true` if this instance is tracked.
    #[must_use]
    pub fn is_tracked(&self, entity: &EntityRef) -> bool {
        self.locate(entity)
            .and_then(|(pos, seq)| self.kinds[pos].entries.get(&seq))
            .is_some_and(|(_, tracked)| Rc::ptr_eq(tracked, entity))
    }

    /// Queues a relation operation under its owner's kind.
    pub fn add_relation(&mut self, relation: ManyToManyRelation) {
        let owner = relation.owner_kind().name();
        trace!(owner, table = relation.table(), "queue relation");
        match self.relations.iter_mut().find(|(k, _)| *k == owner) {
            Some((_, queue)) => queue.push(relation),
            None => self.relations.push((owner, vec![relation])),
        }
    }

    /// Returns the queued relation operations, grouped by owner kind.
    pub fn relations(&self) -> impl Iterator<Item = &ManyToManyRelation> {
        self.relations.iter().flat_map(|(_, queue)| queue.iter())
    }

    /// Returns the queued relation operations owned by one kind.
    #[must_use]
    pub fn relations_of(&self, kind: &str) -> &[ManyToManyRelation] {
        self.relations
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(&[], |(_, queue)| queue.as_slice())
    }

    /// Returns the number of queued relation operations.
    #[must_use]
    pub fn relations_count(&self) -> usize {
        self.relations.iter().map(|(_, queue)| queue.len()).sum()
    }

    /// Drops every queued relation operation.
    pub fn clear_relations(&mut self) {
        self.relations.clear();
    }

    /// Drops queued relation operations with `entity` as an endpoint.
    pub fn remove_relations_by_entity(&mut self, entity: &EntityRef) {
        for (_, queue) in &mut self.relations {
            queue.retain(|relation| !relation.references(entity));
        }
        self.relations.retain(|(_, queue)| !queue.is_empty());
    }

    /// Detaches every entity of `kind` (with cascade), or everything plus
    /// the relation queue when `kind` is `None`.
    pub fn clear(&mut self, kind: Option<&str>) {
        let targets = match kind {
            Some(kind) => self.entities_by_kind(kind),
            None => self.all_entities(),
        };
        for entity in targets {
            self.detach(&entity, true);
        }
        if kind.is_none() {
            self.kinds.clear();
            self.relations.clear();
        }
    }

    /// Captures the registry, the relation queue and the restorable state
    /// of every tracked entity and relation endpoint.
    #[must_use]
    pub fn checkpoint(&self) -> UnitOfWorkCheckpoint {
        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();
        let endpoints = self
            .relations()
            .flat_map(|r| [Rc::clone(r.entity()), Rc::clone(r.related())]);
        for entity in self.all_entities().into_iter().chain(endpoints) {
            if seen.insert(address(&entity)) {
                let snapshot = entity.borrow().core().snapshot();
                snapshots.push((entity, snapshot));
            }
        }
        UnitOfWorkCheckpoint {
            kinds: self.kinds.clone(),
            relations: self.relations.clone(),
            next_seq: self.next_seq,
            snapshots,
        }
    }

    /// Returns to a checkpoint: the same instances tracked under the same
    /// keys, the same relation queue, and each captured entity's id,
    /// metadata and flags.
    pub fn restore(&mut self, checkpoint: UnitOfWorkCheckpoint) {
        self.kinds = checkpoint.kinds;
        self.relations = checkpoint.relations;
        self.next_seq = self.next_seq.max(checkpoint.next_seq);
        for (entity, snapshot) in checkpoint.snapshots {
            entity.borrow_mut().core_mut().restore(snapshot);
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for k in &self.kinds {
            let keys: Vec<String> = k.entries.values().map(|(key, _)| key.to_string()).collect();
            map.entry(&k.kind.name(), &keys);
        }
        map.finish()
    }
}
