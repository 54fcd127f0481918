//! Entity contract and shared entity state.
//!
//! Every persistable type embeds an [`EntityCore`] and implements
//! [`Entity`]. The core holds identity, [`EntityMetadata`], flags, hooks
//! and the injected event publisher; the trait derives change detection
//! from the type's [`Entity::to_fields`].
//!
//! Entities are shared as [`EntityRef`] handles
//! (`Rc<RefCell<dyn Entity>>`), so the identity map, relations, events and
//! callers all see the same instance.

mod builder;
mod metadata;
mod state;

pub use builder::{AnyBuilder, EntityBuilder, EntityType};
pub use metadata::{
    parse_timestamp, timestamp_value, EntityMetadata, CREATED_FIELD, MODIFIED_FIELD,
};
pub use state::EntityState;

use crate::error::{CoreError, CoreResult};
use crate::event::{DomainEvent, DomainEventPublisher};
use crate::types::{EntityId, EntityKey, EntityKind, InstanceToken};
use chrono::{DateTime, Utc};
use entimap_storage::{Row, Value, ID_COLUMN};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Shared handle to an entity.
pub type EntityRef = Rc<RefCell<dyn Entity>>;

/// Callback run after an entity is saved or removed by a flush.
pub type EntityHook = Rc<dyn Fn(&EntityRef) -> CoreResult<()>>;

/// Wraps an entity into a shared handle.
pub fn entity_ref<E: Entity>(entity: E) -> EntityRef {
    Rc::new(RefCell::new(entity))
}

/// Named transient entity states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityFlag {
    /// The entity is scheduled for deletion at the next flush.
    PendingRemoval,
}

impl EntityFlag {
    const fn bit(self) -> u8 {
        match self {
            Self::PendingRemoval => 1,
        }
    }
}

/// Set of [`EntityFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityFlags(u8);

impl EntityFlags {
    /// Adds a flag.
    pub fn insert(&mut self, flag: EntityFlag) {
        self.0 |= flag.bit();
    }

    /// Removes a flag.
    pub fn remove(&mut self, flag: EntityFlag) {
        self.0 &= !flag.bit();
    }

    /// Returns whether a flag is set.
    #[must_use]
    pub fn contains(self, flag: EntityFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns whether no flag is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Reference from an aggregate member to its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateLink {
    /// Kind of the aggregate root.
    pub root: &'static EntityKind,
    /// Id of the aggregate root.
    pub root_id: EntityId,
}

/// Restorable part of an entity's state, captured before a flush.
#[derive(Debug, Clone)]
pub(crate) struct EntitySnapshot {
    id: Option<EntityId>,
    metadata: EntityMetadata,
    flags: EntityFlags,
}

/// State shared by all entity types.
pub struct EntityCore {
    id: Option<EntityId>,
    metadata: EntityMetadata,
    flags: EntityFlags,
    token: InstanceToken,
    publisher: Option<Rc<DomainEventPublisher>>,
    on_save: Vec<EntityHook>,
    on_remove: Vec<EntityHook>,
}

impl EntityCore {
    /// Creates the core of a new entity instance.
    ///
    /// The metadata state is `Persisted` when an id is given and `New`
    /// otherwise.
    #[must_use]
    pub fn new(id: Option<EntityId>) -> Self {
        let state = if id.is_some() {
            EntityState::Persisted
        } else {
            EntityState::New
        };
        Self {
            id,
            metadata: EntityMetadata::new(state),
            flags: EntityFlags::default(),
            token: InstanceToken::new(),
            publisher: None,
            on_save: Vec::new(),
            on_remove: Vec::new(),
        }
    }

    /// Returns the id.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Returns the per-instance token.
    #[must_use]
    pub fn token(&self) -> InstanceToken {
        self.token
    }

    /// Returns the flags.
    #[must_use]
    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    /// Returns the injected event publisher.
    #[must_use]
    pub fn publisher(&self) -> Option<&Rc<DomainEventPublisher>> {
        self.publisher.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: Option<EntityId>) {
        self.id = id;
    }

    pub(crate) fn set_publisher(&mut self, publisher: Rc<DomainEventPublisher>) {
        self.publisher = Some(publisher);
    }

    pub(crate) fn save_hooks(&self) -> Vec<EntityHook> {
        self.on_save.clone()
    }

    pub(crate) fn remove_hooks(&self) -> Vec<EntityHook> {
        self.on_remove.clone()
    }

    pub(crate) fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            metadata: self.metadata.clone(),
            flags: self.flags,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: EntitySnapshot) {
        self.id = snapshot.id;
        self.metadata = snapshot.metadata;
        self.flags = snapshot.flags;
    }
}

impl fmt::Debug for EntityCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCore")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("flags", &self.flags)
            .field("token", &self.token)
            .field("on_save", &self.on_save.len())
            .field("on_remove", &self.on_remove.len())
            .finish_non_exhaustive()
    }
}

/// Upcast to [`Any`] for downcasting entity handles.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The contract every persistable object implements.
///
/// Implementors supply their kind, access to the embedded [`EntityCore`]
/// and their domain fields. Identity, timestamps, change detection and
/// flags are provided.
///
/// # Change Detection
///
/// [`Entity::data`] is the domain fields plus `id`, `created` and
/// `modified`. An entity is changed when it is new or when its data differs
/// from the snapshot taken at the last point it matched storage.
pub trait Entity: AsAny {
    /// Returns the static kind of this entity.
    fn kind(&self) -> &'static EntityKind;

    /// Returns the embedded core.
    fn core(&self) -> &EntityCore;

    /// Returns the embedded core mutably.
    fn core_mut(&mut self) -> &mut EntityCore;

    /// Serializes the domain fields (everything but id and timestamps).
    fn to_fields(&self) -> Row;

    /// Returns the aggregate root this entity belongs to, if any.
    fn aggregate_link(&self) -> Option<AggregateLink> {
        None
    }

    /// Returns the id.
    fn id(&self) -> Option<EntityId> {
        self.core().id()
    }

    /// Assigns an id. The lifecycle state is left alone.
    fn assign_id(&mut self, id: EntityId) {
        self.core_mut().set_id(Some(id));
    }

    /// Returns the identity-map key.
    fn key(&self) -> EntityKey {
        match self.id() {
            Some(id) => EntityKey::Id(id),
            None => EntityKey::Transient(self.core().token()),
        }
    }

    /// Returns the metadata.
    fn metadata(&self) -> &EntityMetadata {
        &self.core().metadata
    }

    /// Returns the metadata mutably.
    fn metadata_mut(&mut self) -> &mut EntityMetadata {
        &mut self.core_mut().metadata
    }

    /// Returns the creation timestamp.
    fn created(&self) -> Option<DateTime<Utc>> {
        self.metadata().created()
    }

    /// Sets the creation timestamp; `None` means now.
    fn set_created(&mut self, at: Option<DateTime<Utc>>) {
        self.metadata_mut().set_created(at);
    }

    /// Returns the modification timestamp.
    fn modified(&self) -> Option<DateTime<Utc>> {
        self.metadata().modified()
    }

    /// Sets the modification timestamp; `None` means now.
    fn set_modified(&mut self, at: Option<DateTime<Utc>>) {
        self.metadata_mut().set_modified(at);
    }

    /// Returns the full row image of the entity.
    fn data(&self) -> Row {
        let mut data = self.to_fields();
        data.insert(
            ID_COLUMN.to_string(),
            self.id().map_or(Value::Null, |id| Value::from(id.as_u64())),
        );
        data.insert(CREATED_FIELD.to_string(), timestamp_value(self.created()));
        data.insert(MODIFIED_FIELD.to_string(), timestamp_value(self.modified()));
        data
    }

    /// Returns whether the entity differs from storage.
    fn is_changed(&self) -> bool {
        self.metadata().state().is_new()
            || self.metadata().original_data() != Some(&self.data())
    }

    /// Returns the columns whose values differ from the snapshot.
    fn changed_data(&self) -> Row {
        let data = self.data();
        match self.metadata().original_data() {
            Some(original) => data
                .into_iter()
                .filter(|(column, value)| original.get(column) != Some(value))
                .collect(),
            None => data,
        }
    }

    /// Takes a new snapshot after a successful write.
    fn update_original_data(&mut self) {
        let data = self.data();
        self.metadata_mut().set_original_data(data);
    }

    /// Sets a flag.
    fn set_flag(&mut self, flag: EntityFlag) {
        self.core_mut().flags.insert(flag);
    }

    /// Returns whether a flag is set.
    fn has_flag(&self, flag: EntityFlag) -> bool {
        self.core().flags.contains(flag)
    }

    /// Clears a flag.
    fn remove_flag(&mut self, flag: EntityFlag) {
        self.core_mut().flags.remove(flag);
    }

    /// Returns `true` unless the entity is scheduled for removal.
    fn should_persist(&self) -> bool {
        !self.should_remove()
    }

    /// Returns `true` if the entity is scheduled for removal.
    fn should_remove(&self) -> bool {
        self.has_flag(EntityFlag::PendingRemoval)
    }

    /// Returns `true` for entities of the same concrete type with the same
    /// assigned id. Entities without ids are never equal.
    fn equals(&self, other: &dyn Entity) -> bool {
        self.as_any().type_id() == other.as_any().type_id()
            && self.id().is_some()
            && self.id() == other.id()
    }

    /// Registers a callback run after the entity is saved by a flush.
    fn on_save(&mut self, hook: EntityHook) {
        self.core_mut().on_save.push(hook);
    }

    /// Registers a callback run after the entity is deleted.
    fn on_remove(&mut self, hook: EntityHook) {
        self.core_mut().on_remove.push(hook);
    }

    /// Publishes a domain event through the injected publisher.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidArgument`] if the entity has not been
    /// initialized by its factory, or with the first subscriber error.
    fn publish_event(&self, event: DomainEvent) -> CoreResult<()> {
        match self.core().publisher() {
            Some(publisher) => publisher.publish(&event),
            None => Err(CoreError::invalid_argument(format!(
                "{} has no event publisher; initialize it first",
                self.kind()
            ))),
        }
    }
}

/// Convenience methods on [`EntityRef`] handles.
pub trait EntityRefExt {
    /// Borrows the entity as its concrete type.
    ///
    /// Returns `None` if the entity is of another type.
    fn borrow_as<E: Entity>(&self) -> Option<Ref<'_, E>>;

    /// Mutably borrows the entity as its concrete type.
    fn borrow_mut_as<E: Entity>(&self) -> Option<RefMut<'_, E>>;

    /// Returns the entity's kind.
    fn entity_kind(&self) -> &'static EntityKind;

    /// Returns the entity's id.
    fn entity_id(&self) -> Option<EntityId>;

    /// Returns whether both handles point to the same instance.
    fn same_instance(&self, other: &EntityRef) -> bool;

    /// Publishes a domain event without holding a borrow of the entity
    /// while subscribers run.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::publish_event`].
    fn publish(&self, event: DomainEvent) -> CoreResult<()>;
}

impl EntityRefExt for EntityRef {
    fn borrow_as<E: Entity>(&self) -> Option<Ref<'_, E>> {
        Ref::filter_map(self.borrow(), |e| e.as_any().downcast_ref::<E>()).ok()
    }

    fn borrow_mut_as<E: Entity>(&self) -> Option<RefMut<'_, E>> {
        RefMut::filter_map(self.borrow_mut(), |e| e.as_any_mut().downcast_mut::<E>()).ok()
    }

    fn entity_kind(&self) -> &'static EntityKind {
        self.borrow().kind()
    }

    fn entity_id(&self) -> Option<EntityId> {
        self.borrow().id()
    }

    fn same_instance(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(self, other)
    }

    fn publish(&self, event: DomainEvent) -> CoreResult<()> {
        let publisher = {
            let entity = self.borrow();
            entity.core().publisher().cloned().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "{} has no event publisher; initialize it first",
                    entity.kind()
                ))
            })?
        };
        publisher.publish(&event)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) static NOTE: EntityKind = EntityKind::new("Note", "note").aggregate_root();
    pub(crate) static LINE: EntityKind = EntityKind::new("Line", "line");

    #[derive(Debug)]
    pub(crate) struct Note {
        pub(crate) core: EntityCore,
        pub(crate) text: String,
    }

    impl Note {
        pub(crate) fn new(id: Option<u64>, text: &str) -> Self {
            Self {
                core: EntityCore::new(id.map(EntityId::new)),
                text: text.to_string(),
            }
        }
    }

    impl Entity for Note {
        fn kind(&self) -> &'static EntityKind {
            &NOTE
        }

        fn core(&self) -> &EntityCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut EntityCore {
            &mut self.core
        }

        fn to_fields(&self) -> Row {
            let mut row = Row::new();
            row.insert("text".into(), Value::from(self.text.clone()));
            row
        }
    }

    #[derive(Debug)]
    pub(crate) struct Line {
        pub(crate) core: EntityCore,
        pub(crate) note_id: u64,
    }

    impl Entity for Line {
        fn kind(&self) -> &'static EntityKind {
            &LINE
        }

        fn core(&self) -> &EntityCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut EntityCore {
            &mut self.core
        }

        fn to_fields(&self) -> Row {
            let mut row = Row::new();
            row.insert("note_id".into(), Value::from(self.note_id));
            row
        }

        fn aggregate_link(&self) -> Option<AggregateLink> {
            Some(AggregateLink {
                root: &NOTE,
                root_id: EntityId::new(self.note_id),
            })
        }
    }

    #[test]
    fn state_is_derived_from_id() {
        assert!(Note::new(None, "a").metadata().state().is_new());
        assert!(Note::new(Some(1), "a").metadata().state().is_persisted());
    }

    #[test]
    fn new_entity_is_always_changed() {
        let note = Note::new(None, "a");
        assert!(note.is_changed());
    }

    #[test]
    fn snapshot_then_is_changed_is_false() {
        let mut note = Note::new(Some(1), "a");
        assert!(note.is_changed());
        note.update_original_data();
        assert!(!note.is_changed());
        assert!(note.changed_data().is_empty());
    }

    #[test]
    fn changed_data_lists_changed_columns_only() {
        let mut note = Note::new(Some(2), "a");
        note.update_original_data();
        note.text = "b".into();

        let changes = note.changed_data();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["text"], Value::from("b"));
    }

    #[test]
    fn touching_modified_is_a_change() {
        let mut note = Note::new(Some(2), "a");
        note.set_modified(Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        note.update_original_data();

        note.set_modified(None);
        assert!(note.is_changed());
        assert_eq!(
            note.changed_data().keys().collect::<Vec<_>>(),
            vec![MODIFIED_FIELD]
        );
    }

    #[test]
    fn flags_are_named_states() {
        let mut note = Note::new(Some(1), "a");
        assert!(note.should_persist());
        note.set_flag(EntityFlag::PendingRemoval);
        assert!(note.should_remove());
        assert!(!note.should_persist());
        note.remove_flag(EntityFlag::PendingRemoval);
        assert!(note.core().flags().is_empty());
    }

    #[test]
    fn equals_requires_same_type_and_id() {
        let a = Note::new(Some(1), "a");
        let b = Note::new(Some(1), "b");
        let c = Note::new(Some(2), "a");
        let line = Line {
            core: EntityCore::new(Some(EntityId::new(1))),
            note_id: 1,
        };

        assert!(a.equals(&b));
        assert!(!a.equals(&c));
        assert!(!a.equals(&line));
        assert!(!Note::new(None, "a").equals(&Note::new(None, "a")));
    }

    #[test]
    fn key_uses_id_or_token() {
        let mut note = Note::new(None, "a");
        let EntityKey::Transient(token) = note.key() else {
            panic!("expected transient key");
        };
        assert_eq!(token, note.core().token());

        note.assign_id(EntityId::new(9));
        assert_eq!(note.key(), EntityKey::Id(EntityId::new(9)));
    }

    #[test]
    fn handles_downcast_to_concrete_type() {
        let handle = entity_ref(Note::new(Some(1), "a"));
        assert!(handle.borrow_as::<Line>().is_none());
        handle.borrow_mut_as::<Note>().unwrap().text = "b".into();
        assert_eq!(handle.borrow_as::<Note>().unwrap().text, "b");
        assert_eq!(handle.entity_kind(), &NOTE);
        assert!(handle.same_instance(&handle.clone()));
    }

    #[test]
    fn publish_without_publisher_is_rejected() {
        let note = entity_ref(Note::new(Some(1), "a"));
        let event = DomainEvent::entity_created(note.clone());
        let err = note.borrow().publish_event(event).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn fields() -> impl Strategy<Value = Row> {
            prop::collection::btree_map(
                "[a-z]{1,8}",
                prop_oneof![
                    any::<i64>().prop_map(Value::from),
                    "[ -~]{0,12}".prop_map(Value::from),
                    any::<bool>().prop_map(Value::from),
                    Just(Value::Null),
                ],
                0..8,
            )
        }

        #[derive(Debug)]
        struct Bag {
            core: EntityCore,
            fields: Row,
        }

        impl Entity for Bag {
            fn kind(&self) -> &'static EntityKind {
                &NOTE
            }
            fn core(&self) -> &EntityCore {
                &self.core
            }
            fn core_mut(&mut self) -> &mut EntityCore {
                &mut self.core
            }
            fn to_fields(&self) -> Row {
                self.fields.clone()
            }
        }

        proptest! {
            #[test]
            fn snapshot_and_diff_are_idempotent(initial in fields(), next in fields()) {
                let mut bag = Bag { core: EntityCore::new(Some(EntityId::new(1))), fields: initial };
                bag.update_original_data();
                prop_assert!(!bag.is_changed());
                prop_assert!(bag.changed_data().is_empty());

                bag.fields = next;
                let changes = bag.changed_data();
                prop_assert_eq!(bag.is_changed(), !changes.is_empty()
                    || bag.metadata().original_data().map(|o| o.len()) != Some(bag.data().len()));

                bag.update_original_data();
                prop_assert!(!bag.is_changed());
            }
        }
    }
}
