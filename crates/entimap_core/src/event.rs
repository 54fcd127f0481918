//! Domain events.
//!
//! Entities publish [`DomainEvent`]s through the publisher injected by
//! their factory. The [`ManageEntityEventSubscriber`] turns those events
//! into entity manager calls, which keeps aggregate and relation management
//! out of the domain code.

use crate::entity::{EntityRef, EntityRefExt};
use crate::error::{CoreError, CoreResult};
use crate::manager::EntityManager;
use crate::relation::ManyToManyRelation;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// What to do with the entity an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCommand {
    /// Persist the entity.
    Persist,
    /// Schedule the entity for removal.
    Remove,
}

/// Events the persistence layer reacts to.
#[derive(Clone)]
pub enum DomainEvent {
    /// A standalone entity was created or removed.
    ManageEntity {
        /// The entity.
        entity: EntityRef,
        /// The command.
        command: EntityCommand,
    },
    /// A member of an aggregate was modified or removed.
    ManageAggregate {
        /// The aggregate root.
        root: EntityRef,
        /// The member.
        member: EntityRef,
        /// The command.
        command: EntityCommand,
    },
    /// A many-to-many relation changed.
    ManageRelation {
        /// The entity whose relation changed.
        affected: EntityRef,
        /// The pending join table operation.
        relation: ManyToManyRelation,
    },
}

impl DomainEvent {
    /// An entity was created and should be persisted.
    pub fn entity_created(entity: EntityRef) -> Self {
        Self::ManageEntity {
            entity,
            command: EntityCommand::Persist,
        }
    }

    /// An entity should be removed.
    pub fn entity_removed(entity: EntityRef) -> Self {
        Self::ManageEntity {
            entity,
            command: EntityCommand::Remove,
        }
    }

    /// A member of `root` was added or modified.
    pub fn aggregate_member_modified(root: EntityRef, member: EntityRef) -> Self {
        Self::ManageAggregate {
            root,
            member,
            command: EntityCommand::Persist,
        }
    }

    /// A member of `root` was removed.
    pub fn aggregate_member_removed(root: EntityRef, member: EntityRef) -> Self {
        Self::ManageAggregate {
            root,
            member,
            command: EntityCommand::Remove,
        }
    }

    /// A relation of `affected` changed.
    pub fn relation_changed(affected: EntityRef, relation: ManyToManyRelation) -> Self {
        Self::ManageRelation { affected, relation }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManageEntity { .. } => "manage_entity",
            Self::ManageAggregate { .. } => "manage_aggregate",
            Self::ManageRelation { .. } => "manage_relation",
        }
    }
}

fn describe(entity: &EntityRef) -> String {
    match entity.try_borrow() {
        Ok(e) => match e.id() {
            Some(id) => format!("{}#{id}", e.kind()),
            None => format!("{}#new", e.kind()),
        },
        Err(_) => "<borrowed>".to_string(),
    }
}

impl fmt::Debug for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManageEntity { entity, command } => f
                .debug_struct("ManageEntity")
                .field("entity", &describe(entity))
                .field("command", command)
                .finish(),
            Self::ManageAggregate {
                root,
                member,
                command,
            } => f
                .debug_struct("ManageAggregate")
                .field("root", &describe(root))
                .field("member", &describe(member))
                .field("command", command)
                .finish(),
            Self::ManageRelation { affected, relation } => f
                .debug_struct("ManageRelation")
                .field("affected", &describe(affected))
                .field("relation", relation)
                .finish(),
        }
    }
}

/// Receives published domain events.
pub trait DomainEventSubscriber {
    /// Returns whether the subscriber wants the event.
    fn is_subscribed_to(&self, event: &DomainEvent) -> bool;

    /// Handles one event.
    fn handle(&self, event: &DomainEvent) -> CoreResult<()>;
}

/// Delivers domain events to subscribers in subscription order.
#[derive(Default)]
pub struct DomainEventPublisher {
    subscribers: RefCell<Vec<Rc<dyn DomainEventSubscriber>>>,
}

impl DomainEventPublisher {
    /// Creates a publisher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn subscribe(&self, subscriber: Rc<dyn DomainEventSubscriber>) {
        self.subscribers.borrow_mut().push(subscriber);
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Delivers an event to every interested subscriber.
    ///
    /// Stops at and returns the first subscriber error.
    pub fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        let subscribers = self.subscribers.borrow().clone();
        trace!(event = event.name(), subscribers = subscribers.len(), "publish");
        for subscriber in subscribers {
            if subscriber.is_subscribed_to(event) {
                subscriber.handle(event)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DomainEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventPublisher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Translates domain events into entity manager calls.
///
/// Holds the manager weakly; the manager owns the publisher this subscriber
/// is registered with.
#[derive(Debug)]
pub struct ManageEntityEventSubscriber {
    manager: Weak<EntityManager>,
}

impl ManageEntityEventSubscriber {
    /// Creates a subscriber driving the given manager.
    #[must_use]
    pub fn new(manager: Weak<EntityManager>) -> Self {
        Self { manager }
    }

    fn manager(&self) -> CoreResult<Rc<EntityManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| CoreError::invalid_argument("entity manager has been dropped"))
    }
}

impl DomainEventSubscriber for ManageEntityEventSubscriber {
    fn is_subscribed_to(&self, event: &DomainEvent) -> bool {
        match event {
            DomainEvent::ManageEntity { .. }
            | DomainEvent::ManageAggregate { .. }
            | DomainEvent::ManageRelation { .. } => true,
        }
    }

    fn handle(&self, event: &DomainEvent) -> CoreResult<()> {
        let manager = self.manager()?;
        match event {
            DomainEvent::ManageRelation { relation, .. } => manager.add_relation(relation.clone()),
            DomainEvent::ManageAggregate {
                root,
                member,
                command: EntityCommand::Persist,
            } => {
                manager.persist(root.clone())?;
                manager.persist(member.clone())?;
                Ok(())
            }
            DomainEvent::ManageAggregate {
                member,
                command: EntityCommand::Remove,
                ..
            } => manager.remove(member, false),
            DomainEvent::ManageEntity {
                entity,
                command: EntityCommand::Persist,
            } => manager.persist(entity.clone()).map(|_| ()),
            DomainEvent::ManageEntity {
                entity,
                command: EntityCommand::Remove,
            } => {
                trace!(entity = %entity.entity_kind(), "remove by event");
                manager.remove(entity, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::entity_ref;
    use crate::entity::tests::Note;
    use std::cell::Cell;

    struct Counter {
        seen: Cell<usize>,
        fail: bool,
    }

    impl DomainEventSubscriber for Counter {
        fn is_subscribed_to(&self, event: &DomainEvent) -> bool {
            matches!(event, DomainEvent::ManageEntity { .. })
        }

        fn handle(&self, _event: &DomainEvent) -> CoreResult<()> {
            self.seen.set(self.seen.get() + 1);
            if self.fail {
                return Err(CoreError::invalid_argument("rejected"));
            }
            Ok(())
        }
    }

    #[test]
    fn publish_respects_subscription() {
        let publisher = DomainEventPublisher::new();
        let counter = Rc::new(Counter {
            seen: Cell::new(0),
            fail: false,
        });
        publisher.subscribe(counter.clone());

        let a = entity_ref(Note::new(Some(1), "a"));
        let b = entity_ref(Note::new(Some(2), "b"));
        publisher
            .publish(&DomainEvent::entity_created(a.clone()))
            .unwrap();
        publisher
            .publish(&DomainEvent::aggregate_member_modified(a, b))
            .unwrap();

        assert_eq!(counter.seen.get(), 1);
    }

    #[test]
    fn publish_stops_at_first_error() {
        let publisher = DomainEventPublisher::new();
        let failing = Rc::new(Counter {
            seen: Cell::new(0),
            fail: true,
        });
        let after = Rc::new(Counter {
            seen: Cell::new(0),
            fail: false,
        });
        publisher.subscribe(failing.clone());
        publisher.subscribe(after.clone());

        let note = entity_ref(Note::new(Some(1), "a"));
        assert!(publisher
            .publish(&DomainEvent::entity_removed(note))
            .is_err());
        assert_eq!(failing.seen.get(), 1);
        assert_eq!(after.seen.get(), 0);
    }

    #[test]
    fn subscriber_without_manager_fails() {
        let subscriber = ManageEntityEventSubscriber::new(Weak::new());
        let note = entity_ref(Note::new(Some(1), "a"));
        let err = subscriber
            .handle(&DomainEvent::entity_created(note))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn debug_shows_kind_and_id() {
        let note = entity_ref(Note::new(Some(7), "a"));
        let text = format!("{:?}", DomainEvent::entity_removed(note));
        assert!(text.contains("Note#7"), "{text}");
    }
}
