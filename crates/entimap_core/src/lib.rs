//! # entimap Core
//!
//! Unit of work, identity map and entity manager for entimap.
//!
//! This crate provides:
//! - The [`Entity`] contract with change tracking against a snapshot of
//!   the last persisted state
//! - [`EntityFactory`] for building and initializing entities
//! - [`UnitOfWork`], an identity map with a queue of pending
//!   many-to-many relation operations
//! - [`EntityManager`], which flushes tracked changes in one storage
//!   transaction and rolls everything back on failure
//! - [`Dao`] and [`Repository`] for cached, identity-preserving reads
//! - Domain events that let entities ask for their own persistence
//!
//! ## Example
//!
//! ```rust
//! use entimap_core::{
//!     Config, CoreResult, Entity, EntityBuilder, EntityCore, EntityId, EntityKind,
//!     EntityManager, EntityRefExt, EntityType, MemoryCache, PersistTarget,
//! };
//! use entimap_storage::{MemoryStore, Row, TableSchema, Value, ID_COLUMN};
//! use std::sync::Arc;
//!
//! static MEMO: EntityKind = EntityKind::new("Memo", "memo");
//!
//! struct Memo {
//!     core: EntityCore,
//!     body: String,
//! }
//!
//! impl Entity for Memo {
//!     fn kind(&self) -> &'static EntityKind { &MEMO }
//!     fn core(&self) -> &EntityCore { &self.core }
//!     fn core_mut(&mut self) -> &mut EntityCore { &mut self.core }
//!     fn to_fields(&self) -> Row {
//!         Row::from([("body".to_string(), Value::from(self.body.clone()))])
//!     }
//! }
//!
//! struct MemoBuilder {
//!     id: Option<EntityId>,
//!     body: String,
//! }
//!
//! impl EntityBuilder for MemoBuilder {
//!     type Entity = Memo;
//!     fn id(&self) -> Option<EntityId> { self.id }
//!     fn set_id(&mut self, id: EntityId) { self.id = Some(id); }
//!     fn build(self) -> Memo {
//!         Memo { core: EntityCore::new(self.id), body: self.body }
//!     }
//!     fn to_fields(&self) -> Row {
//!         Row::from([("body".to_string(), Value::from(self.body.clone()))])
//!     }
//! }
//!
//! impl EntityType for Memo {
//!     type Builder = MemoBuilder;
//!     fn entity_kind() -> &'static EntityKind { &MEMO }
//!     fn builder_from_row(row: &Row) -> CoreResult<MemoBuilder> {
//!         Ok(MemoBuilder {
//!             id: row.get(ID_COLUMN).and_then(Value::as_u64).map(EntityId::new),
//!             body: row.get("body").and_then(Value::as_str).unwrap_or_default().to_string(),
//!         })
//!     }
//! }
//!
//! let store = Arc::new(MemoryStore::new());
//! store.create_table(TableSchema::new("memo"));
//! let manager = EntityManager::new(store.clone(), Arc::new(MemoryCache::new()), Config::default());
//! manager.register::<Memo>(Arc::new(store.mapper("memo")));
//!
//! let memo = manager
//!     .persist(PersistTarget::builder(MemoBuilder { id: None, body: "hello".into() }))
//!     .unwrap();
//! manager.flush().unwrap();
//!
//! assert_eq!(store.rows("memo").len(), 1);
//! assert!(memo.borrow().metadata().state().is_persisted());
//! assert_eq!(memo.borrow_as::<Memo>().unwrap().body, "hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dao;
mod entity;
mod error;
mod event;
mod factory;
mod manager;
mod registry;
mod relation;
mod repository;
mod stats;
mod transaction;
mod types;
mod unit_of_work;

pub use cache::{Cache, MemoryCache, SaveOptions};
pub use config::Config;
pub use dao::{entity_cache_key, query_tag, Dao, EntityDao, QUERY_TAG};
pub use entity::{
    entity_ref, parse_timestamp, timestamp_value, AggregateLink, AnyBuilder, AsAny, Entity,
    EntityBuilder, EntityCore, EntityFlag, EntityFlags, EntityHook, EntityMetadata, EntityRef,
    EntityRefExt, EntityState, EntityType, CREATED_FIELD, MODIFIED_FIELD,
};
pub use error::{CoreError, CoreResult};
pub use event::{
    DomainEvent, DomainEventPublisher, DomainEventSubscriber, EntityCommand,
    ManageEntityEventSubscriber,
};
pub use factory::{EntityFactory, ErasedFactory, InitArgs, Initializer};
pub use manager::{EntityManager, EntityRemovedHook, FlushHook, ManagerState, PersistTarget};
pub use registry::Registry;
pub use relation::{ManyToManyRelation, RelationCommand};
pub use repository::Repository;
pub use stats::{ManagerStats, StatsSnapshot};
pub use transaction::TransactionGuard;
pub use types::{EntityId, EntityKey, EntityKind, InstanceToken};
pub use unit_of_work::{EntityGroups, UnitOfWork, UnitOfWorkCheckpoint};
