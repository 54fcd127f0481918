//! Registered entity types and their DAOs and factories.

use crate::dao::{Dao, EntityDao};
use crate::entity::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::factory::{EntityFactory, ErasedFactory};
use crate::types::EntityKind;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
struct Registration {
    kind: &'static EntityKind,
    dao: Rc<dyn Dao>,
    factory: Rc<dyn ErasedFactory>,
    typed_dao: Rc<dyn Any>,
    typed_factory: Rc<dyn Any>,
}

/// Lookup of DAOs and factories by entity type or type name.
#[derive(Default, Clone)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the DAO and factory of `E`, replacing an earlier
    /// registration of the same kind.
    pub fn register<E: EntityType>(
        &mut self,
        dao: Rc<EntityDao<E>>,
        factory: Rc<EntityFactory<E>>,
    ) {
        let kind = E::entity_kind();
        self.entries.retain(|r| r.kind != kind);
        self.entries.push(Registration {
            kind,
            dao: dao.clone(),
            factory: factory.clone(),
            typed_dao: dao,
            typed_factory: factory,
        });
    }

    /// Returns the registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &'static EntityKind> + '_ {
        self.entries.iter().map(|r| r.kind)
    }

    /// Resolves a type name to its kind.
    ///
    /// Accepts the kind name, a path ending in it (`shop::Product`) or the
    /// table name, compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown names.
    pub fn resolve(&self, name: &str) -> CoreResult<&'static EntityKind> {
        self.entry(name).map(|r| r.kind)
    }

    fn entry(&self, name: &str) -> CoreResult<&Registration> {
        let short = name.rsplit("::").next().unwrap_or(name);
        self.entries
            .iter()
            .find(|r| {
                r.kind.name().eq_ignore_ascii_case(short)
                    || r.kind.table().eq_ignore_ascii_case(short)
            })
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown entity type {name:?}")))
    }

    /// Returns the DAO registered for a type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown names.
    pub fn dao(&self, name: &str) -> CoreResult<Rc<dyn Dao>> {
        self.entry(name).map(|r| Rc::clone(&r.dao))
    }

    /// Returns the factory registered for a type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown names.
    pub fn factory(&self, name: &str) -> CoreResult<Rc<dyn ErasedFactory>> {
        self.entry(name).map(|r| Rc::clone(&r.factory))
    }

    /// Returns the typed DAO of `E`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `E` is not registered.
    pub fn typed_dao<E: EntityType>(&self) -> CoreResult<Rc<EntityDao<E>>> {
        self.entry(E::entity_kind().name())
            .and_then(|r| downcast(&r.typed_dao, r.kind))
    }

    /// Returns the typed factory of `E`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `E` is not registered.
    pub fn typed_factory<E: EntityType>(&self) -> CoreResult<Rc<EntityFactory<E>>> {
        self.entry(E::entity_kind().name())
            .and_then(|r| downcast(&r.typed_factory, r.kind))
    }
}

fn downcast<T: 'static>(value: &Rc<dyn Any>, kind: &EntityKind) -> CoreResult<Rc<T>> {
    Rc::clone(value).downcast::<T>().map_err(|_| {
        CoreError::invalid_argument(format!("{kind} is registered with another type"))
    })
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|r| r.kind.name()))
            .finish()
    }
}
