//! Many-to-many relations.

use crate::entity::{EntityRef, EntityRefExt};
use crate::error::{CoreError, CoreResult};
use crate::types::EntityKind;
use entimap_storage::{Row, Value};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Whether a join row is written or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationCommand {
    /// Write the join row.
    Persist,
    /// Delete the join row.
    Remove,
}

impl RelationCommand {
    /// Parses a command code (`"persist"` or `"remove"`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for unknown codes.
    pub fn from_code(code: &str) -> CoreResult<Self> {
        match code {
            "persist" => Ok(Self::Persist),
            "remove" => Ok(Self::Remove),
            other => Err(CoreError::invalid_argument(format!(
                "unknown relation command {other:?}"
            ))),
        }
    }

    /// Returns the command code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Persist => "persist",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for RelationCommand {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

/// A pending join table operation between two entities.
///
/// The relation is owned by `entity`; its kind selects the DAO that writes
/// the join row at flush time.
#[derive(Clone)]
pub struct ManyToManyRelation {
    table: String,
    entity: EntityRef,
    related: EntityRef,
    command: RelationCommand,
}

impl ManyToManyRelation {
    /// Creates a relation operation.
    pub fn new(
        table: impl Into<String>,
        entity: EntityRef,
        related: EntityRef,
        command: RelationCommand,
    ) -> Self {
        Self {
            table: table.into(),
            entity,
            related,
            command,
        }
    }

    /// Creates an operation writing the join row.
    pub fn persist(table: impl Into<String>, entity: EntityRef, related: EntityRef) -> Self {
        Self::new(table, entity, related, RelationCommand::Persist)
    }

    /// Creates an operation deleting the join row.
    pub fn remove(table: impl Into<String>, entity: EntityRef, related: EntityRef) -> Self {
        Self::new(table, entity, related, RelationCommand::Remove)
    }

    /// Returns the join table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the owning entity.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Returns the related entity.
    #[must_use]
    pub fn related(&self) -> &EntityRef {
        &self.related
    }

    /// Returns the command.
    #[must_use]
    pub fn command(&self) -> RelationCommand {
        self.command
    }

    /// Returns `true` if the join row should be written.
    #[must_use]
    pub fn should_persist(&self) -> bool {
        self.command == RelationCommand::Persist
    }

    /// Returns `true` if the join row should be deleted.
    #[must_use]
    pub fn should_remove(&self) -> bool {
        self.command == RelationCommand::Remove
    }

    /// Returns the kind of the owning entity.
    #[must_use]
    pub fn owner_kind(&self) -> &'static EntityKind {
        self.entity.entity_kind()
    }

    /// Returns `true` if either endpoint is `entity` (by instance).
    #[must_use]
    pub fn references(&self, entity: &EntityRef) -> bool {
        Rc::ptr_eq(&self.entity, entity) || Rc::ptr_eq(&self.related, entity)
    }

    /// Builds the join row (`<owner>_id`, `<related>_id`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if an endpoint has no id yet.
    pub fn join_row(&self) -> CoreResult<Row> {
        let mut row = Row::new();
        for endpoint in [&self.entity, &self.related] {
            let entity = endpoint.borrow();
            let id = entity.id().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "{} in relation {} has no id",
                    entity.kind(),
                    self.table
                ))
            })?;
            row.insert(entity.kind().foreign_column(), Value::from(id.as_u64()));
        }
        Ok(row)
    }
}

impl fmt::Debug for ManyToManyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyToManyRelation")
            .field("table", &self.table)
            .field("entity", &self.entity.try_borrow().ok().map(|e| e.key()))
            .field("related", &self.related.try_borrow().ok().map(|e| e.key()))
            .field("command", &self.command)
            .finish()
    }
}
