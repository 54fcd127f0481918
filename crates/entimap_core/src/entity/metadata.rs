//! Change-tracking metadata.

use super::state::EntityState;
use chrono::{DateTime, SecondsFormat, Utc};
use entimap_storage::{Row, Value};

/// Column holding the creation timestamp.
pub const CREATED_FIELD: &str = "created";

/// Column holding the modification timestamp.
pub const MODIFIED_FIELD: &str = "modified";

/// Formats a timestamp the way it is stored in rows.
#[must_use]
pub fn timestamp_value(at: Option<DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |at| {
        Value::from(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    })
}

/// Reads a stored timestamp. Anything but RFC 3339 text is `None`.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|at| at.with_timezone(&Utc))
}

/// Lifecycle and change-tracking record owned by every entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    state: EntityState,
    original_data: Option<Row>,
    initialized: bool,
}

impl EntityMetadata {
    /// Creates metadata in the given state with no snapshot.
    #[must_use]
    pub fn new(state: EntityState) -> Self {
        Self {
            created: None,
            modified: None,
            state,
            original_data: None,
            initialized: false,
        }
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// Sets the creation timestamp; `None` means now.
    pub fn set_created(&mut self, at: Option<DateTime<Utc>>) {
        self.created = Some(at.unwrap_or_else(Utc::now));
    }

    /// Returns the modification timestamp.
    #[must_use]
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Sets the modification timestamp; `None` means now.
    pub fn set_modified(&mut self, at: Option<DateTime<Utc>>) {
        self.modified = Some(at.unwrap_or_else(Utc::now));
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Sets the lifecycle state.
    pub fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Returns the last snapshot known to match storage.
    #[must_use]
    pub fn original_data(&self) -> Option<&Row> {
        self.original_data.as_ref()
    }

    /// Stores a snapshot.
    ///
    /// The current modification timestamp is always folded in, so a change
    /// of the timestamp alone is detectable.
    pub fn set_original_data(&mut self, mut fields: Row) {
        fields.insert(MODIFIED_FIELD.to_string(), timestamp_value(self.modified));
        self.original_data = Some(fields);
    }

    /// Latches the initialized flag. There is no way back.
    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    /// Returns whether the entity has been initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn setters_default_to_now() {
        let mut metadata = EntityMetadata::new(EntityState::New);
        assert!(metadata.created().is_none());

        let before = Utc::now();
        metadata.set_created(None);
        metadata.set_modified(None);
        assert!(metadata.created().unwrap() >= before);
        assert!(metadata.modified().unwrap() >= before);
    }

    #[test]
    fn original_data_folds_modified() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut metadata = EntityMetadata::new(EntityState::Persisted);
        metadata.set_modified(Some(at));

        let mut fields = Row::new();
        fields.insert("name".into(), Value::from("a"));
        fields.insert(MODIFIED_FIELD.into(), Value::from("stale"));
        metadata.set_original_data(fields);

        let snapshot = metadata.original_data().unwrap();
        assert_eq!(snapshot["name"], Value::from("a"));
        assert_eq!(
            snapshot[MODIFIED_FIELD],
            Value::from("2024-05-01T12:00:00.000000Z")
        );
    }

    #[test]
    fn initialize_is_a_latch() {
        let mut metadata = EntityMetadata::new(EntityState::New);
        assert!(!metadata.is_initialized());
        metadata.initialize();
        metadata.initialize();
        assert!(metadata.is_initialized());
    }

    #[test]
    fn timestamps_round_trip_through_rows() {
        let at = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(&timestamp_value(Some(at))), Some(at));
        assert_eq!(parse_timestamp(&Value::Null), None);
        assert_eq!(timestamp_value(None), Value::Null);
    }
}
