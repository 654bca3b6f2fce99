//! Error type for `evidence-store-sqlite`.
//!
//! Storage and state failures live here; input validation failures arrive
//! wrapped as [`Error::Core`].

use chrono::{DateTime, Utc};
use evidence_core::entity::EntityKind;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] evidence_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The database was busy or locked, or the connection went away.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The aggregate has no entity record to append to.
  #[error("unknown aggregate: {0}")]
  UnknownAggregate(String),

  #[error("aggregate {aggregate_id} is recorded as {recorded}, not {requested}")]
  AggregateTypeMismatch {
    aggregate_id: String,
    recorded:     EntityKind,
    requested:    EntityKind,
  },

  /// Compare-and-swap failure: another writer appended first.
  #[error("version conflict on {aggregate_id}: expected {expected}, latest is {actual}")]
  VersionConflict { aggregate_id: String, expected: u32, actual: u32 },

  /// The aggregate is quarantined after a failed verification.
  #[error("hash chain broken for {aggregate_id} at version {broken_at:?}; writes are blocked")]
  ChainBroken { aggregate_id: String, broken_at: Option<u32> },

  /// The chain already holds the highest representable version.
  #[error("{0} has no room for another event version")]
  VersionExhausted(String),

  /// Snapshot events are written by the entity store only.
  #[error("{0} events can only be written through the entity store")]
  ReservedEventType(&'static str),

  #[error("{0} is deleted; no further versions may be written")]
  EntityDeleted(String),

  #[error("no version of {key} is valid at {at}")]
  NotFound { key: String, at: DateTime<Utc> },

  #[error("fact not found: {0}")]
  FactNotFound(Uuid),

  #[error("contradiction not found: {0}")]
  ContradictionNotFound(Uuid),

  #[error("contradiction {0} is already resolved")]
  AlreadyResolved(Uuid),
}

impl Error {
  /// Whether the operation may succeed if simply tried again.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::StorageUnavailable(_) | Self::VersionConflict { .. })
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    match e.sqlite_error_code() {
      Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
        Self::StorageUnavailable(e.to_string())
      }
      _ => Self::Sqlite(e),
    }
  }
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::ConnectionClosed => {
        Self::StorageUnavailable("connection closed".to_owned())
      }
      tokio_rusqlite::Error::Rusqlite(e) => e.into(),
      other => Self::Database(other),
    }
  }
}

/// Whether `e` is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
  e.sqlite_error().is_some_and(|err| {
    err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
      || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  })
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
