//! Bitemporal entity types.
//!
//! Every core entity (person, place, thing, event, authority, evidence, fact)
//! is stored as a sequence of temporal slices. A slice is never rewritten:
//! a mutation closes the current slice and opens a new one.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, event::EntitySnapshot, hash::EventHash};

/// Free-form entity fields; merged key-by-key on every write.
pub type Fields = Map<String, Value>;

// ─── Kind & status ───────────────────────────────────────────────────────────

/// The kind of entity an identity key refers to. Doubles as the
/// `aggregate_type` of the entity's ledger events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  Person,
  Place,
  Thing,
  Event,
  Authority,
  Evidence,
  Fact,
}

impl EntityKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Person => "person",
      Self::Place => "place",
      Self::Thing => "thing",
      Self::Event => "event",
      Self::Authority => "authority",
      Self::Evidence => "evidence",
      Self::Fact => "fact",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for EntityKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "person" => Ok(Self::Person),
      "place" => Ok(Self::Place),
      "thing" => Ok(Self::Thing),
      "event" => Ok(Self::Event),
      "authority" => Ok(Self::Authority),
      "evidence" => Ok(Self::Evidence),
      "fact" => Ok(Self::Fact),
      other => Err(Error::UnknownVariant { what: "entity kind", value: other.to_owned() }),
    }
  }
}

/// Logical deletion is a terminal version, never row removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
  #[default]
  Active,
  Deleted,
}

impl EntityStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Deleted => "deleted",
    }
  }

  pub fn is_terminal(self) -> bool { matches!(self, Self::Deleted) }
}

impl FromStr for EntityStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "active" => Ok(Self::Active),
      "deleted" => Ok(Self::Deleted),
      other => Err(Error::UnknownVariant { what: "entity status", value: other.to_owned() }),
    }
  }
}

// ─── VersionedEntity ─────────────────────────────────────────────────────────

/// One temporal slice of an entity.
///
/// `valid_to` is `None` for the current version; that is the "infinity"
/// sentinel. For a given key at most one version is current, and the
/// intervals `[valid_from, valid_to)` of all versions are disjoint and
/// strictly ordered by `version_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedEntity {
  pub entity_key:     String,
  pub kind:           EntityKind,
  pub version_number: u32,
  pub valid_from:     DateTime<Utc>,
  pub valid_to:       Option<DateTime<Utc>>,
  pub status:         EntityStatus,
  pub fields:         Fields,
  /// Actor who wrote this version; identical to the matching event's actor.
  pub actor_id:       String,
  /// Hash of the ledger event that recorded this version.
  pub event_hash:     EventHash,
}

impl VersionedEntity {
  pub fn is_current(&self) -> bool { self.valid_to.is_none() }

  /// `valid_from <= t < valid_to`.
  pub fn covers(&self, t: DateTime<Utc>) -> bool {
    self.valid_from <= t && self.valid_to.is_none_or(|to| t < to)
  }

  pub fn field(&self, name: &str) -> Option<&Value> { self.fields.get(name) }

  pub fn snapshot(&self) -> EntitySnapshot {
    EntitySnapshot {
      kind:           self.kind,
      version_number: self.version_number,
      status:         self.status,
      fields:         self.fields.clone(),
    }
  }
}

// ─── EntityWrite ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::EntityStore::write`].
/// Timestamps and version numbers are always assigned by the store.
#[derive(Debug, Clone)]
pub struct EntityWrite {
  pub kind:       EntityKind,
  pub entity_key: String,
  /// Fields to set; keys absent here are carried forward from the previous
  /// version.
  pub fields:     Fields,
  pub actor_id:   String,
  pub status:     EntityStatus,
}

impl EntityWrite {
  pub fn new(
    kind: EntityKind,
    entity_key: impl Into<String>,
    fields: Fields,
    actor_id: impl Into<String>,
  ) -> Self {
    Self {
      kind,
      entity_key: entity_key.into(),
      fields,
      actor_id: actor_id.into(),
      status: EntityStatus::Active,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.entity_key.trim().is_empty() {
      return Err(Error::EmptyField("entity_key"));
    }
    if self.actor_id.trim().is_empty() {
      return Err(Error::EmptyField("actor_id"));
    }
    Ok(())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Overlay `changes` on `previous`. Keys not mentioned in `changes` survive.
pub fn merge_fields(previous: &Fields, changes: Fields) -> Fields {
  let mut merged = previous.clone();
  merged.extend(changes);
  merged
}

/// The `valid_from` for a version that supersedes one starting at
/// `current_from`.
///
/// Keeps intervals non-empty when the clock has not advanced (or went
/// backwards) since the previous write.
pub fn next_valid_from(now: DateTime<Utc>, current_from: DateTime<Utc>) -> DateTime<Utc> {
  if now > current_from {
    now
  } else {
    current_from + Duration::microseconds(1)
  }
}
