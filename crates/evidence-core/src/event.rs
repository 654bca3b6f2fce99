//! Ledger events: the immutable record of every state transition.
//!
//! Payloads are a closed tagged union. The variant name is the `event_type`
//! stored alongside the event and fed to the hash, and a stored payload is
//! only ever decoded against the shape its tag names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  entity::{EntityKind, EntityStatus, Fields},
  hash::{EventHash, compute_hash},
  verify::ChainLink,
};

// ─── Payload sub-types ───────────────────────────────────────────────────────

/// Full post-state of an entity version, as recorded by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
  pub kind:           EntityKind,
  pub version_number: u32,
  pub status:         EntityStatus,
  pub fields:         Fields,
}

/// Someone inspected the item without moving it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustodyNote {
  pub location: Option<String>,
  pub note:     Option<String>,
}

/// Physical or logical hand-off between custodians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
  pub from:   String,
  pub to:     String,
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seal {
  /// Identifier printed on the tamper seal, if any.
  pub seal_id: Option<String>,
  pub note:    Option<String>,
}

/// A copy left the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
  pub destination: String,
  pub note:        Option<String>,
}

/// Result of re-hashing an evidence item's content against its intake digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCheck {
  pub expected: String,
  pub observed: String,
  pub matches:  bool,
}

impl ContentCheck {
  pub fn new(expected: impl Into<String>, observed: impl Into<String>) -> Self {
    let expected = expected.into();
    let observed = observed.into();
    let matches = expected.eq_ignore_ascii_case(&observed);
    Self { expected, observed, matches }
  }
}

// ─── EventPayload ────────────────────────────────────────────────────────────

/// The typed payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
  // ── Emitted by the entity store ─────────────────────────────────────────
  Created(EntitySnapshot),
  Updated(EntitySnapshot),
  Deleted(EntitySnapshot),

  // ── Custody ─────────────────────────────────────────────────────────────
  Viewed(CustodyNote),
  Transferred(Transfer),
  Sealed(Seal),
  Exported(Export),
  ContentVerified(ContentCheck),

  /// Escape hatch for event types that don't fit the taxonomy.
  Custom {
    name: String,
    data: serde_json::Value,
  },
}

impl EventPayload {
  /// The `event_type` stored with the event.
  /// Must match the `rename_all = "SCREAMING_SNAKE_CASE"` serde tags above.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Created(_) => "CREATED",
      Self::Updated(_) => "UPDATED",
      Self::Deleted(_) => "DELETED",
      Self::Viewed(_) => "VIEWED",
      Self::Transferred(_) => "TRANSFERRED",
      Self::Sealed(_) => "SEALED",
      Self::Exported(_) => "EXPORTED",
      Self::ContentVerified(_) => "CONTENT_VERIFIED",
      Self::Custom { .. } => "CUSTOM",
    }
  }

  /// Snapshot-carrying payloads may only be appended by the entity store.
  pub fn is_entity_write(&self) -> bool {
    matches!(self, Self::Created(_) | Self::Updated(_) | Self::Deleted(_))
  }

  /// Serialise the inner payload (without the type tag). This is the value
  /// that is hashed and stored.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Decode from the stored `event_type` and payload.
  pub fn from_parts(event_type: &str, data: serde_json::Value) -> Result<Self> {
    if !KNOWN_EVENT_TYPES.contains(&event_type) {
      return Err(Error::UnknownEventType(event_type.to_owned()));
    }
    let wrapped = serde_json::json!({ "type": event_type, "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }

  pub fn validate(&self) -> Result<()> {
    match self {
      Self::Custom { name, .. } if name.trim().is_empty() => {
        Err(Error::EmptyField("custom event name"))
      }
      Self::Transferred(t) if t.to.trim().is_empty() => Err(Error::EmptyField("transfer.to")),
      Self::Exported(e) if e.destination.trim().is_empty() => {
        Err(Error::EmptyField("export.destination"))
      }
      _ => Ok(()),
    }
  }

  /// One-line human description for custody reports.
  pub fn summary(&self) -> String {
    match self {
      Self::Created(s) => format!("{} record created (v{})", s.kind, s.version_number),
      Self::Updated(s) => format!("{} record updated (v{})", s.kind, s.version_number),
      Self::Deleted(s) => format!("{} record retired (v{})", s.kind, s.version_number),
      Self::Viewed(n) => match (&n.location, &n.note) {
        (Some(loc), Some(note)) => format!("viewed at {loc}: {note}"),
        (Some(loc), None) => format!("viewed at {loc}"),
        (None, Some(note)) => format!("viewed: {note}"),
        (None, None) => "viewed".to_owned(),
      },
      Self::Transferred(t) => match &t.reason {
        Some(reason) => format!("transferred from {} to {} ({reason})", t.from, t.to),
        None => format!("transferred from {} to {}", t.from, t.to),
      },
      Self::Sealed(s) => match &s.seal_id {
        Some(id) => format!("sealed (seal {id})"),
        None => "sealed".to_owned(),
      },
      Self::Exported(e) => format!("exported to {}", e.destination),
      Self::ContentVerified(c) if c.matches => "content verified against intake digest".to_owned(),
      Self::ContentVerified(c) => {
        format!("content MISMATCH: expected {}, observed {}", c.expected, c.observed)
      }
      Self::Custom { name, .. } => format!("custom event {name}"),
    }
  }
}

const KNOWN_EVENT_TYPES: &[&str] = &[
  "CREATED",
  "UPDATED",
  "DELETED",
  "VIEWED",
  "TRANSFERRED",
  "SEALED",
  "EXPORTED",
  "CONTENT_VERIFIED",
  "CUSTOM",
];

// ─── Event ───────────────────────────────────────────────────────────────────

/// An immutable, hash-chained ledger record. Created once, never updated or
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id:       Uuid,
  pub aggregate_id:   String,
  pub aggregate_type: EntityKind,
  /// 1-based, gap-free, strictly increasing per aggregate.
  pub event_version:  u32,
  pub payload:        EventPayload,
  pub actor_id:       String,
  pub occurred_at:    DateTime<Utc>,
  pub event_hash:     EventHash,
  /// `event_hash` of version `n - 1`, or [`EventHash::GENESIS`] for version 1.
  pub previous_hash:  EventHash,
}

impl Event {
  pub fn event_type(&self) -> &'static str { self.payload.discriminant() }

  /// Re-derive this event's hash from its own fields.
  pub fn recompute_hash(&self) -> Result<EventHash> {
    Ok(compute_hash(
      &self.aggregate_id,
      self.event_type(),
      &self.payload.to_json()?,
      self.occurred_at,
      &self.previous_hash,
    ))
  }

  /// The untyped view the verifier walks.
  pub fn link(&self) -> Result<ChainLink> {
    Ok(ChainLink {
      event_version: self.event_version,
      event_type:    self.event_type().to_owned(),
      payload:       self.payload.to_json()?,
      occurred_at:   Some(self.occurred_at),
      event_hash:    self.event_hash.to_hex(),
      previous_hash: self.previous_hash.to_hex(),
    })
  }
}

// ─── NewEvent ────────────────────────────────────────────────────────────────

/// Input to [`crate::store::EventLedger::append`].
/// Version, timestamp and hashes are always assigned by the ledger.
#[derive(Debug, Clone)]
pub struct NewEvent {
  pub aggregate_id:     String,
  pub aggregate_type:   EntityKind,
  pub payload:          EventPayload,
  pub actor_id:         String,
  /// Compare-and-swap guard: when set, the append only succeeds if this is
  /// still the aggregate's latest version (0 for "no events yet").
  pub expected_version: Option<u32>,
}

impl NewEvent {
  pub fn new(
    aggregate_id: impl Into<String>,
    aggregate_type: EntityKind,
    payload: EventPayload,
    actor_id: impl Into<String>,
  ) -> Self {
    Self {
      aggregate_id: aggregate_id.into(),
      aggregate_type,
      payload,
      actor_id: actor_id.into(),
      expected_version: None,
    }
  }

  pub fn expecting(mut self, version: u32) -> Self {
    self.expected_version = Some(version);
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.aggregate_id.trim().is_empty() {
      return Err(Error::EmptyField("aggregate_id"));
    }
    if self.actor_id.trim().is_empty() {
      return Err(Error::EmptyField("actor_id"));
    }
    self.payload.validate()
  }
}
