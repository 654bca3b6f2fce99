//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored in the fixed-width canonical form used for hashing,
//! so lexical order in SQL equals chronological order. Hashes are lowercase
//! hex; UUIDs are hyphenated lowercase strings.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use evidence_core::{
  custody::CustodyEntry,
  entity::{EntityKind, EntityStatus, Fields, VersionedEntity},
  event::{Event, EventPayload},
  fact::{Contradiction, Fact, FactLink},
  hash::{EventHash, canonical_timestamp},
  verify::ChainLink,
};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { canonical_timestamp(dt) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

/// SQLite integers are `i64`; versions are `u32` everywhere else.
fn decode_version(v: i64) -> Result<u32> {
  u32::try_from(v).map_err(|_| Error::DateParse(format!("version out of range: {v}")))
}

pub fn encode_fields(fields: &Fields) -> Result<String> { Ok(serde_json::to_string(fields)?) }

pub fn encode_factors(factors: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(factors)?)
}

// ─── Events ──────────────────────────────────────────────────────────────────

pub const EVENT_COLUMNS: &str = "event_id, aggregate_id, aggregate_type, event_version, \
   event_type, payload_json, actor_id, occurred_at, event_hash, previous_hash";

#[derive(Clone)]
pub struct RawEvent {
  pub event_id:       String,
  pub aggregate_id:   String,
  pub aggregate_type: String,
  pub event_version:  i64,
  pub event_type:     String,
  pub payload_json:   String,
  pub actor_id:       String,
  pub occurred_at:    String,
  pub event_hash:     String,
  pub previous_hash:  String,
}

impl RawEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:       row.get(0)?,
      aggregate_id:   row.get(1)?,
      aggregate_type: row.get(2)?,
      event_version:  row.get(3)?,
      event_type:     row.get(4)?,
      payload_json:   row.get(5)?,
      actor_id:       row.get(6)?,
      occurred_at:    row.get(7)?,
      event_hash:     row.get(8)?,
      previous_hash:  row.get(9)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    let data: serde_json::Value = serde_json::from_str(&self.payload_json)?;
    Ok(Event {
      event_id:       decode_uuid(&self.event_id)?,
      aggregate_type: self.aggregate_type.parse()?,
      event_version:  decode_version(self.event_version)?,
      payload:        EventPayload::from_parts(&self.event_type, data)?,
      occurred_at:    decode_dt(&self.occurred_at)?,
      event_hash:     EventHash::from_hex(&self.event_hash)?,
      previous_hash:  EventHash::from_hex(&self.previous_hash)?,
      aggregate_id:   self.aggregate_id,
      actor_id:       self.actor_id,
    })
  }

  /// The as-stored view for verification. A payload column that is no longer
  /// valid JSON is hashed as an opaque string, and an unreadable timestamp is
  /// carried as `None`; neither can ever match. A version outside `u32`
  /// surfaces as a gap.
  pub fn into_link(self) -> ChainLink {
    let payload = serde_json::from_str(&self.payload_json)
      .unwrap_or(serde_json::Value::String(self.payload_json));
    ChainLink {
      event_version: u32::try_from(self.event_version).unwrap_or(u32::MAX),
      event_type: self.event_type,
      payload,
      occurred_at: decode_dt(&self.occurred_at).ok(),
      event_hash: self.event_hash,
      previous_hash: self.previous_hash,
    }
  }

  /// Custody view of a stored row. Never fails: a payload that no longer
  /// decodes against its type is shown raw.
  pub fn into_custody_entry(self) -> CustodyEntry {
    let event_version = u32::try_from(self.event_version).unwrap_or(u32::MAX);
    let occurred_at = decode_dt(&self.occurred_at).ok();
    let payload = serde_json::from_str(&self.payload_json)
      .ok()
      .and_then(|data| EventPayload::from_parts(&self.event_type, data).ok());

    match payload {
      Some(payload) => CustodyEntry {
        event_version,
        summary: payload.summary(),
        event_type: self.event_type,
        actor_id: self.actor_id,
        occurred_at,
        event_hash: self.event_hash,
      },
      None => CustodyEntry::unreadable(
        event_version,
        self.event_type,
        self.actor_id,
        occurred_at,
        &self.payload_json,
        self.event_hash,
      ),
    }
  }
}

// ─── Entity versions ─────────────────────────────────────────────────────────

pub const ENTITY_COLUMNS: &str = "entity_key, kind, version_number, valid_from, valid_to, \
   status, fields_json, actor_id, event_hash";

pub struct RawEntityVersion {
  pub entity_key:     String,
  pub kind:           String,
  pub version_number: i64,
  pub valid_from:     String,
  pub valid_to:       Option<String>,
  pub status:         String,
  pub fields_json:    String,
  pub actor_id:       String,
  pub event_hash:     String,
}

impl RawEntityVersion {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_key:     row.get(0)?,
      kind:           row.get(1)?,
      version_number: row.get(2)?,
      valid_from:     row.get(3)?,
      valid_to:       row.get(4)?,
      status:         row.get(5)?,
      fields_json:    row.get(6)?,
      actor_id:       row.get(7)?,
      event_hash:     row.get(8)?,
    })
  }

  pub fn into_entity(self) -> Result<VersionedEntity> {
    let kind: EntityKind = self.kind.parse()?;
    let status: EntityStatus = self.status.parse()?;
    Ok(VersionedEntity {
      kind,
      version_number: decode_version(self.version_number)?,
      valid_from: decode_dt(&self.valid_from)?,
      valid_to: decode_opt_dt(self.valid_to.as_deref())?,
      status,
      fields: serde_json::from_str(&self.fields_json)?,
      event_hash: EventHash::from_hex(&self.event_hash)?,
      entity_key: self.entity_key,
      actor_id: self.actor_id,
    })
  }
}

// ─── Facts ───────────────────────────────────────────────────────────────────

pub const FACT_COLUMNS: &str = "fact_id, version_number, valid_from, valid_to, case_id, text, \
   fact_type, classification, weight, credibility_factors, verified, evidence_id";

pub struct RawFact {
  pub fact_id:             String,
  pub version_number:      i64,
  pub valid_from:          String,
  pub valid_to:            Option<String>,
  pub case_id:             String,
  pub text:                String,
  pub fact_type:           String,
  pub classification:      String,
  pub weight:              f64,
  pub credibility_factors: String,
  pub verified:            bool,
  pub evidence_id:         Option<String>,
}

impl RawFact {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fact_id:             row.get(0)?,
      version_number:      row.get(1)?,
      valid_from:          row.get(2)?,
      valid_to:            row.get(3)?,
      case_id:             row.get(4)?,
      text:                row.get(5)?,
      fact_type:           row.get(6)?,
      classification:      row.get(7)?,
      weight:              row.get(8)?,
      credibility_factors: row.get(9)?,
      verified:            row.get(10)?,
      evidence_id:         row.get(11)?,
    })
  }

  pub fn into_fact(self) -> Result<Fact> {
    Ok(Fact {
      fact_id:             decode_uuid(&self.fact_id)?,
      version_number:      decode_version(self.version_number)?,
      valid_from:          decode_dt(&self.valid_from)?,
      valid_to:            decode_opt_dt(self.valid_to.as_deref())?,
      classification:      self.classification.parse()?,
      credibility_factors: serde_json::from_str(&self.credibility_factors)?,
      case_id:             self.case_id,
      text:                self.text,
      fact_type:           self.fact_type,
      weight:              self.weight,
      verified:            self.verified,
      evidence_id:         self.evidence_id,
    })
  }
}

pub const LINK_COLUMNS: &str = "link_id, from_fact_id, to_fact_id, relation, recorded_at";

pub struct RawFactLink {
  pub link_id:      String,
  pub from_fact_id: String,
  pub to_fact_id:   String,
  pub relation:     String,
  pub recorded_at:  String,
}

impl RawFactLink {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      link_id:      row.get(0)?,
      from_fact_id: row.get(1)?,
      to_fact_id:   row.get(2)?,
      relation:     row.get(3)?,
      recorded_at:  row.get(4)?,
    })
  }

  pub fn into_link(self) -> Result<FactLink> {
    Ok(FactLink {
      link_id:      decode_uuid(&self.link_id)?,
      from_fact_id: decode_uuid(&self.from_fact_id)?,
      to_fact_id:   decode_uuid(&self.to_fact_id)?,
      relation:     self.relation.parse()?,
      recorded_at:  decode_dt(&self.recorded_at)?,
    })
  }
}

// ─── Contradictions ──────────────────────────────────────────────────────────

pub const CONTRADICTION_COLUMNS: &str = "contradiction_id, fact_low, fact_high, conflict_type, \
   winning_fact_id, resolution, resolution_method, detected_at, resolved_at";

pub struct RawContradiction {
  pub contradiction_id:  String,
  pub fact_low:          String,
  pub fact_high:         String,
  pub conflict_type:     String,
  pub winning_fact_id:   Option<String>,
  pub resolution:        Option<String>,
  pub resolution_method: Option<String>,
  pub detected_at:       String,
  pub resolved_at:       Option<String>,
}

impl RawContradiction {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      contradiction_id:  row.get(0)?,
      fact_low:          row.get(1)?,
      fact_high:         row.get(2)?,
      conflict_type:     row.get(3)?,
      winning_fact_id:   row.get(4)?,
      resolution:        row.get(5)?,
      resolution_method: row.get(6)?,
      detected_at:       row.get(7)?,
      resolved_at:       row.get(8)?,
    })
  }

  pub fn into_contradiction(self) -> Result<Contradiction> {
    Ok(Contradiction {
      contradiction_id:  decode_uuid(&self.contradiction_id)?,
      fact_a_id:         decode_uuid(&self.fact_low)?,
      fact_b_id:         decode_uuid(&self.fact_high)?,
      conflict_type:     self.conflict_type.parse()?,
      winning_fact_id:   self.winning_fact_id.as_deref().map(decode_uuid).transpose()?,
      resolution:        self.resolution,
      resolution_method: self
        .resolution_method
        .as_deref()
        .map(str::parse)
        .transpose()?,
      detected_at:       decode_dt(&self.detected_at)?,
      resolved_at:       decode_opt_dt(self.resolved_at.as_deref())?,
    })
  }
}
