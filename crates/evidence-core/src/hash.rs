//! The hash chain engine.
//!
//! Every event commits to its predecessor through [`compute_hash`]. The byte
//! layout fed to SHA-256 is pinned by [`HASH_SCHEME`]: changing any part of
//! it invalidates every stored chain, so a new layout must ship under a new
//! scheme tag together with a migration.

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Domain-separation tag written ahead of every hashed event.
pub const HASH_SCHEME: &str = "evidence-ledger/sha256/v1";

// ─── EventHash ───────────────────────────────────────────────────────────────

/// A 256-bit event digest. Rendered and stored as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHash([u8; 32]);

impl EventHash {
  /// The `previous_hash` of every version-1 event.
  pub const GENESIS: Self = Self([0; 32]);

  pub const fn from_bytes(bytes: [u8; 32]) -> Self { Self(bytes) }

  pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

  pub fn is_genesis(&self) -> bool { *self == Self::GENESIS }

  pub fn to_hex(&self) -> String { hex::encode(self.0) }

  pub fn from_hex(s: &str) -> Result<Self> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidDigest(e.to_string()))?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
      Error::InvalidDigest(format!("expected 32 bytes, got {}", v.len()))
    })?;
    Ok(Self(bytes))
  }
}

impl fmt::Display for EventHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl fmt::Debug for EventHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "EventHash({})", self.to_hex())
  }
}

impl FromStr for EventHash {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::from_hex(s) }
}

impl Serialize for EventHash {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for EventHash {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Self::from_hex(&s).map_err(serde::de::Error::custom)
  }
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Truncate to the precision that survives storage (microseconds).
pub fn ledger_time(t: DateTime<Utc>) -> DateTime<Utc> { t.trunc_subsecs(6) }

/// Fixed-width RFC 3339 rendering used both for hashing and for storage.
///
/// Always six fractional digits and a `Z` suffix, so values sort
/// lexicographically in time order.
pub fn canonical_timestamp(t: DateTime<Utc>) -> String {
  t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─── Canonical JSON ──────────────────────────────────────────────────────────

/// Serialise `value` with object keys sorted and no insignificant whitespace.
///
/// Key order is fixed explicitly rather than relying on the map type
/// `serde_json` happens to be compiled with.
pub fn canonical_json(value: &serde_json::Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
  use serde_json::Value;
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|(a, _), (b, _)| a.cmp(b));
      out.push('{');
      for (i, (key, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, v) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(v, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

// ─── compute_hash ────────────────────────────────────────────────────────────

/// `H(aggregate_id, event_type, payload, occurred_at, previous_hash)`.
///
/// Pure and deterministic. Each field is length-prefixed (big-endian u64) so
/// no two distinct inputs share an encoding.
pub fn compute_hash(
  aggregate_id: &str,
  event_type: &str,
  payload: &serde_json::Value,
  occurred_at: DateTime<Utc>,
  previous_hash: &EventHash,
) -> EventHash {
  let mut hasher = Sha256::new();
  hasher.update(HASH_SCHEME.as_bytes());
  write_field(&mut hasher, aggregate_id.as_bytes());
  write_field(&mut hasher, event_type.as_bytes());
  write_field(&mut hasher, canonical_json(payload).as_bytes());
  write_field(&mut hasher, canonical_timestamp(occurred_at).as_bytes());
  write_field(&mut hasher, previous_hash.as_bytes());
  EventHash(hasher.finalize().into())
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
  hasher.update((bytes.len() as u64).to_be_bytes());
  hasher.update(bytes);
}
