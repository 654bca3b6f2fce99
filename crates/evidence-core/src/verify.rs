//! The chain verifier.
//!
//! Verification always re-derives validity from stored data: it replays the
//! chain link by link, recomputing every hash. No cached verdict survives an
//! append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{EventHash, compute_hash};

/// The untyped, as-stored view of one event. Hashes are kept as the stored
/// hex strings so a corrupted column is reported as a mismatch rather than a
/// decode failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
  pub event_version: u32,
  pub event_type:    String,
  pub payload:       serde_json::Value,
  /// `None` when the stored timestamp no longer parses; such a link can
  /// never verify.
  pub occurred_at:   Option<DateTime<Utc>>,
  pub event_hash:    String,
  pub previous_hash: String,
}

/// Why a chain stopped verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainFailure {
  /// Versions are not `1, 2, 3, …`.
  VersionGap { expected: u32, found: u32 },
  /// `previous_hash` does not equal the predecessor's `event_hash`.
  LinkMismatch,
  /// The stored `event_hash` does not match the recomputed one.
  HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
  pub aggregate_id:   String,
  pub valid:          bool,
  /// Version of the first event that failed. Nothing after it was examined.
  pub broken_at:      Option<u32>,
  /// Events that passed every check.
  pub events_checked: usize,
  pub failure:        Option<ChainFailure>,
}

impl VerificationResult {
  fn intact(aggregate_id: &str, events_checked: usize) -> Self {
    Self {
      aggregate_id: aggregate_id.to_owned(),
      valid: true,
      broken_at: None,
      events_checked,
      failure: None,
    }
  }

  fn broken(aggregate_id: &str, at: u32, events_checked: usize, failure: ChainFailure) -> Self {
    Self {
      aggregate_id: aggregate_id.to_owned(),
      valid: false,
      broken_at: Some(at),
      events_checked,
      failure: Some(failure),
    }
  }
}

/// Walk `links` (ascending by version) and stop at the first failure.
///
/// At each step the link is checked first, then the event's own hash is
/// recomputed, so payload tampering is caught as well as relinking.
pub fn verify_chain(aggregate_id: &str, links: &[ChainLink]) -> VerificationResult {
  let mut previous = EventHash::GENESIS;

  for (index, link) in links.iter().enumerate() {
    let expected_version = index as u32 + 1;
    if link.event_version != expected_version {
      return VerificationResult::broken(
        aggregate_id,
        link.event_version,
        index,
        ChainFailure::VersionGap { expected: expected_version, found: link.event_version },
      );
    }

    if !link.previous_hash.eq_ignore_ascii_case(&previous.to_hex()) {
      return VerificationResult::broken(
        aggregate_id,
        link.event_version,
        index,
        ChainFailure::LinkMismatch,
      );
    }

    let recomputed = link.occurred_at.map(|occurred_at| {
      compute_hash(aggregate_id, &link.event_type, &link.payload, occurred_at, &previous)
    });
    let stored_matches = |h: &EventHash| link.event_hash.eq_ignore_ascii_case(&h.to_hex());
    let Some(recomputed) = recomputed.filter(stored_matches) else {
      return VerificationResult::broken(
        aggregate_id,
        link.event_version,
        index,
        ChainFailure::HashMismatch,
      );
    };

    previous = recomputed;
  }

  VerificationResult::intact(aggregate_id, links.len())
}
