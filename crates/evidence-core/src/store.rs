//! Store traits.
//!
//! Implemented by storage backends (e.g. `evidence-store-sqlite`). Callers
//! depend on these abstractions, not on a concrete backend.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  custody::CustodyTrail,
  entity::{EntityWrite, VersionedEntity},
  event::{Event, NewEvent},
  fact::{ConflictType, Contradiction, Fact, FactLink, FactRelation, FactUpdate, NewFact},
  resolution::AutoResolution,
  verify::VerificationResult,
};

// ─── Event ledger ────────────────────────────────────────────────────────────

/// The append-only, hash-chained event log.
///
/// The ledger is the only writer of events. Appends for one aggregate are
/// serialised; appends for different aggregates proceed independently.
pub trait EventLedger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append an event, assigning the next version and chaining it to the
  /// previous event's hash.
  ///
  /// Fails if the aggregate has no entity record, if `expected_version` is
  /// set and stale, or if the aggregate is quarantined after a failed
  /// verification.
  fn append(
    &self,
    input: NewEvent,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  /// [`append`](Self::append), retrying version conflicts against the freshly
  /// read predecessor up to `max_attempts` times in total. A retry drops
  /// `expected_version`.
  fn append_with_retry(
    &self,
    input: NewEvent,
    max_attempts: u32,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  /// All events for an aggregate, ascending by version.
  fn events<'a>(
    &'a self,
    aggregate_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  /// The highest-versioned event, if any.
  fn latest_event<'a>(
    &'a self,
    aggregate_id: &'a str,
  ) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + 'a;

  /// Replay the chain from stored data. Never served from a cache.
  fn verify<'a>(
    &'a self,
    aggregate_id: &'a str,
  ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send + 'a;

  /// [`verify`](Self::verify), turning a broken chain into an error.
  fn ensure_intact<'a>(
    &'a self,
    aggregate_id: &'a str,
  ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send + 'a;

  /// Whether writes to the aggregate are blocked pending investigation.
  fn is_quarantined<'a>(
    &'a self,
    aggregate_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Human sign-off that lifts a quarantine. Does not repair anything.
  /// Returns `false` if the aggregate was not quarantined.
  fn release_quarantine<'a>(
    &'a self,
    aggregate_id: &'a str,
    actor_id: &'a str,
    note: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Reconstruct the custody history of an evidence item.
  fn custody_trail<'a>(
    &'a self,
    evidence_id: &'a str,
  ) -> impl Future<Output = Result<CustodyTrail, Self::Error>> + Send + 'a;
}

// ─── Bitemporal entity store ─────────────────────────────────────────────────

/// Current and historical versions of core entities.
///
/// Every write closes the current version, opens a new one, and appends the
/// matching ledger event in a single transaction.
pub trait EntityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn write(
    &self,
    input: EntityWrite,
  ) -> impl Future<Output = Result<VersionedEntity, Self::Error>> + Send + '_;

  /// Write the terminal (deleted) version of an entity.
  fn retire<'a>(
    &'a self,
    entity_key: &'a str,
    actor_id: &'a str,
  ) -> impl Future<Output = Result<VersionedEntity, Self::Error>> + Send + 'a;

  /// The version with an open-ended validity interval, if the key exists.
  fn current<'a>(
    &'a self,
    entity_key: &'a str,
  ) -> impl Future<Output = Result<Option<VersionedEntity>, Self::Error>> + Send + 'a;

  /// The unique version with `valid_from <= at < valid_to`.
  fn as_of<'a>(
    &'a self,
    entity_key: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<VersionedEntity, Self::Error>> + Send + 'a;

  /// Every version, ascending.
  fn history<'a>(
    &'a self,
    entity_key: &'a str,
  ) -> impl Future<Output = Result<Vec<VersionedEntity>, Self::Error>> + Send + 'a;

  /// Compare `observed_hash` with the evidence item's intake digest and
  /// record the outcome as a `CONTENT_VERIFIED` event.
  fn check_content<'a>(
    &'a self,
    evidence_id: &'a str,
    observed_hash: &'a str,
    actor_id: &'a str,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + 'a;
}

// ─── Fact & contradiction engine ─────────────────────────────────────────────

pub trait FactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn assert_fact(
    &self,
    input: NewFact,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  /// Current version of a fact.
  fn fact(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Option<Fact>, Self::Error>> + Send + '_;

  fn fact_as_of(
    &self,
    fact_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  /// Close the current version and open one with `update` applied.
  fn update_fact(
    &self,
    fact_id: Uuid,
    update: FactUpdate,
  ) -> impl Future<Output = Result<Fact, Self::Error>> + Send + '_;

  fn link_facts(
    &self,
    from: Uuid,
    to: Uuid,
    relation: FactRelation,
  ) -> impl Future<Output = Result<FactLink, Self::Error>> + Send + '_;

  /// Record a contradiction between two facts. Reporting the same unordered
  /// pair again returns the existing record.
  fn detect_contradiction(
    &self,
    fact_a_id: Uuid,
    fact_b_id: Uuid,
    conflict_type: ConflictType,
  ) -> impl Future<Output = Result<Contradiction, Self::Error>> + Send + '_;

  fn contradiction(
    &self,
    contradiction_id: Uuid,
  ) -> impl Future<Output = Result<Option<Contradiction>, Self::Error>> + Send + '_;

  /// Every contradiction involving `fact_id`, oldest first.
  fn contradictions_for(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Contradiction>, Self::Error>> + Send + '_;

  /// Human resolution. `winning_fact_id` must be one of the pair.
  fn resolve(
    &self,
    contradiction_id: Uuid,
    winning_fact_id: Uuid,
    resolution_text: String,
  ) -> impl Future<Output = Result<Contradiction, Self::Error>> + Send + '_;

  /// Apply the automatic tie-break policy. An undecided outcome leaves the
  /// contradiction open.
  fn auto_resolve(
    &self,
    contradiction_id: Uuid,
  ) -> impl Future<Output = Result<(Contradiction, AutoResolution), Self::Error>> + Send + '_;
}
