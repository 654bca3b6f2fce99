//! Integration tests for `SqliteStore` against an in-memory database.

use std::time::Duration;

use chrono::Utc;
use evidence_core::{
  entity::{EntityKind, EntityStatus, EntityWrite, Fields},
  event::{CustodyNote, EntitySnapshot, EventPayload, NewEvent, Seal, Transfer},
  evidence::{DocumentType, EvidenceRecord, EvidenceTier, MintingStatus},
  fact::{ClassificationLevel, ConflictType, FactRelation, FactUpdate, NewFact, ResolutionMethod},
  hash::EventHash,
  resolution::{AutoResolution, ResolutionReason},
  store::{EntityStore, EventLedger, FactStore},
  verify::ChainFailure,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Error, SqliteStore, StoreOptions};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn fields(v: Value) -> Fields {
  match v {
    Value::Object(map) => map,
    other => panic!("expected an object, got {other}"),
  }
}

fn record(file_hash: &str, tier: EvidenceTier) -> EvidenceRecord {
  EvidenceRecord {
    filename:         "retainer.pdf".into(),
    original_path:    None,
    file_hash:        file_hash.into(),
    file_size:        2048,
    document_type:    DocumentType::Pdf,
    evidence_tier:    tier,
    minting_status:   MintingStatus::Pending,
    block_number:     None,
    transaction_hash: None,
    case_id:          Some("CASE-1".into()),
    email_from:       None,
    email_to:         None,
    email_subject:    None,
    email_date:       None,
  }
}

async fn add_evidence(s: &SqliteStore, key: &str, tier: EvidenceTier) {
  let fields = record(&"ab".repeat(32), tier).to_fields().unwrap();
  s.write(EntityWrite::new(EntityKind::Evidence, key, fields, "intake"))
    .await
    .unwrap();
}

fn viewed(key: &str, location: &str) -> NewEvent {
  NewEvent::new(
    key,
    EntityKind::Evidence,
    EventPayload::Viewed(CustodyNote { location: Some(location.into()), note: None }),
    "clerk",
  )
}

fn sealed(key: &str) -> NewEvent {
  NewEvent::new(
    key,
    EntityKind::Evidence,
    EventPayload::Sealed(Seal { seal_id: Some("S-1".into()), note: None }),
    "examiner",
  )
}

/// Run raw SQL behind the store's back, as an attacker with file access would.
async fn tamper(s: &SqliteStore, sql: &'static str) {
  s.conn
    .call(move |conn| {
      conn.execute(sql, [])?;
      Ok(())
    })
    .await
    .unwrap();
}

// ─── Event ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_requires_an_entity_record() {
  let s = store().await;
  let err = s.append(viewed("E404", "vault")).await.unwrap_err();
  assert!(matches!(err, Error::UnknownAggregate(ref id) if id == "E404"));
}

#[tokio::test]
async fn append_rejects_wrong_aggregate_type() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;

  let mut input = viewed("E1", "vault");
  input.aggregate_type = EntityKind::Person;
  let err = s.append(input).await.unwrap_err();
  assert!(matches!(
    err,
    Error::AggregateTypeMismatch { recorded: EntityKind::Evidence, requested: EntityKind::Person, .. }
  ));
}

#[tokio::test]
async fn snapshot_events_are_reserved_for_the_entity_store() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;

  let forged = NewEvent::new(
    "E1",
    EntityKind::Evidence,
    EventPayload::Updated(EntitySnapshot {
      kind:           EntityKind::Evidence,
      version_number: 2,
      status:         EntityStatus::Active,
      fields:         Fields::new(),
    }),
    "mallory",
  );
  let err = s.append(forged).await.unwrap_err();
  assert!(matches!(err, Error::ReservedEventType("UPDATED")));
  assert_eq!(s.events("E1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn appends_chain_onto_the_previous_hash() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  let events = s.events("E1").await.unwrap();
  let versions: Vec<u32> = events.iter().map(|e| e.event_version).collect();
  assert_eq!(versions, [1, 2, 3]);
  assert_eq!(events[0].event_type(), "CREATED");
  assert_eq!(events[0].previous_hash, EventHash::GENESIS);
  assert_eq!(events[1].previous_hash, events[0].event_hash);
  assert_eq!(events[2].previous_hash, events[1].event_hash);
  for e in &events {
    assert_eq!(e.recompute_hash().unwrap(), e.event_hash);
  }

  let latest = s.latest_event("E1").await.unwrap().unwrap();
  assert_eq!(latest.event_version, 3);
  assert_eq!(latest.event_id, events[2].event_id);
  assert!(s.latest_event("E2").await.unwrap().is_none());
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;

  s.append(viewed("E1", "vault").expecting(1)).await.unwrap();
  let err = s.append(viewed("E1", "lab").expecting(1)).await.unwrap_err();
  assert!(matches!(err, Error::VersionConflict { expected: 1, actual: 2, .. }));
  assert!(err.is_retryable());
  assert_eq!(s.events("E1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn append_with_retry_recovers_from_a_conflict() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();

  let event = s
    .append_with_retry(sealed("E1").expecting(1), 3)
    .await
    .unwrap();
  assert_eq!(event.event_version, 3);
  assert!(s.verify("E1").await.unwrap().valid);
}

#[tokio::test]
async fn append_with_retry_gives_up_after_one_attempt() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();

  let err = s.append_with_retry(sealed("E1").expecting(1), 1).await.unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));
}

#[tokio::test]
async fn invalid_input_is_not_retryable() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  let input = NewEvent::new(
    "E1",
    EntityKind::Evidence,
    EventPayload::Transferred(Transfer { from: "clerk".into(), to: " ".into(), reason: None }),
    "clerk",
  );
  let err = s.append(input).await.unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::EmptyField("transfer.to"))));
  assert!(!err.is_retryable());
}

// ─── Verification & quarantine ───────────────────────────────────────────────

#[tokio::test]
async fn empty_aggregate_verifies() {
  let s = store().await;
  let result = s.verify("nothing-here").await.unwrap();
  assert!(result.valid);
  assert_eq!(result.events_checked, 0);
  assert_eq!(result.broken_at, None);
}

#[tokio::test]
async fn tampered_payload_breaks_the_chain_at_that_event() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  let ok = s.verify("E1").await.unwrap();
  assert!(ok.valid);
  assert_eq!(ok.events_checked, 3);

  tamper(
    &s,
    r#"UPDATE events SET payload_json = '{"location":"elsewhere","note":null}'
        WHERE aggregate_id = 'E1' AND event_version = 2"#,
  )
  .await;

  let broken = s.verify("E1").await.unwrap();
  assert!(!broken.valid);
  assert_eq!(broken.broken_at, Some(2));
  assert_eq!(broken.events_checked, 1);
  assert_eq!(broken.failure, Some(ChainFailure::HashMismatch));
}

#[tokio::test]
async fn relinked_event_is_a_link_mismatch() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  tamper(
    &s,
    "UPDATE events SET previous_hash = (
       SELECT event_hash FROM events WHERE aggregate_id = 'E1' AND event_version = 1
     ) WHERE aggregate_id = 'E1' AND event_version = 3",
  )
  .await;

  let result = s.verify("E1").await.unwrap();
  assert_eq!(result.broken_at, Some(3));
  assert_eq!(result.failure, Some(ChainFailure::LinkMismatch));
}

#[tokio::test]
async fn removed_event_is_a_version_gap() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  tamper(&s, "DELETE FROM events WHERE aggregate_id = 'E1' AND event_version = 2").await;

  let result = s.verify("E1").await.unwrap();
  assert_eq!(result.broken_at, Some(3));
  assert_eq!(result.failure, Some(ChainFailure::VersionGap { expected: 2, found: 3 }));
}

#[tokio::test]
async fn broken_chain_is_quarantined_until_released() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  add_evidence(&s, "E2", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();

  tamper(
    &s,
    r#"UPDATE events SET payload_json = '{"location":"elsewhere","note":null}'
        WHERE aggregate_id = 'E1' AND event_version = 2"#,
  )
  .await;

  let err = s.ensure_intact("E1").await.unwrap_err();
  assert!(matches!(err, Error::ChainBroken { broken_at: Some(2), .. }));
  assert!(s.is_quarantined("E1").await.unwrap());

  let err = s.append(sealed("E1")).await.unwrap_err();
  assert!(matches!(err, Error::ChainBroken { broken_at: Some(2), .. }));
  assert!(!err.is_retryable());

  // Unrelated aggregates keep going.
  s.append(viewed("E2", "vault")).await.unwrap();
  assert!(!s.is_quarantined("E2").await.unwrap());

  assert!(s.release_quarantine("E1", "supervisor", "investigated").await.unwrap());
  assert!(!s.is_quarantined("E1").await.unwrap());
  assert!(!s.release_quarantine("E1", "supervisor", "again").await.unwrap());

  // Release never repairs, and re-verifying the same break stays released.
  let again = s.verify("E1").await.unwrap();
  assert!(!again.valid);
  assert_eq!(again.broken_at, Some(2));
  assert!(!s.is_quarantined("E1").await.unwrap());

  s.append(sealed("E1")).await.unwrap();
}

#[tokio::test]
async fn entity_writes_are_blocked_by_quarantine() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  tamper(&s, "UPDATE events SET event_hash = 'not hex' WHERE aggregate_id = 'E1' AND event_version = 1").await;

  assert!(!s.verify("E1").await.unwrap().valid);
  let err = s
    .write(EntityWrite::new(
      EntityKind::Evidence,
      "E1",
      fields(json!({ "case_id": "CASE-2" })),
      "clerk",
    ))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ChainBroken { .. }));

  // The failed write left the current version untouched.
  let current = s.current("E1").await.unwrap().unwrap();
  assert_eq!(current.version_number, 1);
  assert!(current.is_current());
}

#[tokio::test]
async fn garbled_timestamp_breaks_and_quarantines_the_chain() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  tamper(
    &s,
    "UPDATE events SET occurred_at = 'yesterday' WHERE aggregate_id = 'E1' AND event_version = 2",
  )
  .await;

  let result = s.verify("E1").await.unwrap();
  assert!(!result.valid);
  assert_eq!(result.broken_at, Some(2));
  assert_eq!(result.failure, Some(ChainFailure::HashMismatch));
  assert!(s.is_quarantined("E1").await.unwrap());

  let err = s.ensure_intact("E1").await.unwrap_err();
  assert!(matches!(err, Error::ChainBroken { broken_at: Some(2), .. }));
  let err = s.append(sealed("E1")).await.unwrap_err();
  assert!(matches!(err, Error::ChainBroken { broken_at: Some(2), .. }));
}

#[tokio::test]
async fn exhausted_version_space_is_an_error() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  tamper(
    &s,
    "INSERT INTO events (
       event_id, aggregate_id, aggregate_type, event_version, event_type,
       payload_json, actor_id, occurred_at, event_hash, previous_hash
     ) VALUES (
       'forged', 'E1', 'evidence', 4294967295, 'VIEWED',
       '{}', 'clerk', '2024-01-01T00:00:00.000000Z', hex(zeroblob(32)), hex(zeroblob(32))
     )",
  )
  .await;

  let err = s.append(viewed("E1", "vault")).await.unwrap_err();
  assert!(matches!(err, Error::VersionExhausted(ref id) if id == "E1"));
  assert!(!err.is_retryable());
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_connections_append_without_gaps() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("ledger.db");
  let options = StoreOptions { busy_timeout: Duration::from_secs(10), ..Default::default() };
  let a = SqliteStore::open_with(&path, options.clone()).await.unwrap();
  let b = SqliteStore::open_with(&path, options).await.unwrap();

  add_evidence(&a, "E1", EvidenceTier::Witness).await;

  let run = |s: SqliteStore, location: &'static str| async move {
    for _ in 0..10 {
      s.append_with_retry(viewed("E1", location), 5).await.unwrap();
    }
  };
  tokio::join!(run(a.clone(), "vault"), run(b.clone(), "lab"));

  let events = b.events("E1").await.unwrap();
  assert_eq!(events.len(), 21);
  let versions: Vec<u32> = events.iter().map(|e| e.event_version).collect();
  assert_eq!(versions, (1..=21).collect::<Vec<_>>());
  let result = a.verify("E1").await.unwrap();
  assert!(result.valid);
  assert_eq!(result.events_checked, 21);
}

#[tokio::test]
async fn concurrent_cas_appends_admit_exactly_one_winner() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("ledger.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();
  add_evidence(&a, "E1", EvidenceTier::Witness).await;

  let (ra, rb) = tokio::join!(
    a.append(viewed("E1", "vault").expecting(1)),
    b.append(viewed("E1", "lab").expecting(1)),
  );
  let outcomes = [ra, rb];
  assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
  assert!(
    outcomes
      .iter()
      .any(|r| matches!(r, Err(Error::VersionConflict { expected: 1, actual: 2, .. })))
  );
  assert!(a.verify("E1").await.unwrap().valid);
}

// ─── Bitemporal entities ─────────────────────────────────────────────────────

#[tokio::test]
async fn as_of_returns_the_version_valid_at_that_time() {
  let s = store().await;
  let before = Utc::now() - chrono::Duration::seconds(1);

  s.write(EntityWrite::new(EntityKind::Person, "PERSON-1", fields(json!({ "name": "A" })), "clerk"))
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  let t0 = Utc::now();
  tokio::time::sleep(Duration::from_millis(5)).await;
  s.write(EntityWrite::new(EntityKind::Person, "PERSON-1", fields(json!({ "name": "B" })), "clerk"))
    .await
    .unwrap();

  let then = s.as_of("PERSON-1", t0).await.unwrap();
  assert_eq!(then.field("name"), Some(&json!("A")));
  assert_eq!(then.version_number, 1);

  let now = s.as_of("PERSON-1", Utc::now()).await.unwrap();
  assert_eq!(now.field("name"), Some(&json!("B")));
  assert!(now.is_current());

  let err = s.as_of("PERSON-1", before).await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn history_is_contiguous_and_fields_carry_forward() {
  let s = store().await;
  s.write(EntityWrite::new(
    EntityKind::Place,
    "PLACE-1",
    fields(json!({ "name": "Vault", "city": "Springfield" })),
    "clerk",
  ))
  .await
  .unwrap();
  s.write(EntityWrite::new(EntityKind::Place, "PLACE-1", fields(json!({ "name": "Annex" })), "clerk"))
    .await
    .unwrap();
  s.write(EntityWrite::new(EntityKind::Place, "PLACE-1", fields(json!({ "floor": 2 })), "clerk"))
    .await
    .unwrap();

  let history = s.history("PLACE-1").await.unwrap();
  assert_eq!(history.len(), 3);
  assert_eq!(history.iter().filter(|v| v.is_current()).count(), 1);
  for pair in history.windows(2) {
    assert_eq!(pair[0].valid_to, Some(pair[1].valid_from));
    assert!(pair[0].valid_from < pair[1].valid_from);
  }

  let current = &history[2];
  assert_eq!(current.field("name"), Some(&json!("Annex")));
  assert_eq!(current.field("city"), Some(&json!("Springfield")));
  assert_eq!(current.field("floor"), Some(&json!(2)));

  // Each version carries the hash of the event written with it.
  let events = s.events("PLACE-1").await.unwrap();
  let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
  assert_eq!(types, ["CREATED", "UPDATED", "UPDATED"]);
  for (version, event) in history.iter().zip(&events) {
    assert_eq!(version.event_hash, event.event_hash);
    assert_eq!(version.valid_from, event.occurred_at);
  }
}

#[tokio::test]
async fn rapid_writes_never_produce_empty_intervals() {
  let s = store().await;
  for i in 0..20 {
    s.write(EntityWrite::new(EntityKind::Thing, "THING-1", fields(json!({ "n": i })), "clerk"))
      .await
      .unwrap();
  }
  let history = s.history("THING-1").await.unwrap();
  assert_eq!(history.len(), 20);
  for v in &history {
    if let Some(to) = v.valid_to {
      assert!(to > v.valid_from);
    }
  }
}

#[tokio::test]
async fn kind_of_an_existing_key_is_fixed() {
  let s = store().await;
  s.write(EntityWrite::new(EntityKind::Person, "K1", Fields::new(), "clerk"))
    .await
    .unwrap();
  let err = s
    .write(EntityWrite::new(EntityKind::Authority, "K1", Fields::new(), "clerk"))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::AggregateTypeMismatch { recorded: EntityKind::Person, requested: EntityKind::Authority, .. }
  ));
  assert_eq!(s.history("K1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn retire_writes_a_terminal_version() {
  let s = store().await;
  s.write(EntityWrite::new(EntityKind::Authority, "AUTH-1", fields(json!({ "name": "Court" })), "clerk"))
    .await
    .unwrap();

  let retired = s.retire("AUTH-1", "supervisor").await.unwrap();
  assert_eq!(retired.status, EntityStatus::Deleted);
  assert_eq!(retired.version_number, 2);
  assert_eq!(retired.field("name"), Some(&json!("Court")));

  let err = s
    .write(EntityWrite::new(EntityKind::Authority, "AUTH-1", Fields::new(), "clerk"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::EntityDeleted(ref k) if k == "AUTH-1"));

  let latest = s.latest_event("AUTH-1").await.unwrap().unwrap();
  assert_eq!(latest.event_type(), "DELETED");
  assert_eq!(latest.actor_id, "supervisor");

  assert!(matches!(s.retire("nobody", "x").await, Err(Error::UnknownAggregate(_))));
}

// ─── Evidence content & custody ──────────────────────────────────────────────

#[tokio::test]
async fn content_check_records_the_outcome() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;

  let good = s.check_content("E1", &"AB".repeat(32), "examiner").await.unwrap();
  assert!(matches!(good.payload, EventPayload::ContentVerified(ref c) if c.matches));

  let bad = s.check_content("E1", &"cd".repeat(32), "examiner").await.unwrap();
  assert!(matches!(bad.payload, EventPayload::ContentVerified(ref c) if !c.matches));
  assert_eq!(bad.event_version, 3);

  s.write(EntityWrite::new(EntityKind::Person, "P1", Fields::new(), "clerk"))
    .await
    .unwrap();
  assert!(matches!(
    s.check_content("P1", "00", "examiner").await,
    Err(Error::AggregateTypeMismatch { .. })
  ));
}

#[tokio::test]
async fn custody_trail_reconstructs_every_event() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Government).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(NewEvent::new(
    "E1",
    EntityKind::Evidence,
    EventPayload::Transferred(Transfer { from: "clerk".into(), to: "lab".into(), reason: None }),
    "clerk",
  ))
  .await
  .unwrap();
  s.append(sealed("E1")).await.unwrap();

  let trail = s.custody_trail("E1").await.unwrap();
  assert!(trail.verification.valid);
  assert_eq!(trail.entries.len(), 4);
  assert_eq!(trail.custodians(), ["intake", "clerk", "examiner"]);
  assert_eq!(trail.record.as_ref().map(|r| r.evidence_tier), Some(EvidenceTier::Government));

  let md = trail.render_markdown();
  assert!(md.contains("# Chain of Custody: E1"));
  assert!(md.contains("Hash chain intact (4 events verified)."));
  assert!(md.contains("retainer.pdf"));
}

#[tokio::test]
async fn custody_trail_survives_an_undecodable_payload() {
  let s = store().await;
  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  s.append(viewed("E1", "vault")).await.unwrap();
  s.append(sealed("E1")).await.unwrap();

  tamper(
    &s,
    r#"UPDATE events SET payload_json = '{"location":5}'
        WHERE aggregate_id = 'E1' AND event_version = 2"#,
  )
  .await;

  let trail = s.custody_trail("E1").await.unwrap();
  assert!(!trail.verification.valid);
  assert_eq!(trail.verification.broken_at, Some(2));
  assert_eq!(trail.entries.len(), 3);
  assert_eq!(trail.entries[1].event_type, "VIEWED");
  assert_eq!(trail.entries[1].summary, r#"unreadable payload: {"location":5}"#);
  assert_eq!(trail.custodians(), ["intake", "clerk", "examiner"]);

  let md = trail.render_markdown();
  assert!(md.contains("HASH CHAIN BROKEN at event 2"));
  assert!(md.contains("unreadable payload"));
}

#[tokio::test]
async fn custody_trail_requires_an_evidence_entity() {
  let s = store().await;
  s.write(EntityWrite::new(EntityKind::Person, "P1", Fields::new(), "clerk"))
    .await
    .unwrap();
  assert!(matches!(s.custody_trail("P1").await, Err(Error::UnknownAggregate(_))));
  assert!(matches!(s.custody_trail("missing").await, Err(Error::UnknownAggregate(_))));
}

// ─── Facts ───────────────────────────────────────────────────────────────────

fn new_fact(text: &str, weight: f64) -> NewFact {
  NewFact::new("CASE-1", text, "event", ClassificationLevel::Claim, weight)
}

#[tokio::test]
async fn fact_weight_is_validated() {
  let s = store().await;
  let err = s.assert_fact(new_fact("too sure", 1.5)).await.unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::InvalidWeight(_))));
  let err = s.assert_fact(new_fact("unsure", f64::NAN)).await.unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::InvalidWeight(_))));
}

#[tokio::test]
async fn fact_evidence_must_be_an_evidence_entity() {
  let s = store().await;
  let err = s
    .assert_fact(new_fact("cited", 0.5).with_evidence("E404"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownAggregate(_)));

  s.write(EntityWrite::new(EntityKind::Person, "P1", Fields::new(), "clerk"))
    .await
    .unwrap();
  let err = s
    .assert_fact(new_fact("cited", 0.5).with_evidence("P1"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AggregateTypeMismatch { .. }));

  add_evidence(&s, "E1", EvidenceTier::Witness).await;
  let fact = s.assert_fact(new_fact("cited", 0.5).with_evidence("E1")).await.unwrap();
  assert_eq!(fact.evidence_id.as_deref(), Some("E1"));
}

#[tokio::test]
async fn update_fact_versions_history() {
  let s = store().await;
  let f = s.assert_fact(new_fact("X happened", 0.5)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  let t0 = Utc::now();
  tokio::time::sleep(Duration::from_millis(5)).await;

  let updated = s
    .update_fact(f.fact_id, FactUpdate {
      weight: Some(0.8),
      verified: Some(true),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(updated.version_number, 2);
  assert!(updated.verified);

  let then = s.fact_as_of(f.fact_id, t0).await.unwrap();
  assert_eq!(then.weight, 0.5);
  assert!(!then.verified);
  assert_eq!(then.valid_to, Some(updated.valid_from));

  let current = s.fact(f.fact_id).await.unwrap().unwrap();
  assert_eq!(current.weight, 0.8);

  let err = s
    .update_fact(f.fact_id, FactUpdate { weight: Some(2.0), ..Default::default() })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::InvalidWeight(_))));
  assert!(matches!(
    s.update_fact(Uuid::new_v4(), FactUpdate::default()).await,
    Err(Error::FactNotFound(_))
  ));
}

#[tokio::test]
async fn link_facts_is_idempotent_and_rejects_self_links() {
  let s = store().await;
  let a = s.assert_fact(new_fact("A", 0.5)).await.unwrap();
  let b = s.assert_fact(new_fact("B", 0.5)).await.unwrap();

  let first = s.link_facts(a.fact_id, b.fact_id, FactRelation::Supports).await.unwrap();
  let again = s.link_facts(a.fact_id, b.fact_id, FactRelation::Supports).await.unwrap();
  assert_eq!(first.link_id, again.link_id);

  let err = s.link_facts(a.fact_id, a.fact_id, FactRelation::Supports).await.unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::SelfLink(_))));
}

#[tokio::test]
async fn contradiction_detection_is_order_independent() {
  let s = store().await;
  let f1 = s.assert_fact(new_fact("X happened", 0.9)).await.unwrap();
  let f2 = s.assert_fact(new_fact("X did not happen", 0.4)).await.unwrap();

  let c1 = s.detect_contradiction(f1.fact_id, f2.fact_id, ConflictType::Direct).await.unwrap();
  let c2 = s.detect_contradiction(f2.fact_id, f1.fact_id, ConflictType::Direct).await.unwrap();
  assert_eq!(c1.contradiction_id, c2.contradiction_id);
  assert!(!c1.is_resolved());
  assert!(c1.fact_a_id < c1.fact_b_id);

  assert_eq!(s.contradictions_for(f1.fact_id).await.unwrap().len(), 1);
  assert_eq!(s.contradictions_for(f2.fact_id).await.unwrap().len(), 1);

  let err = s
    .detect_contradiction(f1.fact_id, f1.fact_id, ConflictType::Direct)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(evidence_core::Error::SelfContradiction(_))));

  let err = s
    .detect_contradiction(f1.fact_id, Uuid::new_v4(), ConflictType::Temporal)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::FactNotFound(_)));
}

#[tokio::test]
async fn auto_resolution_on_detection_picks_the_heavier_fact() {
  let s = SqliteStore::open_in_memory_with(StoreOptions { auto_resolve: true, ..Default::default() })
    .await
    .unwrap();
  let f1 = s.assert_fact(new_fact("X happened", 0.9)).await.unwrap();
  let f2 = s.assert_fact(new_fact("X did not happen", 0.4)).await.unwrap();

  let c = s
    .detect_contradiction(f1.fact_id, f2.fact_id, "DIRECT".parse().unwrap())
    .await
    .unwrap();
  assert_eq!(c.winning_fact_id, Some(f1.fact_id));
  assert_eq!(c.resolution_method, Some(ResolutionMethod::Automatic));
  assert!(c.resolved_at.is_some());

  let stored = s.contradiction(c.contradiction_id).await.unwrap().unwrap();
  assert_eq!(stored, c);
}

#[tokio::test]
async fn failed_auto_resolution_stores_no_contradiction() {
  let s = SqliteStore::open_in_memory_with(StoreOptions { auto_resolve: true, ..Default::default() })
    .await
    .unwrap();
  add_evidence(&s, "GOV", EvidenceTier::Government).await;
  add_evidence(&s, "WIT", EvidenceTier::Witness).await;
  let gov = s.assert_fact(new_fact("filed on Monday", 0.6).with_evidence("GOV")).await.unwrap();
  let wit = s.assert_fact(new_fact("filed on Friday", 0.6).with_evidence("WIT")).await.unwrap();

  // The tier lookup cannot decode the evidence row, so resolution fails.
  tamper(&s, "UPDATE entity_versions SET status = 'bogus' WHERE entity_key = 'GOV'").await;
  s.detect_contradiction(wit.fact_id, gov.fact_id, ConflictType::Temporal)
    .await
    .unwrap_err();
  assert!(s.contradictions_for(gov.fact_id).await.unwrap().is_empty());

  // Once readable again, detection stores and resolves in one step.
  tamper(&s, "UPDATE entity_versions SET status = 'active' WHERE entity_key = 'GOV'").await;
  let c = s
    .detect_contradiction(wit.fact_id, gov.fact_id, ConflictType::Temporal)
    .await
    .unwrap();
  assert_eq!(c.winning_fact_id, Some(gov.fact_id));
  assert_eq!(c.resolution_method, Some(ResolutionMethod::Automatic));
}

#[tokio::test]
async fn custom_conflict_type_survives_storage() {
  let s = store().await;
  let a = s.assert_fact(new_fact("A", 0.5)).await.unwrap();
  let b = s.assert_fact(new_fact("not A", 0.5)).await.unwrap();
  let custom = ConflictType::Custom("Direct".into());
  let c = s.detect_contradiction(a.fact_id, b.fact_id, custom.clone()).await.unwrap();

  let stored = s.contradiction(c.contradiction_id).await.unwrap().unwrap();
  assert_eq!(stored.conflict_type, custom);
}

#[tokio::test]
async fn evidence_tier_breaks_a_weight_tie() {
  let s = store().await;
  add_evidence(&s, "GOV", EvidenceTier::Government).await;
  add_evidence(&s, "WIT", EvidenceTier::Witness).await;
  let gov = s.assert_fact(new_fact("filed on Monday", 0.6).with_evidence("GOV")).await.unwrap();
  let wit = s.assert_fact(new_fact("filed on Friday", 0.6).with_evidence("WIT")).await.unwrap();

  let c = s
    .detect_contradiction(wit.fact_id, gov.fact_id, ConflictType::Temporal)
    .await
    .unwrap();
  let (resolved, outcome) = s.auto_resolve(c.contradiction_id).await.unwrap();
  assert_eq!(outcome.winner(), Some(gov.fact_id));
  assert!(matches!(
    outcome,
    AutoResolution::Winner { reason: ResolutionReason::HigherEvidenceTier, .. }
  ));
  assert_eq!(resolved.winning_fact_id, Some(gov.fact_id));
}

#[tokio::test]
async fn full_tie_stays_open() {
  let s = store().await;
  let a = s.assert_fact(new_fact("A", 0.5)).await.unwrap();
  let b = s.assert_fact(new_fact("not A", 0.5)).await.unwrap();
  let c = s.detect_contradiction(a.fact_id, b.fact_id, ConflictType::Direct).await.unwrap();

  let (after, outcome) = s.auto_resolve(c.contradiction_id).await.unwrap();
  assert_eq!(outcome, AutoResolution::Undecided);
  assert!(!after.is_resolved());
  assert!(!s.contradiction(c.contradiction_id).await.unwrap().unwrap().is_resolved());
}

#[tokio::test]
async fn manual_resolution_rules() {
  let s = store().await;
  let a = s.assert_fact(new_fact("A", 0.5)).await.unwrap();
  let b = s.assert_fact(new_fact("not A", 0.7)).await.unwrap();
  let c = s.detect_contradiction(a.fact_id, b.fact_id, ConflictType::Source).await.unwrap();

  let outsider = Uuid::new_v4();
  let err = s
    .resolve(c.contradiction_id, outsider, "wrong fact".into())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(evidence_core::Error::InvalidResolution { winner, .. }) if winner == outsider
  ));

  let resolved = s
    .resolve(c.contradiction_id, a.fact_id, "witness recanted".into())
    .await
    .unwrap();
  assert_eq!(resolved.winning_fact_id, Some(a.fact_id));
  assert_eq!(resolved.resolution_method, Some(ResolutionMethod::Manual));
  assert_eq!(resolved.resolution.as_deref(), Some("witness recanted"));

  let err = s.resolve(c.contradiction_id, b.fact_id, "changed my mind".into()).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved(id) if id == c.contradiction_id));
  let err = s.auto_resolve(c.contradiction_id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved(_)));

  assert!(matches!(
    s.resolve(Uuid::new_v4(), a.fact_id, "x".into()).await,
    Err(Error::ContradictionNotFound(_))
  ));
}
