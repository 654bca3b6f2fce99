//! [`EventLedger`] for [`SqliteStore`], plus the in-transaction append shared
//! with the entity store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use evidence_core::{
  custody::CustodyTrail,
  entity::EntityKind,
  event::{Event, EventPayload, NewEvent},
  evidence::EvidenceRecord,
  hash::{EventHash, compute_hash},
  store::{EntityStore as _, EventLedger},
  verify::{VerificationResult, verify_chain},
};
use rusqlite::{OptionalExtension as _, Transaction, params};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{EVENT_COLUMNS, RawEvent, encode_dt, encode_uuid},
  error::is_unique_violation,
  store::{SqliteStore, in_immediate_tx, now},
};

/// Base delay between retries of a busy database; doubled per attempt.
const BUSY_BACKOFF: Duration = Duration::from_millis(20);

// ─── In-transaction helpers ──────────────────────────────────────────────────

/// Everything an append needs once the caller has been authorised.
pub(crate) struct Append<'a> {
  pub aggregate_id:     &'a str,
  pub aggregate_type:   EntityKind,
  pub payload:          &'a EventPayload,
  pub actor_id:         &'a str,
  pub expected_version: Option<u32>,
  pub occurred_at:      DateTime<Utc>,
}

/// Chain a new event onto the aggregate's latest one.
///
/// Must run inside an immediate transaction. Performs no entity checks; the
/// public append and the entity store do those first.
pub(crate) fn append_in_tx(tx: &Transaction<'_>, input: Append<'_>) -> Result<Event> {
  ensure_not_quarantined(tx, input.aggregate_id)?;

  let latest: Option<(i64, String)> = tx
    .query_row(
      "SELECT event_version, event_hash FROM events
        WHERE aggregate_id = ?1 ORDER BY event_version DESC LIMIT 1",
      params![input.aggregate_id],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;

  let (latest_version, previous_hash) = match latest {
    None => (0, EventHash::GENESIS),
    Some((version, hash)) => {
      // A predecessor we cannot even parse cannot be chained onto.
      let broken = || Error::ChainBroken {
        aggregate_id: input.aggregate_id.to_owned(),
        broken_at:    u32::try_from(version).ok(),
      };
      let version = u32::try_from(version).map_err(|_| broken())?;
      let hash = EventHash::from_hex(&hash).map_err(|_| broken())?;
      (version, hash)
    }
  };
  let next_version = latest_version
    .checked_add(1)
    .ok_or_else(|| Error::VersionExhausted(input.aggregate_id.to_owned()))?;

  if let Some(expected) = input.expected_version
    && expected != latest_version
  {
    return Err(Error::VersionConflict {
      aggregate_id: input.aggregate_id.to_owned(),
      expected,
      actual: latest_version,
    });
  }

  let event_type = input.payload.discriminant();
  let data = input.payload.to_json()?;
  let event_hash =
    compute_hash(input.aggregate_id, event_type, &data, input.occurred_at, &previous_hash);

  let event = Event {
    event_id: Uuid::new_v4(),
    aggregate_id: input.aggregate_id.to_owned(),
    aggregate_type: input.aggregate_type,
    event_version: next_version,
    payload: input.payload.clone(),
    actor_id: input.actor_id.to_owned(),
    occurred_at: input.occurred_at,
    event_hash,
    previous_hash,
  };

  let inserted = tx.execute(
    "INSERT INTO events (
       event_id, aggregate_id, aggregate_type, event_version, event_type,
       payload_json, actor_id, occurred_at, event_hash, previous_hash
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    params![
      encode_uuid(event.event_id),
      event.aggregate_id,
      event.aggregate_type.as_str(),
      event.event_version,
      event_type,
      data.to_string(),
      event.actor_id,
      encode_dt(event.occurred_at),
      event_hash.to_hex(),
      previous_hash.to_hex(),
    ],
  );

  match inserted {
    Ok(_) => Ok(event),
    Err(e) if is_unique_violation(&e) => Err(Error::VersionConflict {
      aggregate_id: event.aggregate_id,
      expected:     latest_version,
      actual:       next_version,
    }),
    Err(e) => Err(e.into()),
  }
}

fn ensure_not_quarantined(tx: &Transaction<'_>, aggregate_id: &str) -> Result<()> {
  let open: Option<Option<i64>> = tx
    .query_row(
      "SELECT broken_at FROM quarantine WHERE aggregate_id = ?1 AND released_at IS NULL",
      params![aggregate_id],
      |r| r.get(0),
    )
    .optional()?;

  match open {
    None => Ok(()),
    Some(broken_at) => Err(Error::ChainBroken {
      aggregate_id: aggregate_id.to_owned(),
      broken_at:    broken_at.and_then(|v| u32::try_from(v).ok()),
    }),
  }
}

/// The kind recorded for an entity key, from its latest version.
pub(crate) fn entity_kind_in_tx(
  tx: &Transaction<'_>,
  entity_key: &str,
) -> Result<Option<EntityKind>> {
  let kind: Option<String> = tx
    .query_row(
      "SELECT kind FROM entity_versions
        WHERE entity_key = ?1 ORDER BY version_number DESC LIMIT 1",
      params![entity_key],
      |r| r.get(0),
    )
    .optional()?;
  Ok(kind.map(|k| k.parse()).transpose()?)
}

fn append_checked(tx: &Transaction<'_>, input: &NewEvent, occurred_at: DateTime<Utc>) -> Result<Event> {
  match entity_kind_in_tx(tx, &input.aggregate_id)? {
    None => return Err(Error::UnknownAggregate(input.aggregate_id.clone())),
    Some(recorded) if recorded != input.aggregate_type => {
      return Err(Error::AggregateTypeMismatch {
        aggregate_id: input.aggregate_id.clone(),
        recorded,
        requested: input.aggregate_type,
      });
    }
    Some(_) => {}
  }

  append_in_tx(tx, Append {
    aggregate_id: &input.aggregate_id,
    aggregate_type: input.aggregate_type,
    payload: &input.payload,
    actor_id: &input.actor_id,
    expected_version: input.expected_version,
    occurred_at,
  })
}

// ─── Reads ───────────────────────────────────────────────────────────────────

impl SqliteStore {
  async fn raw_events(&self, aggregate_id: &str) -> Result<Vec<RawEvent>> {
    let id = aggregate_id.to_owned();
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = ?1 ORDER BY event_version ASC"
        ))?;
        let rows = stmt
          .query_map(params![id], RawEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(raws)
  }

  /// Record (or re-open) the quarantine for a chain that failed verification.
  async fn quarantine(&self, result: &VerificationResult) -> Result<()> {
    let id = result.aggregate_id.clone();
    let broken_at = result.broken_at;
    let detected_at = encode_dt(now());

    // A different break point re-opens a released quarantine; re-verifying
    // the same break after a release does not.
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO quarantine (aggregate_id, broken_at, detected_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (aggregate_id) DO UPDATE SET
             broken_at    = excluded.broken_at,
             detected_at  = excluded.detected_at,
             released_at  = NULL,
             released_by  = NULL,
             release_note = NULL
           WHERE quarantine.broken_at IS NOT excluded.broken_at",
          params![id, broken_at, detected_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── EventLedger impl ────────────────────────────────────────────────────────

impl EventLedger for SqliteStore {
  type Error = Error;

  async fn append(&self, input: NewEvent) -> Result<Event> {
    input.validate()?;
    if input.payload.is_entity_write() {
      return Err(Error::ReservedEventType(input.payload.discriminant()));
    }

    let occurred_at = now();
    let event = self
      .conn
      .call(move |conn| Ok(in_immediate_tx(conn, |tx| append_checked(tx, &input, occurred_at))))
      .await??;

    tracing::debug!(
      aggregate_id = %event.aggregate_id,
      version = event.event_version,
      event_type = event.event_type(),
      "appended event"
    );
    Ok(event)
  }

  async fn append_with_retry(&self, input: NewEvent, max_attempts: u32) -> Result<Event> {
    let max_attempts = max_attempts.max(1);
    let mut input = input;
    let mut attempt = 1;
    loop {
      match self.append(input.clone()).await {
        Err(Error::VersionConflict { expected, actual, .. }) if attempt < max_attempts => {
          tracing::warn!(
            aggregate_id = %input.aggregate_id,
            attempt,
            expected,
            actual,
            "version conflict; retrying against the new latest event"
          );
          input.expected_version = None;
        }
        Err(Error::StorageUnavailable(reason)) if attempt < max_attempts => {
          let delay = BUSY_BACKOFF * 2u32.saturating_pow(attempt - 1);
          tracing::warn!(
            aggregate_id = %input.aggregate_id,
            attempt,
            ?delay,
            %reason,
            "storage unavailable; backing off"
          );
          tokio::time::sleep(delay).await;
        }
        other => return other,
      }
      attempt += 1;
    }
  }

  async fn events(&self, aggregate_id: &str) -> Result<Vec<Event>> {
    self
      .raw_events(aggregate_id)
      .await?
      .into_iter()
      .map(RawEvent::into_event)
      .collect()
  }

  async fn latest_event(&self, aggregate_id: &str) -> Result<Option<Event>> {
    let id = aggregate_id.to_owned();
    let raw: Option<RawEvent> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                  WHERE aggregate_id = ?1 ORDER BY event_version DESC LIMIT 1"
              ),
              params![id],
              RawEvent::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawEvent::into_event).transpose()
  }

  async fn verify(&self, aggregate_id: &str) -> Result<VerificationResult> {
    let links: Vec<_> = self
      .raw_events(aggregate_id)
      .await?
      .into_iter()
      .map(RawEvent::into_link)
      .collect();

    let result = verify_chain(aggregate_id, &links);
    if !result.valid {
      tracing::error!(
        target: "evidence::audit",
        aggregate_id,
        broken_at = ?result.broken_at,
        failure = ?result.failure,
        events_checked = result.events_checked,
        "hash chain broken; aggregate quarantined"
      );
      self.quarantine(&result).await?;
    }
    Ok(result)
  }

  async fn ensure_intact(&self, aggregate_id: &str) -> Result<VerificationResult> {
    let result = self.verify(aggregate_id).await?;
    if result.valid {
      Ok(result)
    } else {
      Err(Error::ChainBroken {
        aggregate_id: result.aggregate_id,
        broken_at:    result.broken_at,
      })
    }
  }

  async fn is_quarantined(&self, aggregate_id: &str) -> Result<bool> {
    let id = aggregate_id.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM quarantine WHERE aggregate_id = ?1 AND released_at IS NULL",
              params![id],
              |_| Ok(()),
            )
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(found)
  }

  async fn release_quarantine(&self, aggregate_id: &str, actor_id: &str, note: &str) -> Result<bool> {
    if actor_id.trim().is_empty() {
      return Err(evidence_core::Error::EmptyField("actor_id").into());
    }
    let id = aggregate_id.to_owned();
    let actor = actor_id.to_owned();
    let note_owned = note.to_owned();
    let released_at = encode_dt(now());

    let released = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE quarantine
              SET released_at = ?2, released_by = ?3, release_note = ?4
            WHERE aggregate_id = ?1 AND released_at IS NULL",
          params![id, released_at, actor, note_owned],
        )?;
        Ok(n > 0)
      })
      .await?;

    if released {
      tracing::warn!(
        target: "evidence::audit",
        aggregate_id,
        actor_id,
        note,
        "quarantine released; stored history is unchanged"
      );
    }
    Ok(released)
  }

  async fn custody_trail(&self, evidence_id: &str) -> Result<CustodyTrail> {
    let current = self
      .current(evidence_id)
      .await?
      .ok_or_else(|| Error::UnknownAggregate(evidence_id.to_owned()))?;
    if current.kind != EntityKind::Evidence {
      return Err(Error::UnknownAggregate(evidence_id.to_owned()));
    }

    let record = EvidenceRecord::from_fields(&current.fields).ok();
    let verification = self.verify(evidence_id).await?;
    // Read leniently: the trail matters most when the chain is damaged.
    let entries = self
      .raw_events(evidence_id)
      .await?
      .into_iter()
      .map(RawEvent::into_custody_entry);
    Ok(CustodyTrail::new(evidence_id, record, entries, verification))
  }
}
