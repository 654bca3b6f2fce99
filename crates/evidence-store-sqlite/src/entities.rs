//! [`EntityStore`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use evidence_core::{
  entity::{
    EntityKind, EntityStatus, EntityWrite, Fields, VersionedEntity, merge_fields, next_valid_from,
  },
  event::{ContentCheck, EntitySnapshot, Event, EventPayload},
  evidence::EvidenceRecord,
  store::EntityStore,
};
use rusqlite::{OptionalExtension as _, Transaction, params};

use crate::{
  Error, Result,
  encode::{ENTITY_COLUMNS, RawEntityVersion, encode_dt, encode_fields},
  error::is_unique_violation,
  ledger::{Append, append_in_tx},
  store::{SqliteStore, in_immediate_tx, now},
};

fn current_in_tx(tx: &Transaction<'_>, entity_key: &str) -> Result<Option<VersionedEntity>> {
  let raw = tx
    .query_row(
      &format!("SELECT {ENTITY_COLUMNS} FROM entity_versions WHERE entity_key = ?1 AND valid_to IS NULL"),
      params![entity_key],
      RawEntityVersion::from_row,
    )
    .optional()?;
  raw.map(RawEntityVersion::into_entity).transpose()
}

/// Close the current version, open the next one and append the matching
/// event, all under one timestamp.
fn write_in_tx(tx: &Transaction<'_>, input: EntityWrite, now: DateTime<Utc>) -> Result<VersionedEntity> {
  let current = current_in_tx(tx, &input.entity_key)?;

  if let Some(cur) = &current {
    if cur.kind != input.kind {
      return Err(Error::AggregateTypeMismatch {
        aggregate_id: input.entity_key,
        recorded:     cur.kind,
        requested:    input.kind,
      });
    }
    if cur.status.is_terminal() {
      return Err(Error::EntityDeleted(input.entity_key));
    }
  } else if input.status.is_terminal() {
    return Err(Error::UnknownAggregate(input.entity_key));
  }

  let (version_number, valid_from, fields) = match &current {
    None => (1, now, input.fields),
    Some(cur) => (
      cur.version_number + 1,
      next_valid_from(now, cur.valid_from),
      merge_fields(&cur.fields, input.fields),
    ),
  };

  let snapshot = EntitySnapshot {
    kind: input.kind,
    version_number,
    status: input.status,
    fields: fields.clone(),
  };
  let payload = match (&current, input.status) {
    (_, EntityStatus::Deleted) => EventPayload::Deleted(snapshot),
    (None, _) => EventPayload::Created(snapshot),
    (Some(_), _) => EventPayload::Updated(snapshot),
  };

  if let Some(cur) = &current {
    let closed = tx.execute(
      "UPDATE entity_versions SET valid_to = ?1
        WHERE entity_key = ?2 AND version_number = ?3 AND valid_to IS NULL",
      params![encode_dt(valid_from), input.entity_key, cur.version_number],
    )?;
    if closed != 1 {
      return Err(Error::VersionConflict {
        aggregate_id: input.entity_key,
        expected:     cur.version_number,
        actual:       cur.version_number + 1,
      });
    }
  }

  let event = append_in_tx(tx, Append {
    aggregate_id: &input.entity_key,
    aggregate_type: input.kind,
    payload: &payload,
    actor_id: &input.actor_id,
    expected_version: None,
    occurred_at: valid_from,
  })?;

  let inserted = tx.execute(
    "INSERT INTO entity_versions (
       entity_key, kind, version_number, valid_from, valid_to,
       status, fields_json, actor_id, event_hash
     ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8)",
    params![
      input.entity_key,
      input.kind.as_str(),
      version_number,
      encode_dt(valid_from),
      input.status.as_str(),
      encode_fields(&fields)?,
      input.actor_id,
      event.event_hash.to_hex(),
    ],
  );
  match inserted {
    Ok(_) => {}
    Err(e) if is_unique_violation(&e) => {
      return Err(Error::VersionConflict {
        aggregate_id: input.entity_key,
        expected:     version_number - 1,
        actual:       version_number,
      });
    }
    Err(e) => return Err(e.into()),
  }

  Ok(VersionedEntity {
    entity_key: input.entity_key,
    kind: input.kind,
    version_number,
    valid_from,
    valid_to: None,
    status: input.status,
    fields,
    actor_id: input.actor_id,
    event_hash: event.event_hash,
  })
}

impl SqliteStore {
  async fn run_write(
    &self,
    f: impl FnOnce(&Transaction<'_>, DateTime<Utc>) -> Result<VersionedEntity> + Send + 'static,
  ) -> Result<VersionedEntity> {
    let at = now();
    let entity = self
      .conn
      .call(move |conn| Ok(in_immediate_tx(conn, |tx| f(tx, at))))
      .await??;

    tracing::debug!(
      entity_key = %entity.entity_key,
      kind = %entity.kind,
      version = entity.version_number,
      status = entity.status.as_str(),
      "wrote entity version"
    );
    Ok(entity)
  }
}

impl EntityStore for SqliteStore {
  type Error = Error;

  async fn write(&self, input: EntityWrite) -> Result<VersionedEntity> {
    input.validate()?;
    self.run_write(move |tx, at| write_in_tx(tx, input, at)).await
  }

  async fn retire(&self, entity_key: &str, actor_id: &str) -> Result<VersionedEntity> {
    let key = entity_key.to_owned();
    let actor = actor_id.to_owned();
    self
      .run_write(move |tx, at| {
        let current =
          current_in_tx(tx, &key)?.ok_or_else(|| Error::UnknownAggregate(key.clone()))?;
        let mut input = EntityWrite::new(current.kind, key, Fields::new(), actor);
        input.status = EntityStatus::Deleted;
        input.validate()?;
        write_in_tx(tx, input, at)
      })
      .await
  }

  async fn current(&self, entity_key: &str) -> Result<Option<VersionedEntity>> {
    let key = entity_key.to_owned();
    let raw: Option<RawEntityVersion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ENTITY_COLUMNS} FROM entity_versions
                  WHERE entity_key = ?1 AND valid_to IS NULL"
              ),
              params![key],
              RawEntityVersion::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawEntityVersion::into_entity).transpose()
  }

  async fn as_of(&self, entity_key: &str, at: DateTime<Utc>) -> Result<VersionedEntity> {
    let key = entity_key.to_owned();
    let at_str = encode_dt(at);
    let raw: Option<RawEntityVersion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ENTITY_COLUMNS} FROM entity_versions
                  WHERE entity_key = ?1
                    AND valid_from <= ?2
                    AND (valid_to IS NULL OR valid_to > ?2)"
              ),
              params![key, at_str],
              RawEntityVersion::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    match raw {
      Some(raw) => raw.into_entity(),
      None => Err(Error::NotFound { key: entity_key.to_owned(), at }),
    }
  }

  async fn history(&self, entity_key: &str) -> Result<Vec<VersionedEntity>> {
    let key = entity_key.to_owned();
    let raws: Vec<RawEntityVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTITY_COLUMNS} FROM entity_versions
            WHERE entity_key = ?1 ORDER BY version_number ASC"
        ))?;
        let rows = stmt
          .query_map(params![key], RawEntityVersion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawEntityVersion::into_entity).collect()
  }

  async fn check_content(
    &self,
    evidence_id: &str,
    observed_hash: &str,
    actor_id: &str,
  ) -> Result<Event> {
    if actor_id.trim().is_empty() {
      return Err(evidence_core::Error::EmptyField("actor_id").into());
    }
    let key = evidence_id.to_owned();
    let actor = actor_id.to_owned();
    let observed = observed_hash.to_ascii_lowercase();
    let at = now();

    let event = self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          let current =
            current_in_tx(tx, &key)?.ok_or_else(|| Error::UnknownAggregate(key.clone()))?;
          if current.kind != EntityKind::Evidence {
            return Err(Error::AggregateTypeMismatch {
              aggregate_id: key.clone(),
              recorded:     current.kind,
              requested:    EntityKind::Evidence,
            });
          }
          let record = EvidenceRecord::from_fields(&current.fields)?;
          let payload = EventPayload::ContentVerified(ContentCheck::new(record.file_hash, observed));
          append_in_tx(tx, Append {
            aggregate_id: &key,
            aggregate_type: EntityKind::Evidence,
            payload: &payload,
            actor_id: &actor,
            expected_version: None,
            occurred_at: at,
          })
        }))
      })
      .await??;

    if let EventPayload::ContentVerified(check) = &event.payload
      && !check.matches
    {
      tracing::error!(
        target: "evidence::audit",
        evidence_id,
        expected = %check.expected,
        observed = %check.observed,
        "evidence content no longer matches its intake digest"
      );
    }
    Ok(event)
  }
}
