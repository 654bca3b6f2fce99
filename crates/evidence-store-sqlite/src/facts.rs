//! [`FactStore`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use evidence_core::{
  entity::{EntityKind, next_valid_from},
  evidence::EvidenceTier,
  fact::{
    ConflictType, Contradiction, Fact, FactLink, FactRelation, FactUpdate, NewFact,
    ResolutionMethod, ordered_pair,
  },
  resolution::{AutoResolution, Candidate, choose_winner},
  store::FactStore,
};
use rusqlite::{OptionalExtension as _, Transaction, params};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    CONTRADICTION_COLUMNS, ENTITY_COLUMNS, FACT_COLUMNS, LINK_COLUMNS, RawContradiction,
    RawEntityVersion, RawFact, RawFactLink, encode_dt, encode_factors, encode_uuid,
  },
  ledger::entity_kind_in_tx,
  store::{SqliteStore, in_immediate_tx, now},
};

// ─── In-transaction helpers ──────────────────────────────────────────────────

fn insert_fact_version(tx: &Transaction<'_>, fact: &Fact) -> Result<()> {
  tx.execute(
    "INSERT INTO fact_versions (
       fact_id, version_number, valid_from, valid_to, case_id, text, fact_type,
       classification, weight, credibility_factors, verified, evidence_id
     ) VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    params![
      encode_uuid(fact.fact_id),
      fact.version_number,
      encode_dt(fact.valid_from),
      fact.case_id,
      fact.text,
      fact.fact_type,
      fact.classification.as_str(),
      fact.weight,
      encode_factors(&fact.credibility_factors)?,
      fact.verified,
      fact.evidence_id,
    ],
  )?;
  Ok(())
}

fn current_fact_in_tx(tx: &Transaction<'_>, fact_id: Uuid) -> Result<Option<Fact>> {
  let raw = tx
    .query_row(
      &format!("SELECT {FACT_COLUMNS} FROM fact_versions WHERE fact_id = ?1 AND valid_to IS NULL"),
      params![encode_uuid(fact_id)],
      RawFact::from_row,
    )
    .optional()?;
  raw.map(RawFact::into_fact).transpose()
}

fn require_fact(tx: &Transaction<'_>, fact_id: Uuid) -> Result<Fact> {
  current_fact_in_tx(tx, fact_id)?.ok_or(Error::FactNotFound(fact_id))
}

fn contradiction_in_tx(tx: &Transaction<'_>, id: Uuid) -> Result<Option<Contradiction>> {
  let raw = tx
    .query_row(
      &format!("SELECT {CONTRADICTION_COLUMNS} FROM contradictions WHERE contradiction_id = ?1"),
      params![encode_uuid(id)],
      RawContradiction::from_row,
    )
    .optional()?;
  raw.map(RawContradiction::into_contradiction).transpose()
}

fn open_contradiction(tx: &Transaction<'_>, id: Uuid) -> Result<Contradiction> {
  let c = contradiction_in_tx(tx, id)?.ok_or(Error::ContradictionNotFound(id))?;
  if c.is_resolved() {
    return Err(Error::AlreadyResolved(id));
  }
  Ok(c)
}

/// Tier of the evidence a fact cites, read from the evidence entity's
/// current fields.
fn evidence_tier_in_tx(tx: &Transaction<'_>, fact: &Fact) -> Result<Option<EvidenceTier>> {
  let Some(evidence_id) = &fact.evidence_id else {
    return Ok(None);
  };
  let raw = tx
    .query_row(
      &format!(
        "SELECT {ENTITY_COLUMNS} FROM entity_versions
          WHERE entity_key = ?1 AND valid_to IS NULL"
      ),
      params![evidence_id],
      RawEntityVersion::from_row,
    )
    .optional()?;
  let Some(entity) = raw.map(RawEntityVersion::into_entity).transpose()? else {
    return Ok(None);
  };
  if entity.kind != EntityKind::Evidence {
    return Ok(None);
  }
  Ok(EvidenceTier::from_fields(&entity.fields))
}

fn record_resolution(
  tx: &Transaction<'_>,
  mut c: Contradiction,
  winner: Uuid,
  text: String,
  method: ResolutionMethod,
  at: DateTime<Utc>,
) -> Result<Contradiction> {
  let updated = tx.execute(
    "UPDATE contradictions
        SET winning_fact_id = ?2, resolution = ?3, resolution_method = ?4, resolved_at = ?5
      WHERE contradiction_id = ?1 AND winning_fact_id IS NULL",
    params![
      encode_uuid(c.contradiction_id),
      encode_uuid(winner),
      text,
      method.as_str(),
      encode_dt(at),
    ],
  )?;
  if updated != 1 {
    return Err(Error::AlreadyResolved(c.contradiction_id));
  }
  c.winning_fact_id = Some(winner);
  c.resolution = Some(text);
  c.resolution_method = Some(method);
  c.resolved_at = Some(at);
  Ok(c)
}

fn auto_resolve_in_tx(
  tx: &Transaction<'_>,
  id: Uuid,
  at: DateTime<Utc>,
) -> Result<(Contradiction, AutoResolution)> {
  let c = open_contradiction(tx, id)?;
  let a = require_fact(tx, c.fact_a_id)?;
  let b = require_fact(tx, c.fact_b_id)?;

  let candidate = |f: &Fact| -> Result<Candidate> {
    Ok(Candidate { fact_id: f.fact_id, weight: f.weight, tier: evidence_tier_in_tx(tx, f)? })
  };
  let outcome = choose_winner(&candidate(&a)?, &candidate(&b)?);

  let c = match &outcome {
    AutoResolution::Winner { fact_id, narrative, .. } => {
      record_resolution(tx, c, *fact_id, narrative.clone(), ResolutionMethod::Automatic, at)?
    }
    AutoResolution::Undecided => c,
  };
  Ok((c, outcome))
}

fn log_auto_resolution(contradiction_id: Uuid, outcome: &AutoResolution) {
  match outcome {
    AutoResolution::Winner { fact_id, reason, .. } => {
      tracing::info!(%contradiction_id, winner = %fact_id, ?reason, "contradiction auto-resolved");
    }
    AutoResolution::Undecided => {
      tracing::info!(%contradiction_id, "auto-resolution undecided; left open for review");
    }
  }
}

// ─── FactStore impl ──────────────────────────────────────────────────────────

impl FactStore for SqliteStore {
  type Error = Error;

  async fn assert_fact(&self, input: NewFact) -> Result<Fact> {
    input.validate()?;
    let fact = Fact {
      fact_id:             Uuid::new_v4(),
      case_id:             input.case_id,
      text:                input.text,
      fact_type:           input.fact_type,
      classification:      input.classification,
      weight:              input.weight,
      credibility_factors: input.credibility_factors,
      verified:            false,
      evidence_id:         input.evidence_id,
      version_number:      1,
      valid_from:          now(),
      valid_to:            None,
    };

    let stored = fact.clone();
    self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          if let Some(evidence_id) = &stored.evidence_id {
            match entity_kind_in_tx(tx, evidence_id)? {
              None => return Err(Error::UnknownAggregate(evidence_id.clone())),
              Some(EntityKind::Evidence) => {}
              Some(recorded) => {
                return Err(Error::AggregateTypeMismatch {
                  aggregate_id: evidence_id.clone(),
                  recorded,
                  requested: EntityKind::Evidence,
                });
              }
            }
          }
          insert_fact_version(tx, &stored)
        }))
      })
      .await??;

    tracing::debug!(fact_id = %fact.fact_id, case_id = %fact.case_id, "asserted fact");
    Ok(fact)
  }

  async fn fact(&self, fact_id: Uuid) -> Result<Option<Fact>> {
    let id = encode_uuid(fact_id);
    let raw: Option<RawFact> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {FACT_COLUMNS} FROM fact_versions WHERE fact_id = ?1 AND valid_to IS NULL"
              ),
              params![id],
              RawFact::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawFact::into_fact).transpose()
  }

  async fn fact_as_of(&self, fact_id: Uuid, at: DateTime<Utc>) -> Result<Fact> {
    let id = encode_uuid(fact_id);
    let at_str = encode_dt(at);
    let raw: Option<RawFact> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {FACT_COLUMNS} FROM fact_versions
                  WHERE fact_id = ?1
                    AND valid_from <= ?2
                    AND (valid_to IS NULL OR valid_to > ?2)"
              ),
              params![id, at_str],
              RawFact::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    match raw {
      Some(raw) => raw.into_fact(),
      None => Err(Error::NotFound { key: fact_id.to_string(), at }),
    }
  }

  async fn update_fact(&self, fact_id: Uuid, update: FactUpdate) -> Result<Fact> {
    let at = now();
    let fact = self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          let current = require_fact(tx, fact_id)?;
          let mut next = update.apply(&current)?;
          next.version_number = current.version_number + 1;
          next.valid_from = next_valid_from(at, current.valid_from);
          next.valid_to = None;

          tx.execute(
            "UPDATE fact_versions SET valid_to = ?1
              WHERE fact_id = ?2 AND version_number = ?3 AND valid_to IS NULL",
            params![encode_dt(next.valid_from), encode_uuid(fact_id), current.version_number],
          )?;
          insert_fact_version(tx, &next)?;
          Ok(next)
        }))
      })
      .await??;

    tracing::debug!(%fact_id, version = fact.version_number, weight = fact.weight, "updated fact");
    Ok(fact)
  }

  async fn link_facts(&self, from: Uuid, to: Uuid, relation: FactRelation) -> Result<FactLink> {
    if from == to {
      return Err(evidence_core::Error::SelfLink(from).into());
    }
    let candidate = FactLink {
      link_id: Uuid::new_v4(),
      from_fact_id: from,
      to_fact_id: to,
      relation,
      recorded_at: now(),
    };

    let raw: RawFactLink = self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          require_fact(tx, from)?;
          require_fact(tx, to)?;
          tx.execute(
            "INSERT INTO fact_links (link_id, from_fact_id, to_fact_id, relation, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (from_fact_id, to_fact_id, relation) DO NOTHING",
            params![
              encode_uuid(candidate.link_id),
              encode_uuid(from),
              encode_uuid(to),
              relation.as_str(),
              encode_dt(candidate.recorded_at),
            ],
          )?;
          Ok(tx.query_row(
            &format!(
              "SELECT {LINK_COLUMNS} FROM fact_links
                WHERE from_fact_id = ?1 AND to_fact_id = ?2 AND relation = ?3"
            ),
            params![encode_uuid(from), encode_uuid(to), relation.as_str()],
            RawFactLink::from_row,
          )?)
        }))
      })
      .await??;
    raw.into_link()
  }

  async fn detect_contradiction(
    &self,
    fact_a_id: Uuid,
    fact_b_id: Uuid,
    conflict_type: ConflictType,
  ) -> Result<Contradiction> {
    let (low, high) = ordered_pair(fact_a_id, fact_b_id)?;
    let auto_resolve = self.options.auto_resolve;
    let at = now();

    // Insert and auto-resolution commit together, so a stored contradiction
    // has always had its chance at resolution.
    let (contradiction, created, outcome) = self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          require_fact(tx, low)?;
          require_fact(tx, high)?;

          let existing = tx
            .query_row(
              &format!(
                "SELECT {CONTRADICTION_COLUMNS} FROM contradictions
                  WHERE fact_low = ?1 AND fact_high = ?2"
              ),
              params![encode_uuid(low), encode_uuid(high)],
              RawContradiction::from_row,
            )
            .optional()?;
          if let Some(raw) = existing {
            return Ok((raw.into_contradiction()?, false, None));
          }

          let c = Contradiction {
            contradiction_id: Uuid::new_v4(),
            fact_a_id: low,
            fact_b_id: high,
            conflict_type,
            winning_fact_id: None,
            resolution: None,
            resolution_method: None,
            detected_at: at,
            resolved_at: None,
          };
          tx.execute(
            "INSERT INTO contradictions (contradiction_id, fact_low, fact_high, conflict_type, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
              encode_uuid(c.contradiction_id),
              encode_uuid(low),
              encode_uuid(high),
              c.conflict_type.to_string(),
              encode_dt(at),
            ],
          )?;

          if auto_resolve {
            let (c, outcome) = auto_resolve_in_tx(tx, c.contradiction_id, at)?;
            return Ok((c, true, Some(outcome)));
          }
          Ok((c, true, None))
        }))
      })
      .await??;

    if created {
      tracing::info!(
        contradiction_id = %contradiction.contradiction_id,
        fact_a = %low,
        fact_b = %high,
        conflict_type = %contradiction.conflict_type,
        "contradiction detected"
      );
    }
    if let Some(outcome) = &outcome {
      log_auto_resolution(contradiction.contradiction_id, outcome);
    }
    Ok(contradiction)
  }

  async fn contradiction(&self, contradiction_id: Uuid) -> Result<Option<Contradiction>> {
    let id = encode_uuid(contradiction_id);
    let raw: Option<RawContradiction> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CONTRADICTION_COLUMNS} FROM contradictions WHERE contradiction_id = ?1"
              ),
              params![id],
              RawContradiction::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawContradiction::into_contradiction).transpose()
  }

  async fn contradictions_for(&self, fact_id: Uuid) -> Result<Vec<Contradiction>> {
    let id = encode_uuid(fact_id);
    let raws: Vec<RawContradiction> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONTRADICTION_COLUMNS} FROM contradictions
            WHERE fact_low = ?1 OR fact_high = ?1
            ORDER BY detected_at ASC"
        ))?;
        let rows = stmt
          .query_map(params![id], RawContradiction::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawContradiction::into_contradiction).collect()
  }

  async fn resolve(
    &self,
    contradiction_id: Uuid,
    winning_fact_id: Uuid,
    resolution_text: String,
  ) -> Result<Contradiction> {
    if resolution_text.trim().is_empty() {
      return Err(evidence_core::Error::EmptyField("resolution_text").into());
    }
    let at = now();
    let c = self
      .conn
      .call(move |conn| {
        Ok(in_immediate_tx(conn, |tx| {
          let c = open_contradiction(tx, contradiction_id)?;
          c.check_winner(winning_fact_id)?;
          record_resolution(tx, c, winning_fact_id, resolution_text, ResolutionMethod::Manual, at)
        }))
      })
      .await??;

    tracing::info!(%contradiction_id, winner = %winning_fact_id, "contradiction resolved");
    Ok(c)
  }

  async fn auto_resolve(&self, contradiction_id: Uuid) -> Result<(Contradiction, AutoResolution)> {
    let at = now();
    let (c, outcome) = self
      .conn
      .call(move |conn| Ok(in_immediate_tx(conn, |tx| auto_resolve_in_tx(tx, contradiction_id, at))))
      .await??;

    log_auto_resolution(contradiction_id, &outcome);
    Ok((c, outcome))
  }
}
