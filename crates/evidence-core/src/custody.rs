//! Chain-of-custody reconstruction: a read-only projection of an evidence
//! item's ledger events.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  event::Event,
  evidence::EvidenceRecord,
  hash::canonical_timestamp,
  verify::VerificationResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyEntry {
  pub event_version: u32,
  pub event_type:    String,
  pub actor_id:      String,
  /// `None` when the stored timestamp could not be read.
  pub occurred_at:   Option<DateTime<Utc>>,
  pub summary:       String,
  /// As stored, so a damaged row still shows what it claims.
  pub event_hash:    String,
}

impl CustodyEntry {
  /// An entry for a stored event whose payload no longer decodes against its
  /// type. The raw payload text stands in for the summary.
  pub fn unreadable(
    event_version: u32,
    event_type: impl Into<String>,
    actor_id: impl Into<String>,
    occurred_at: Option<DateTime<Utc>>,
    raw_payload: &str,
    event_hash: impl Into<String>,
  ) -> Self {
    Self {
      event_version,
      event_type: event_type.into(),
      actor_id: actor_id.into(),
      occurred_at,
      summary: format!("unreadable payload: {raw_payload}"),
      event_hash: event_hash.into(),
    }
  }
}

impl From<&Event> for CustodyEntry {
  fn from(event: &Event) -> Self {
    Self {
      event_version: event.event_version,
      event_type:    event.event_type().to_owned(),
      actor_id:      event.actor_id.clone(),
      occurred_at:   Some(event.occurred_at),
      summary:       event.payload.summary(),
      event_hash:    event.event_hash.to_hex(),
    }
  }
}

/// The ordered custody history of one evidence item, together with a fresh
/// verification of the chain it was read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyTrail {
  pub evidence_id:  String,
  /// Current intake record, when the entity's fields decode as one.
  pub record:       Option<EvidenceRecord>,
  pub entries:      Vec<CustodyEntry>,
  pub verification: VerificationResult,
}

impl CustodyTrail {
  pub fn new(
    evidence_id: impl Into<String>,
    record: Option<EvidenceRecord>,
    entries: impl IntoIterator<Item = CustodyEntry>,
    verification: VerificationResult,
  ) -> Self {
    Self {
      evidence_id: evidence_id.into(),
      record,
      entries: entries.into_iter().collect(),
      verification,
    }
  }

  /// Distinct actors in order of first appearance.
  pub fn custodians(&self) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for entry in &self.entries {
      if !seen.contains(&entry.actor_id.as_str()) {
        seen.push(&entry.actor_id);
      }
    }
    seen
  }

  /// Human-auditable markdown report.
  pub fn render_markdown(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Chain of Custody: {}", self.evidence_id);
    let _ = writeln!(out);

    if let Some(record) = &self.record {
      let _ = writeln!(out, "- **File:** {}", record.filename);
      let _ = writeln!(out, "- **SHA-256:** `{}`", record.file_hash);
      let _ = writeln!(out, "- **Size:** {} bytes", record.file_size);
      let _ = writeln!(out, "- **Tier:** {}", record.evidence_tier.as_str());
      if let Some(case_id) = &record.case_id {
        let _ = writeln!(out, "- **Case:** {case_id}");
      }
      if let Some(from) = &record.email_from {
        let to = record.email_to.as_deref().unwrap_or("unknown");
        let _ = writeln!(out, "- **From:** {from} | **To:** {to}");
      }
      if let Some(subject) = &record.email_subject {
        let _ = writeln!(out, "- **Subject:** {subject}");
      }
      let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Integrity");
    let _ = writeln!(out);
    if self.verification.valid {
      let _ = writeln!(
        out,
        "Hash chain intact ({} events verified).",
        self.verification.events_checked
      );
    } else {
      let at = self
        .verification
        .broken_at
        .map_or_else(|| "unknown".to_owned(), |v| v.to_string());
      let _ = writeln!(
        out,
        "**HASH CHAIN BROKEN at event {at}.** Entries from that version on cannot be trusted."
      );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Events");
    let _ = writeln!(out);
    let _ = writeln!(out, "| # | When | Actor | Event | Detail | Hash |");
    let _ = writeln!(out, "|---|------|-------|-------|--------|------|");
    for e in &self.entries {
      let when = e
        .occurred_at
        .map_or_else(|| "unreadable".to_owned(), canonical_timestamp);
      let hash = e.event_hash.get(..12).unwrap_or(&e.event_hash);
      let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | `{}` |",
        e.event_version,
        when,
        escape_cell(&e.actor_id),
        escape_cell(&e.event_type),
        escape_cell(&e.summary),
        escape_cell(hash),
      );
    }
    out
  }
}

fn escape_cell(s: &str) -> String { s.replace('|', "\\|").replace('\n', " ") }
