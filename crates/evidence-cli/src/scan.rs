//! Recursive intake of a directory tree.
//!
//! Every candidate file is fingerprinted and recorded under a key derived
//! from its content digest. A file that cannot be read or recorded is
//! reported and the walk moves on.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use evidence_core::{
  entity::{EntityKind, EntityWrite},
  evidence::{EvidenceRecord, EvidenceTier, is_intake_candidate},
  store::EntityStore,
};
use evidence_store_sqlite::SqliteStore;
use serde::Serialize;
use walkdir::WalkDir;

pub struct ScanOptions {
  pub tier:       EvidenceTier,
  pub case_id:    Option<String>,
  pub actor_id:   String,
  pub key_prefix: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
  pub recorded:  Vec<ScannedFile>,
  /// Same content already on record under its key.
  pub unchanged: Vec<ScannedFile>,
  pub failed:    Vec<ScanFailure>,
}

#[derive(Debug, Serialize)]
pub struct ScannedFile {
  pub path: PathBuf,
  pub key:  String,
}

#[derive(Debug, Serialize)]
pub struct ScanFailure {
  pub path:  Option<PathBuf>,
  pub error: String,
}

/// `<prefix>-<first 16 hex digits of the content digest>`.
pub fn evidence_key(prefix: &str, record: &EvidenceRecord) -> String {
  let digest = record.file_hash.get(..16).unwrap_or(&record.file_hash);
  format!("{prefix}-{digest}")
}

enum Intake {
  Recorded(String),
  Unchanged(String),
}

pub async fn scan(store: &SqliteStore, root: &Path, opts: &ScanOptions) -> ScanReport {
  let mut report = ScanReport::default();

  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        tracing::warn!(error = %e, "skipping unreadable directory entry");
        report.failed.push(ScanFailure {
          path:  e.path().map(Path::to_path_buf),
          error: e.to_string(),
        });
        continue;
      }
    };
    if !entry.file_type().is_file() || !is_intake_candidate(entry.path()) {
      continue;
    }

    let path = entry.into_path();
    match intake(store, &path, opts).await {
      Ok(Intake::Recorded(key)) => {
        tracing::info!(%key, path = %path.display(), "evidence recorded");
        report.recorded.push(ScannedFile { path, key });
      }
      Ok(Intake::Unchanged(key)) => report.unchanged.push(ScannedFile { path, key }),
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "intake failed");
        report.failed.push(ScanFailure { path: Some(path), error: format!("{e:#}") });
      }
    }
  }

  report
}

async fn intake(store: &SqliteStore, path: &Path, opts: &ScanOptions) -> anyhow::Result<Intake> {
  let mut record = EvidenceRecord::from_path(path, opts.tier).context("failed to fingerprint")?;
  record.case_id = opts.case_id.clone();
  let key = evidence_key(&opts.key_prefix, &record);

  if let Some(current) = store.current(&key).await?
    && current.kind == EntityKind::Evidence
    && EvidenceRecord::from_fields(&current.fields).is_ok_and(|r| r.file_hash == record.file_hash)
  {
    return Ok(Intake::Unchanged(key));
  }

  store
    .write(EntityWrite::new(
      EntityKind::Evidence,
      key.clone(),
      record.to_fields()?,
      opts.actor_id.clone(),
    ))
    .await?;
  Ok(Intake::Recorded(key))
}
