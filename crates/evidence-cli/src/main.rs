//! `evidence`: operator commands for the evidence integrity ledger.
//!
//! # Usage
//!
//! ```
//! evidence intake scans/retainer.pdf --key EV-001 --tier witness --actor clerk
//! evidence scan inbox/ --tier witness --case CASE-7 --actor clerk
//! evidence append EV-001 --type viewed --data '{"location":"vault"}' --actor clerk
//! evidence verify EV-001
//! evidence custody EV-001 --markdown
//! ```
//!
//! Settings come from `evidence.toml` (or `--config`) and `EVIDENCE_*`
//! environment variables. Results are printed as JSON.

mod scan;
mod settings;

use std::{fs::File, path::PathBuf};

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use evidence_core::{
  entity::{EntityKind, EntityWrite, Fields},
  event::{EventPayload, NewEvent},
  evidence::{EvidenceRecord, EvidenceTier, content_digest},
  store::{EntityStore, EventLedger},
};
use evidence_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{
  scan::{ScanOptions, scan},
  settings::LedgerConfig,
};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "evidence", version, about = "Tamper-evident evidence ledger")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "evidence.toml")]
  config: PathBuf,

  /// Override the store path from the configuration.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fingerprint a file and record it as a new evidence item.
  Intake {
    path:  PathBuf,
    #[arg(long)]
    key:   String,
    #[arg(long, default_value = "unverified")]
    tier:  EvidenceTier,
    #[arg(long)]
    case:  Option<String>,
    #[arg(long)]
    actor: String,
  },

  /// Recursively take in every .eml, .msg, .pdf, .txt and .docx file under a
  /// directory. Files that fail are reported; the scan carries on.
  Scan {
    dir:    PathBuf,
    #[arg(long, default_value = "unverified")]
    tier:   EvidenceTier,
    #[arg(long)]
    case:   Option<String>,
    #[arg(long)]
    actor:  String,
    /// Keys are `<prefix>-<first 16 hex digits of the content digest>`.
    #[arg(long, default_value = "EV")]
    prefix: String,
  },

  /// Write a new version of an entity. Unmentioned fields carry forward.
  Write {
    key:    String,
    #[arg(long)]
    kind:   EntityKind,
    /// JSON object of fields to set.
    #[arg(long, default_value = "{}")]
    fields: String,
    #[arg(long)]
    actor:  String,
    /// Write the terminal (deleted) version instead.
    #[arg(long)]
    retire: bool,
  },

  /// Append a custody event to an existing aggregate.
  Append {
    key:        String,
    /// Event type, e.g. VIEWED, TRANSFERRED, SEALED, EXPORTED, CUSTOM.
    #[arg(long = "type")]
    event_type: String,
    /// JSON payload for the event type.
    #[arg(long, default_value = "{}")]
    data:       String,
    #[arg(long, default_value = "evidence")]
    kind:       EntityKind,
    #[arg(long)]
    actor:      String,
    /// Only append if this is still the latest version.
    #[arg(long)]
    expect:     Option<u32>,
  },

  /// Replay an aggregate's hash chain. Exits non-zero if it is broken.
  Verify { key: String },

  /// Show the version of an entity that was valid at a point in time.
  AsOf {
    key: String,
    /// RFC 3339 timestamp.
    #[arg(long)]
    at:  DateTime<Utc>,
  },

  /// Reconstruct the chain of custody of an evidence item.
  Custody {
    key:      String,
    /// Render the human-readable report instead of JSON.
    #[arg(long)]
    markdown: bool,
  },

  /// Re-hash a file and compare it with the item's intake digest.
  CheckFile {
    key:   String,
    path:  PathBuf,
    #[arg(long)]
    actor: String,
  },

  /// Lift the write block on a quarantined aggregate. Repairs nothing.
  Release {
    key:   String,
    #[arg(long)]
    actor: String,
    #[arg(long)]
    note:  String,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg = LedgerConfig::load(&cli.config)?;
  if let Some(path) = cli.store {
    cfg.store_path = path;
  }

  let store = SqliteStore::open_with(&cfg.store_path, cfg.store_options())
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  run(&store, &cfg, cli.command).await
}

async fn run(store: &SqliteStore, cfg: &LedgerConfig, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Intake { path, key, tier, case, actor } => {
      let mut record = EvidenceRecord::from_path(&path, tier)
        .with_context(|| format!("failed to fingerprint {}", path.display()))?;
      record.case_id = case;
      let entity = store
        .write(EntityWrite::new(EntityKind::Evidence, key, record.to_fields()?, actor))
        .await?;
      tracing::info!(key = %entity.entity_key, hash = %record.file_hash, "evidence recorded");
      print_json(&entity)
    }

    Command::Scan { dir, tier, case, actor, prefix } => {
      let opts = ScanOptions { tier, case_id: case, actor_id: actor, key_prefix: prefix };
      let report = scan(store, &dir, &opts).await;
      tracing::info!(
        recorded = report.recorded.len(),
        unchanged = report.unchanged.len(),
        failed = report.failed.len(),
        "scan finished"
      );
      print_json(&report)
    }

    Command::Write { key, kind, fields, actor, retire } => {
      let entity = if retire {
        store.retire(&key, &actor).await?
      } else {
        let fields: Fields = serde_json::from_str(&fields).context("--fields must be a JSON object")?;
        store.write(EntityWrite::new(kind, key, fields, actor)).await?
      };
      print_json(&entity)
    }

    Command::Append { key, event_type, data, kind, actor, expect } => {
      let data: serde_json::Value = serde_json::from_str(&data).context("--data must be JSON")?;
      let payload = EventPayload::from_parts(&event_type.to_ascii_uppercase(), data)
        .with_context(|| format!("invalid payload for {event_type}"))?;
      let input = NewEvent::new(key, kind, payload, actor);
      let event = match expect {
        Some(version) => store.append(input.expecting(version)).await?,
        None => store.append_with_retry(input, cfg.max_append_retries).await?,
      };
      print_json(&event)
    }

    Command::Verify { key } => {
      let result = store.verify(&key).await?;
      print_json(&result)?;
      if !result.valid {
        bail!("hash chain for {key} is broken at event {:?}", result.broken_at);
      }
      Ok(())
    }

    Command::AsOf { key, at } => print_json(&store.as_of(&key, at).await?),

    Command::Custody { key, markdown } => {
      let trail = store.custody_trail(&key).await?;
      if markdown {
        print!("{}", trail.render_markdown());
        Ok(())
      } else {
        print_json(&trail)
      }
    }

    Command::CheckFile { key, path, actor } => {
      let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
      let observed = content_digest(file).context("failed to hash file")?;
      let event = store.check_content(&key, &observed, &actor).await?;
      print_json(&event)?;
      if let EventPayload::ContentVerified(check) = &event.payload
        && !check.matches
      {
        bail!("content of {} does not match the intake digest of {key}", path.display());
      }
      Ok(())
    }

    Command::Release { key, actor, note } => {
      if !store.release_quarantine(&key, &actor, &note).await? {
        bail!("{key} is not quarantined");
      }
      tracing::info!(%key, "quarantine released");
      Ok(())
    }
  }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
