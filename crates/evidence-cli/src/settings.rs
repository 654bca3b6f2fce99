//! Ledger settings: an optional TOML file layered under `EVIDENCE_*`
//! environment variables.

use std::{path::{Path, PathBuf}, time::Duration};

use anyhow::Context as _;
use evidence_store_sqlite::StoreOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  #[serde(default = "default_store_path")]
  pub store_path:         PathBuf,
  /// Run the tie-break policy as soon as a contradiction is detected.
  #[serde(default)]
  pub auto_resolve:       bool,
  #[serde(default = "default_max_append_retries")]
  pub max_append_retries: u32,
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms:    u64,
}

fn default_store_path() -> PathBuf { PathBuf::from("evidence.db") }

fn default_max_append_retries() -> u32 { 3 }

fn default_busy_timeout_ms() -> u64 { 5_000 }

impl LedgerConfig {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(
      config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("EVIDENCE").try_parsing(true)),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .build()
      .context("failed to read config")?
      .try_deserialize()
      .context("failed to deserialise LedgerConfig")
  }

  pub fn store_options(&self) -> StoreOptions {
    StoreOptions {
      auto_resolve: self.auto_resolve,
      busy_timeout: Duration::from_millis(self.busy_timeout_ms),
    }
  }
}
