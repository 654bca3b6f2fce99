//! [`SqliteStore`]: the SQLite implementation of the ledger, entity and fact
//! store traits.
//!
//! The trait impls live in `ledger.rs`, `entities.rs` and `facts.rs`; this
//! module owns the connection, options and transaction plumbing.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use evidence_core::hash::ledger_time;
use rusqlite::{Transaction, TransactionBehavior};

use crate::{Result, schema::SCHEMA};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// Run the automatic tie-break policy as soon as a contradiction is
  /// detected.
  pub auto_resolve: bool,
  /// How long a writer waits for another connection's lock before failing
  /// with `StorageUnavailable`.
  pub busy_timeout: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self { auto_resolve: false, busy_timeout: Duration::from_secs(5) }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An evidence ledger backed by a single SQLite file.
///
/// Cloning is cheap. The inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn:    tokio_rusqlite::Connection,
  pub(crate) options: StoreOptions,
}

impl SqliteStore {
  /// Open (or create) a store at `path` with default options.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, StoreOptions::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, options };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with(StoreOptions::default()).await
  }

  pub async fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, options };
    store.init_schema().await?;
    Ok(store)
  }

  pub fn options(&self) -> &StoreOptions { &self.options }

  async fn init_schema(&self) -> Result<()> {
    let busy_timeout = self.options.busy_timeout;
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Plumbing ────────────────────────────────────────────────────────────────

/// The store's clock, at the precision timestamps are hashed and stored with.
pub(crate) fn now() -> DateTime<Utc> { ledger_time(Utc::now()) }

/// Run `f` inside `BEGIN IMMEDIATE`, committing only if it succeeds.
///
/// The write lock is taken before the first read, so a read-then-write inside
/// `f` cannot interleave with another connection's write. Dropping the
/// transaction on error rolls it back.
pub(crate) fn in_immediate_tx<T>(
  conn: &mut rusqlite::Connection,
  f: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let value = f(&tx)?;
  tx.commit()?;
  Ok(value)
}
