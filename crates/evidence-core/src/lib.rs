//! Core types and trait definitions for the evidence integrity ledger.
//!
//! This crate is deliberately free of database dependencies. It holds the
//! hash chain engine, the chain verifier, the bitemporal entity and fact
//! types, the contradiction tie-break policy, and the store traits that
//! backends (e.g. `evidence-store-sqlite`) implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod custody;
pub mod entity;
pub mod error;
pub mod event;
pub mod evidence;
pub mod fact;
pub mod hash;
pub mod resolution;
pub mod store;
pub mod verify;

pub use error::{Error, Result};
