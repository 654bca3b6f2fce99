//! Error types for `evidence-core`.
//!
//! These are caller-input validation failures and decoding failures. None of
//! them is retryable without correcting the input.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("weight {0} is outside [0, 1]")]
  InvalidWeight(f64),

  #[error("a fact cannot contradict itself: {0}")]
  SelfContradiction(Uuid),

  #[error("a fact cannot be linked to itself: {0}")]
  SelfLink(Uuid),

  #[error(
    "fact {winner} is not part of contradiction {contradiction_id}"
  )]
  InvalidResolution { contradiction_id: Uuid, winner: Uuid },

  #[error("{0} must not be empty")]
  EmptyField(&'static str),

  #[error("unknown event type: {0:?}")]
  UnknownEventType(String),

  #[error("unknown {what}: {value:?}")]
  UnknownVariant { what: &'static str, value: String },

  #[error("invalid digest: {0}")]
  InvalidDigest(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
