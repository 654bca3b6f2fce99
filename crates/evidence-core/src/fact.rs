//! Atomic facts and the contradictions between them.
//!
//! Facts follow the same bitemporal discipline as entities: an update closes
//! the current version and opens a new one. Contradictions are stored once
//! per unordered pair of facts.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Classification ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationLevel {
  Fact,
  Claim,
  Speculation,
  Opinion,
}

impl ClassificationLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Fact => "fact",
      Self::Claim => "claim",
      Self::Speculation => "speculation",
      Self::Opinion => "opinion",
    }
  }
}

impl FromStr for ClassificationLevel {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "fact" => Ok(Self::Fact),
      "claim" => Ok(Self::Claim),
      "speculation" => Ok(Self::Speculation),
      "opinion" => Ok(Self::Opinion),
      other => Err(Error::UnknownVariant { what: "classification", value: other.to_owned() }),
    }
  }
}

/// Reject weights outside `[0, 1]`, including NaN.
pub fn validate_weight(weight: f64) -> Result<f64> {
  if weight.is_finite() && (0.0..=1.0).contains(&weight) {
    Ok(weight)
  } else {
    Err(Error::InvalidWeight(weight))
  }
}

// ─── Fact ────────────────────────────────────────────────────────────────────

/// One temporal slice of an atomic factual assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
  pub fact_id:             Uuid,
  pub case_id:             String,
  pub text:                String,
  pub fact_type:           String,
  pub classification:      ClassificationLevel,
  /// Trust weight in `[0, 1]`.
  pub weight:              f64,
  pub credibility_factors: BTreeSet<String>,
  pub verified:            bool,
  /// Key of the evidence entity backing this fact, if any.
  pub evidence_id:         Option<String>,
  pub version_number:      u32,
  pub valid_from:          DateTime<Utc>,
  pub valid_to:            Option<DateTime<Utc>>,
}

impl Fact {
  pub fn is_current(&self) -> bool { self.valid_to.is_none() }
}

/// Input to [`crate::store::FactStore::assert_fact`].
#[derive(Debug, Clone)]
pub struct NewFact {
  pub case_id:             String,
  pub text:                String,
  pub fact_type:           String,
  pub classification:      ClassificationLevel,
  pub weight:              f64,
  pub evidence_id:         Option<String>,
  pub credibility_factors: BTreeSet<String>,
}

impl NewFact {
  pub fn new(
    case_id: impl Into<String>,
    text: impl Into<String>,
    fact_type: impl Into<String>,
    classification: ClassificationLevel,
    weight: f64,
  ) -> Self {
    Self {
      case_id: case_id.into(),
      text: text.into(),
      fact_type: fact_type.into(),
      classification,
      weight,
      evidence_id: None,
      credibility_factors: BTreeSet::new(),
    }
  }

  pub fn with_evidence(mut self, evidence_id: impl Into<String>) -> Self {
    self.evidence_id = Some(evidence_id.into());
    self
  }

  pub fn validate(&self) -> Result<()> {
    validate_weight(self.weight)?;
    if self.case_id.trim().is_empty() {
      return Err(Error::EmptyField("case_id"));
    }
    if self.text.trim().is_empty() {
      return Err(Error::EmptyField("text"));
    }
    Ok(())
  }
}

/// A partial change to a fact. `None` leaves the attribute unchanged.
#[derive(Debug, Clone, Default)]
pub struct FactUpdate {
  pub weight:              Option<f64>,
  pub verified:            Option<bool>,
  pub classification:      Option<ClassificationLevel>,
  pub credibility_factors: Option<BTreeSet<String>>,
}

impl FactUpdate {
  /// Build the successor of `current`. Version and validity are left for the
  /// store to assign.
  pub fn apply(self, current: &Fact) -> Result<Fact> {
    let mut next = current.clone();
    if let Some(w) = self.weight {
      next.weight = validate_weight(w)?;
    }
    if let Some(v) = self.verified {
      next.verified = v;
    }
    if let Some(c) = self.classification {
      next.classification = c;
    }
    if let Some(f) = self.credibility_factors {
      next.credibility_factors = f;
    }
    Ok(next)
  }
}

// ─── Links ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactRelation {
  Supports,
  Contradicts,
}

impl FactRelation {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Supports => "supports",
      Self::Contradicts => "contradicts",
    }
  }
}

impl FromStr for FactRelation {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "supports" => Ok(Self::Supports),
      "contradicts" => Ok(Self::Contradicts),
      other => Err(Error::UnknownVariant { what: "fact relation", value: other.to_owned() }),
    }
  }
}

/// A directed relation from one fact to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactLink {
  pub link_id:      Uuid,
  pub from_fact_id: Uuid,
  pub to_fact_id:   Uuid,
  pub relation:     FactRelation,
  pub recorded_at:  DateTime<Utc>,
}

// ─── Contradiction ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
  /// One fact asserts what the other denies.
  Direct,
  /// The facts place the same thing at incompatible times.
  Temporal,
  /// The facts overlap but disagree in detail.
  Partial,
  /// The facts' sources disagree about provenance.
  Source,
  /// Written as `CUSTOM:<name>`. An unprefixed unknown name also reads as
  /// custom.
  Custom(String),
}

impl fmt::Display for ConflictType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Direct => f.write_str("DIRECT"),
      Self::Temporal => f.write_str("TEMPORAL"),
      Self::Partial => f.write_str("PARTIAL"),
      Self::Source => f.write_str("SOURCE"),
      Self::Custom(name) => write!(f, "{CUSTOM_PREFIX}{name}"),
    }
  }
}

/// Custom types are written with this prefix so a name that collides with a
/// built-in type still reads back as custom.
const CUSTOM_PREFIX: &str = "CUSTOM:";

impl FromStr for ConflictType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    if let Some(name) = s.strip_prefix(CUSTOM_PREFIX) {
      return if name.trim().is_empty() {
        Err(Error::EmptyField("conflict_type"))
      } else {
        Ok(Self::Custom(name.to_owned()))
      };
    }
    match s.trim() {
      "" => Err(Error::EmptyField("conflict_type")),
      t if t.eq_ignore_ascii_case("DIRECT") => Ok(Self::Direct),
      t if t.eq_ignore_ascii_case("TEMPORAL") => Ok(Self::Temporal),
      t if t.eq_ignore_ascii_case("PARTIAL") => Ok(Self::Partial),
      t if t.eq_ignore_ascii_case("SOURCE") => Ok(Self::Source),
      other => Ok(Self::Custom(other.to_owned())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
  Manual,
  Automatic,
}

impl ResolutionMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Manual => "manual",
      Self::Automatic => "automatic",
    }
  }
}

impl FromStr for ResolutionMethod {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "manual" => Ok(Self::Manual),
      "automatic" => Ok(Self::Automatic),
      other => Err(Error::UnknownVariant { what: "resolution method", value: other.to_owned() }),
    }
  }
}

/// A recorded conflict between exactly two distinct facts.
///
/// `fact_a_id < fact_b_id` always holds, whatever order the pair was
/// reported in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
  pub contradiction_id:  Uuid,
  pub fact_a_id:         Uuid,
  pub fact_b_id:         Uuid,
  pub conflict_type:     ConflictType,
  pub winning_fact_id:   Option<Uuid>,
  pub resolution:        Option<String>,
  pub resolution_method: Option<ResolutionMethod>,
  pub detected_at:       DateTime<Utc>,
  pub resolved_at:       Option<DateTime<Utc>>,
}

impl Contradiction {
  pub fn is_resolved(&self) -> bool { self.winning_fact_id.is_some() }

  pub fn involves(&self, fact_id: Uuid) -> bool {
    self.fact_a_id == fact_id || self.fact_b_id == fact_id
  }

  /// `winner` must be one of the two facts in this contradiction.
  pub fn check_winner(&self, winner: Uuid) -> Result<()> {
    if self.involves(winner) {
      Ok(())
    } else {
      Err(Error::InvalidResolution { contradiction_id: self.contradiction_id, winner })
    }
  }
}

/// The stable storage order for an unordered pair of facts.
pub fn ordered_pair(a: Uuid, b: Uuid) -> Result<(Uuid, Uuid)> {
  match a.cmp(&b) {
    std::cmp::Ordering::Less => Ok((a, b)),
    std::cmp::Ordering::Greater => Ok((b, a)),
    std::cmp::Ordering::Equal => Err(Error::SelfContradiction(a)),
  }
}
