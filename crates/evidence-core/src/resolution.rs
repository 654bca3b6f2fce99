//! Automatic tie-break policy for contradictions.
//!
//! Order of precedence: higher trust weight, then higher tier of the linked
//! evidence. Anything still tied is left open for human adjudication; the
//! policy never guesses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::EvidenceTier;

/// What the policy needs to know about one side of a contradiction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub fact_id: Uuid,
  pub weight:  f64,
  /// Tier of the linked evidence. `None` (no evidence, or evidence without a
  /// readable tier) ranks below every tier.
  pub tier:    Option<EvidenceTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
  HigherWeight,
  HigherEvidenceTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoResolution {
  Winner {
    fact_id:   Uuid,
    reason:    ResolutionReason,
    /// Narrative recorded on the contradiction.
    narrative: String,
  },
  /// Equal weight and equal tier.
  Undecided,
}

impl AutoResolution {
  pub fn winner(&self) -> Option<Uuid> {
    match self {
      Self::Winner { fact_id, .. } => Some(*fact_id),
      Self::Undecided => None,
    }
  }
}

pub fn choose_winner(a: &Candidate, b: &Candidate) -> AutoResolution {
  if a.weight != b.weight {
    let (win, lose) = if a.weight > b.weight { (a, b) } else { (b, a) };
    return AutoResolution::Winner {
      fact_id:   win.fact_id,
      reason:    ResolutionReason::HigherWeight,
      narrative: format!(
        "automatic: fact {} outweighs fact {} ({:.3} > {:.3})",
        win.fact_id, lose.fact_id, win.weight, lose.weight
      ),
    };
  }

  if a.tier != b.tier {
    let (win, lose) = if a.tier > b.tier { (a, b) } else { (b, a) };
    return AutoResolution::Winner {
      fact_id:   win.fact_id,
      reason:    ResolutionReason::HigherEvidenceTier,
      narrative: format!(
        "automatic: equal weight {:.3}; fact {} is backed by {} evidence, fact {} by {}",
        win.weight,
        win.fact_id,
        tier_label(win.tier),
        lose.fact_id,
        tier_label(lose.tier)
      ),
    };
  }

  AutoResolution::Undecided
}

fn tier_label(tier: Option<EvidenceTier>) -> &'static str {
  tier.map_or("no", EvidenceTier::as_str)
}
