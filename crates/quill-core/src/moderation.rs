//! Moderation status and classifier output.
//!
//! The classifier is an external collaborator that hands back an untyped map
//! of label → score. It is validated once, at the boundary, into a
//! [`ClassificationResult`] with a closed label set.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr as _;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, Result};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModerationStatus {
  #[default]
  Pending,
  Approved,
  Rejected,
}

/// Labels the classifier is known to emit.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModerationLabel {
  LlmGenerated,
  Spam,
  Sexual,
  Hate,
  Violence,
  Harassment,
  SelfHarm,
  SexualMinors,
  Political,
  CryptoQuote,
  Disrespectful,
}

/// Validated classifier output for a single comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
  pub labels: BTreeMap<ModerationLabel, f64>,
  /// Highest label score; the moderation webhook forwards it verbatim.
  pub score:  f64,
}

impl ClassificationResult {
  /// Validate raw classifier output. Unknown labels and scores outside
  /// `[0, 1]` are rejected.
  pub fn from_raw(raw: &HashMap<String, f64>) -> Result<Self> {
    let mut labels = BTreeMap::new();
    for (name, &score) in raw {
      let label = ModerationLabel::from_str(name)
        .map_err(|_| Error::UnknownModerationLabel(name.clone()))?;
      check_score(name, score)?;
      labels.insert(label, score);
    }
    let score = labels.values().copied().fold(0.0, f64::max);
    Ok(Self { labels, score })
  }

  /// Compact `label:score` list, sorted by label, as sent on the webhook.
  pub fn labels_param(&self) -> String {
    self
      .labels
      .iter()
      .map(|(label, score)| format!("{label}:{score:.4}"))
      .collect::<Vec<_>>()
      .join(",")
  }
}

fn check_score(label: &str, score: f64) -> Result<()> {
  if score.is_finite() && (0.0..=1.0).contains(&score) {
    Ok(())
  } else {
    Err(Error::ScoreOutOfRange { label: label.to_owned(), score })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
  }

  #[test]
  fn known_labels_are_accepted() {
    let result = ClassificationResult::from_raw(&raw(&[("spam", 0.9), ("hate", 0.2)])).unwrap();
    assert_eq!(result.labels.len(), 2);
    assert_eq!(result.score, 0.9);
    assert_eq!(result.labels_param(), "spam:0.9000,hate:0.2000");
  }

  #[test]
  fn unknown_label_is_rejected() {
    let err = ClassificationResult::from_raw(&raw(&[("vibes", 0.1)])).unwrap_err();
    assert!(matches!(err, Error::UnknownModerationLabel(l) if l == "vibes"));
  }

  #[test]
  fn out_of_range_score_is_rejected() {
    let err = ClassificationResult::from_raw(&raw(&[("spam", 1.5)])).unwrap_err();
    assert!(matches!(err, Error::ScoreOutOfRange { .. }));
  }

  #[test]
  fn serialises_with_snake_case_keys() {
    let result = ClassificationResult::from_raw(&raw(&[("self_harm", 0.5)])).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["labels"]["self_harm"], 0.5);
  }
}
