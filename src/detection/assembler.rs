//! Actionable view of a pass
//!
//! Downstream consumers (roster import, broadcast overlay) only ever see
//! this view. A banned slot never carries an identity here, whatever the
//! matcher said; the matcher's guess is exposed separately as
//! `banned_identity`.

use serde::{Deserialize, Serialize};

use super::{PassReport, SlotOutcome};
use crate::config::Rect;
use crate::vision::SlotMetrics;

/// One slot as consumers should act on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionableSlot {
    pub slot: usize,
    /// Identity to act on; always `None` for banned or failed slots
    pub best: Option<String>,
    pub score: usize,
    pub banned: bool,
    /// Identity the matcher saw under a ban
    pub banned_identity: Option<String>,
    /// Human readable label for overlays and logs
    pub label: String,
    pub metrics: SlotMetrics,
    pub roi: Rect,
    pub belt_box: Option<Rect>,
    /// Set when the slot could not be evaluated
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ActionableSlot {
    pub fn from_outcome(outcome: &SlotOutcome) -> Self {
        match outcome {
            SlotOutcome::Detected(r) => {
                let (best, banned_identity) = if r.banned {
                    (None, r.identity.clone())
                } else {
                    (r.identity.clone(), None)
                };
                let label = match (&best, r.banned) {
                    (_, true) => match &banned_identity {
                        Some(id) => format!("BANNED ({})", id),
                        None => "BANNED".to_string(),
                    },
                    (Some(id), false) => format!("{} ({})", id, r.score),
                    (None, false) => "unknown".to_string(),
                };
                Self {
                    slot: r.slot,
                    best,
                    score: r.score,
                    banned: r.banned,
                    banned_identity,
                    label,
                    metrics: r.metrics,
                    roi: r.roi,
                    belt_box: r.belt,
                    error: None,
                }
            }
            SlotOutcome::Failed { slot, rect, reason } => Self {
                slot: *slot,
                best: None,
                score: 0,
                banned: false,
                banned_identity: None,
                label: "error".to_string(),
                metrics: SlotMetrics::default(),
                roi: *rect,
                belt_box: None,
                error: Some(reason.clone()),
            },
        }
    }
}

/// What the external consumers receive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionableSummary {
    /// Resolved, non-banned identities in slot order
    pub clean: Vec<String>,
    /// Matcher identity of the first banned slot
    pub banned: Option<String>,
}

impl ActionableSummary {
    /// Summarize a pass, keeping at most `clean_limit` clean identities
    pub fn from_report(report: &PassReport, clean_limit: usize) -> Self {
        let clean = report
            .detected()
            .filter(|r| !r.banned)
            .filter_map(|r| r.identity.clone())
            .take(clean_limit)
            .collect();
        let banned = report
            .detected()
            .find(|r| r.banned)
            .and_then(|r| r.identity.clone());
        Self { clean, banned }
    }
}

/// The `matches.json` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub frame_width: u32,
    pub frame_height: u32,
    pub timestamp_ms: u64,
    pub results: Vec<ActionableSlot>,
    pub summary: ActionableSummary,
}

impl MatchRecord {
    pub fn new(report: &PassReport, clean_limit: usize) -> Self {
        Self {
            frame_width: report.frame_width,
            frame_height: report.frame_height,
            timestamp_ms: report.timestamp_ms,
            results: report.results.iter().map(ActionableSlot::from_outcome).collect(),
            summary: ActionableSummary::from_report(report, clean_limit),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::tests::detected;

    fn report(results: Vec<SlotOutcome>) -> PassReport {
        PassReport {
            frame_width: 800,
            frame_height: 200,
            timestamp_ms: 42,
            results,
        }
    }

    #[test]
    fn test_banned_slot_has_no_actionable_identity() {
        let outcome = detected(2, Some("krau"), true);
        let slot = ActionableSlot::from_outcome(&outcome);
        assert_eq!(slot.best, None);
        assert!(slot.banned);
        assert_eq!(slot.banned_identity.as_deref(), Some("krau"));
        assert_eq!(slot.label, "BANNED (krau)");
    }

    #[test]
    fn test_labels() {
        let label = |outcome: SlotOutcome| ActionableSlot::from_outcome(&outcome).label;
        assert_eq!(label(detected(0, Some("celine"), false)), "celine (40)");
        assert_eq!(label(detected(0, None, false)), "unknown");
        assert_eq!(label(detected(0, None, true)), "BANNED");
    }

    #[test]
    fn test_summary_caps_clean_and_takes_first_banned() {
        let report = report(vec![
            detected(0, Some("a"), false),
            detected(1, Some("b"), true),
            detected(2, None, false),
            detected(3, Some("c"), false),
            detected(4, Some("d"), false),
            detected(5, Some("e"), true),
            detected(6, Some("f"), false),
            detected(7, Some("g"), false),
        ]);
        let summary = ActionableSummary::from_report(&report, 4);
        assert_eq!(summary.clean, vec!["a", "c", "d", "f"]);
        assert_eq!(summary.banned.as_deref(), Some("b"));
    }

    #[test]
    fn test_record_keeps_one_entry_per_slot() {
        let report = report(vec![
            detected(0, Some("a"), false),
            SlotOutcome::Failed {
                slot: 1,
                rect: Rect::new(790, 0, 50, 50),
                reason: "outside frame".to_string(),
            },
        ]);
        let record = MatchRecord::new(&report, 4);
        assert_eq!(record.results.len(), 2);
        assert_eq!(record.results[1].error.as_deref(), Some("outside frame"));
        assert_eq!(record.results[1].best, None);

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["results"][0]["best"], "a");
        assert!(value["results"][0].get("error").is_none());
        assert_eq!(value["summary"]["clean"], serde_json::json!(["a"]));
        assert!(value["summary"]["banned"].is_null());
    }
}
