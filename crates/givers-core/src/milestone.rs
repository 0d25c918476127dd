//! Milestone Evaluation
//!
//! A milestone fires when a donation moves the running monthly total of a
//! project from strictly below a threshold to at or above it. Callers supply
//! the total *before* the donation; evaluation itself is pure.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, Result};
use crate::project::Project;

/// Named monthly threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    /// The owner's stated minimum (`owner_want_monthly`)
    MinMonthly,
    /// The project's monthly target (`monthly_target`)
    TargetMonthly,
}

impl MilestoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneKind::MinMonthly => "min_monthly",
            MilestoneKind::TargetMonthly => "target_monthly",
        }
    }
}

impl FromStr for MilestoneKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min_monthly" => Ok(MilestoneKind::MinMonthly),
            "target_monthly" => Ok(MilestoneKind::TargetMonthly),
            other => Err(ModelError::unknown("milestone", other)),
        }
    }
}

/// A threshold crossing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub kind: MilestoneKind,

    /// Threshold amount that was crossed
    pub threshold: i64,

    /// Running monthly total including the new donation
    pub total: i64,
}

/// Thresholds configured on `project`, in evaluation order
pub fn thresholds(project: &Project) -> Vec<(MilestoneKind, i64)> {
    [
        (MilestoneKind::MinMonthly, project.owner_want_monthly),
        (MilestoneKind::TargetMonthly, project.monthly_target),
    ]
    .into_iter()
    .filter_map(|(kind, amount)| amount.filter(|a| *a > 0).map(|a| (kind, a)))
    .collect()
}

/// Decide whether adding `new_amount` to `prior_total` crosses a threshold.
///
/// When several thresholds are crossed at once the highest one is reported.
pub fn evaluate(project: &Project, prior_total: i64, new_amount: i64) -> Option<Milestone> {
    if new_amount <= 0 {
        return None;
    }
    let total = prior_total.saturating_add(new_amount);

    thresholds(project)
        .into_iter()
        .filter(|(_, threshold)| prior_total < *threshold && total >= *threshold)
        .max_by_key(|(_, threshold)| *threshold)
        .map(|(kind, threshold)| Milestone {
            kind,
            threshold,
            total,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStatus;

    fn project(min: Option<i64>, target: Option<i64>) -> Project {
        Project {
            id: "p1".into(),
            owner_id: "u1".into(),
            name: "Tool".into(),
            status: ProjectStatus::Active,
            external_account_id: Some("acct_1".into()),
            monthly_target: target,
            owner_want_monthly: min,
            currency: "jpy".into(),
        }
    }

    #[test]
    fn test_crossing_min_monthly() {
        let p = project(Some(3000), Some(10_000));
        let m = evaluate(&p, 2500, 700).unwrap();
        assert_eq!(m.kind, MilestoneKind::MinMonthly);
        assert_eq!(m.threshold, 3000);
        assert_eq!(m.total, 3200);

        // Already above the minimum: nothing fires
        assert_eq!(evaluate(&p, 3200, 700), None);
    }

    #[test]
    fn test_landing_exactly_on_threshold_fires() {
        let p = project(Some(3000), None);
        assert!(evaluate(&p, 2999, 1).is_some());
        assert!(evaluate(&p, 3000, 1).is_none());
    }

    #[test]
    fn test_crossing_both_reports_target() {
        let p = project(Some(3000), Some(10_000));
        let m = evaluate(&p, 0, 10_000).unwrap();
        assert_eq!(m.kind, MilestoneKind::TargetMonthly);
        assert_eq!(m.threshold, 10_000);
    }

    #[test]
    fn test_no_thresholds() {
        let p = project(None, Some(0));
        assert!(thresholds(&p).is_empty());
        assert_eq!(evaluate(&p, 0, 1_000_000), None);
    }

    #[test]
    fn test_evaluation_is_pure() {
        let p = project(Some(3000), Some(10_000));
        for prior in [0, 2500, 2999, 3000, 9999, 12_000] {
            for amount in [1, 700, 7000] {
                assert_eq!(evaluate(&p, prior, amount), evaluate(&p, prior, amount));
            }
        }
    }
}
