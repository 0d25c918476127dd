//! Activity Feed Items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, Result};
use crate::milestone::{Milestone, MilestoneKind};

/// What happened. Project items are written by the project subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Donation,
    ProjectCreated,
    ProjectUpdated,
    MilestoneReached,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Donation => "donation",
            ActivityKind::ProjectCreated => "project_created",
            ActivityKind::ProjectUpdated => "project_updated",
            ActivityKind::MilestoneReached => "milestone_reached",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "donation" => Ok(ActivityKind::Donation),
            "project_created" => Ok(ActivityKind::ProjectCreated),
            "project_updated" => Ok(ActivityKind::ProjectUpdated),
            "milestone_reached" => Ok(ActivityKind::MilestoneReached),
            other => Err(ModelError::unknown("activity type", other)),
        }
    }
}

/// One entry of the public activity feed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ActivityKind,

    pub project_id: String,

    /// Project name at the time of the event
    pub project_name: String,

    /// Donor display name; absent for anonymous donors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    /// Donor's note, for donation items that carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Which threshold was reached, for milestone items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<MilestoneKind>,

    pub created_at: DateTime<Utc>,
}

impl ActivityItem {
    fn base(kind: ActivityKind, project_id: &str, project_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            project_id: project_id.to_string(),
            project_name: project_name.to_string(),
            actor_name: None,
            amount: None,
            message: None,
            milestone: None,
            created_at: Utc::now(),
        }
    }

    pub fn donation(
        project_id: &str,
        project_name: &str,
        actor_name: Option<String>,
        amount: i64,
    ) -> Self {
        Self {
            actor_name,
            amount: Some(amount),
            ..Self::base(ActivityKind::Donation, project_id, project_name)
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The reached threshold is carried in `amount`
    pub fn milestone(project_id: &str, project_name: &str, milestone: &Milestone) -> Self {
        Self {
            amount: Some(milestone.threshold),
            milestone: Some(milestone.kind),
            ..Self::base(ActivityKind::MilestoneReached, project_id, project_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_wire_shape() {
        let item = ActivityItem::donation("p1", "Tool", None, 1000);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "donation");
        assert_eq!(json["amount"], 1000);
        assert!(json.get("actor_name").is_none());
        assert!(json.get("message").is_none());

        let item = item.with_message("see you next month");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["message"], "see you next month");
    }

    #[test]
    fn test_milestone_item_carries_threshold() {
        let m = Milestone {
            kind: MilestoneKind::MinMonthly,
            threshold: 3000,
            total: 3200,
        };
        let item = ActivityItem::milestone("p1", "Tool", &m);
        assert_eq!(item.kind, ActivityKind::MilestoneReached);
        assert_eq!(item.amount, Some(3000));
        assert_eq!(item.milestone, Some(MilestoneKind::MinMonthly));
        assert_eq!("milestone_reached".parse::<ActivityKind>().unwrap(), item.kind);
    }
}
