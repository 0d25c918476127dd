//! Read Models
//!
//! Shapes returned by owner and public queries: monthly sums, chart points,
//! donor messages and token-migration results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::project::Project;

/// Sum of non-deleted donation amounts for one project in one calendar month
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySum {
    /// `yyyy-mm`
    pub month: String,
    pub amount: i64,
}

/// One point of the funding chart
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub month: String,
    pub min_amount: i64,
    pub target_amount: i64,
    pub actual_amount: i64,
}

impl ChartPoint {
    /// One point per month that has donations, ascending
    pub fn series(project: &Project, sums: &[MonthlySum]) -> Vec<Self> {
        let min_amount = project.owner_want_monthly.unwrap_or(0);
        let target_amount = project.monthly_target.unwrap_or(0);
        sums.iter()
            .map(|s| Self {
                month: s.month.clone(),
                min_amount,
                target_amount,
                actual_amount: s.amount,
            })
            .collect()
    }
}

/// A donor message as shown to the project owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationMessage {
    pub donor_name: String,
    pub amount: i64,
    pub message: String,
    pub is_recurring: bool,
    pub created_at: DateTime<Utc>,
}

/// Page of messages plus the unpaginated count
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<DonationMessage>,
    pub total: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Display name used for token donors and unknown users
pub const ANONYMOUS_DONOR: &str = "Anonymous";

/// Message listing parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageQuery {
    pub limit: i64,
    pub offset: i64,
    pub sort: SortOrder,
    /// Case-insensitive substring of the donor display name
    pub donor: Option<String>,
}

pub const DEFAULT_MESSAGE_PAGE: i64 = 50;
pub const MAX_MESSAGE_PAGE: i64 = 100;

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_MESSAGE_PAGE,
            offset: 0,
            sort: SortOrder::Desc,
            donor: None,
        }
    }
}

impl MessageQuery {
    /// Build a query from optional request parameters, clamping the page size
    /// to `1..=100` and the offset to `>= 0`. A blank donor filter is dropped.
    pub fn new(
        limit: Option<i64>,
        offset: Option<i64>,
        sort: Option<SortOrder>,
        donor: Option<String>,
    ) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_MESSAGE_PAGE),
            _ => DEFAULT_MESSAGE_PAGE,
        };
        Self {
            limit,
            offset: offset.unwrap_or(0).max(0),
            sort: sort.unwrap_or_default(),
            donor: donor
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }

    /// Whether `donor_name` passes the donor filter
    pub fn matches_donor(&self, donor_name: &str) -> bool {
        self.donor.as_deref().is_none_or(|needle| {
            donor_name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        })
    }
}

/// Result of rebinding a donor token to a user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub migrated_count: u64,
    pub already_migrated: bool,
}
