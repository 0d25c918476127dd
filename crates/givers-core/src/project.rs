//! Projects
//!
//! Projects are owned by the project CRUD layer; the donation core only reads
//! them (and records the connected payments account after onboarding).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, Result};

/// Lifecycle state of a project
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Draft,
    Active,
    Frozen,
    Deleted,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Active => "active",
            ProjectStatus::Frozen => "frozen",
            ProjectStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ProjectStatus::Draft),
            "active" => Ok(ProjectStatus::Active),
            "frozen" => Ok(ProjectStatus::Frozen),
            "deleted" => Ok(ProjectStatus::Deleted),
            other => Err(ModelError::unknown("project status", other)),
        }
    }
}

/// Read-only view of a project
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,

    pub owner_id: String,

    /// Display name, snapshotted into activity items
    pub name: String,

    pub status: ProjectStatus,

    /// Owner's connected account at the payments provider
    #[serde(default)]
    pub external_account_id: Option<String>,

    /// Monthly amount the project needs to break even
    #[serde(default)]
    pub monthly_target: Option<i64>,

    /// Minimum monthly amount the owner has asked for
    #[serde(default)]
    pub owner_want_monthly: Option<i64>,

    /// Lowercase ISO currency code
    pub currency: String,
}

impl Project {
    /// Active with a connected payments account
    pub fn accepts_donations(&self) -> bool {
        self.status == ProjectStatus::Active
            && self
                .external_account_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}
