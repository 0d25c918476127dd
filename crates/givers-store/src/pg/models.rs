//! Row types and their conversions to the domain model

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Text, Timestamptz};

use givers_core::{
    ActivityItem, Donation, DonationMessage, Donor, MonthlySum, Project, SubscriptionStatus,
};

use super::schema::{activity, donations, projects};
use crate::error::{Result, StoreError};

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = donations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DonationRow {
    pub id: String,
    pub project_id: String,
    pub donor_type: String,
    pub donor_id: String,
    pub amount: i64,
    pub currency: String,
    pub is_recurring: bool,
    pub message: Option<String>,
    pub paused: bool,
    pub next_billing_message: Option<String>,
    pub external_payment_id: String,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl From<&Donation> for DonationRow {
    fn from(d: &Donation) -> Self {
        Self {
            id: d.id.clone(),
            project_id: d.project_id.clone(),
            donor_type: d.donor.donor_type().as_str().to_string(),
            donor_id: d.donor.id().to_string(),
            amount: d.amount,
            currency: d.currency.clone(),
            is_recurring: d.is_recurring,
            message: d.message.clone(),
            paused: d.paused,
            next_billing_message: d.next_billing_message.clone(),
            external_payment_id: d.external_payment_id.clone(),
            status: d.status.map(|s| s.as_str().to_string()),
            created_at: d.created_at,
            updated_at: d.updated_at,
            deleted: d.deleted,
        }
    }
}

impl TryFrom<DonationRow> for Donation {
    type Error = StoreError;

    fn try_from(row: DonationRow) -> Result<Self> {
        Ok(Self {
            donor: Donor::from_parts(&row.donor_type, &row.donor_id)?,
            status: row
                .status
                .as_deref()
                .map(str::parse::<SubscriptionStatus>)
                .transpose()?,
            id: row.id,
            project_id: row.project_id,
            amount: row.amount,
            currency: row.currency,
            is_recurring: row.is_recurring,
            message: row.message,
            paused: row.paused,
            next_billing_message: row.next_billing_message,
            external_payment_id: row.external_payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted: row.deleted,
        })
    }
}

pub fn donations_from_rows(rows: Vec<DonationRow>) -> Result<Vec<Donation>> {
    rows.into_iter().map(Donation::try_from).collect()
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = activity)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ActivityRow {
    pub id: String,
    pub kind: String,
    pub project_id: String,
    pub project_name: String,
    pub actor_name: Option<String>,
    pub amount: Option<i64>,
    pub message: Option<String>,
    pub milestone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ActivityItem> for ActivityRow {
    fn from(a: &ActivityItem) -> Self {
        Self {
            id: a.id.clone(),
            kind: a.kind.as_str().to_string(),
            project_id: a.project_id.clone(),
            project_name: a.project_name.clone(),
            actor_name: a.actor_name.clone(),
            amount: a.amount,
            message: a.message.clone(),
            milestone: a.milestone.map(|m| m.as_str().to_string()),
            created_at: a.created_at,
        }
    }
}

impl TryFrom<ActivityRow> for ActivityItem {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse()?,
            milestone: row.milestone.as_deref().map(str::parse).transpose()?,
            id: row.id,
            project_id: row.project_id,
            project_name: row.project_name,
            actor_name: row.actor_name,
            amount: row.amount,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = projects)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProjectRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub status: String,
    pub external_account_id: Option<String>,
    pub monthly_target: Option<i64>,
    pub owner_want_monthly: Option<i64>,
    pub currency: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            external_account_id: row.external_account_id.filter(|a| !a.is_empty()),
            monthly_target: row.monthly_target,
            owner_want_monthly: row.owner_want_monthly,
            currency: row.currency,
        })
    }
}

#[derive(QueryableByName, Debug)]
pub struct TotalRow {
    #[diesel(sql_type = BigInt)]
    pub total: i64,
}

#[derive(QueryableByName, Debug)]
pub struct MonthRow {
    #[diesel(sql_type = Text)]
    pub month: String,
    #[diesel(sql_type = BigInt)]
    pub amount: i64,
}

impl From<MonthRow> for MonthlySum {
    fn from(row: MonthRow) -> Self {
        Self {
            month: row.month,
            amount: row.amount,
        }
    }
}

#[derive(QueryableByName, Debug)]
pub struct MessageRow {
    #[diesel(sql_type = Text)]
    pub donor_name: String,
    #[diesel(sql_type = BigInt)]
    pub amount: i64,
    #[diesel(sql_type = Text)]
    pub message: String,
    #[diesel(sql_type = Bool)]
    pub is_recurring: bool,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for DonationMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            donor_name: row.donor_name,
            amount: row.amount,
            message: row.message,
            is_recurring: row.is_recurring,
            created_at: row.created_at,
        }
    }
}
