//! Donations and Subscriptions
//!
//! A donation row is created only once the payments provider confirms the
//! payment. Recurring donations double as the local mirror of a provider
//! subscription and carry its [`SubscriptionStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ModelError, Result};

/// Per-transaction ceiling, in minor currency units
pub const MAX_DONATION_AMOUNT: i64 = 1_000_000;

/// Longest donor message accepted at checkout (after trimming)
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Longest message a stored donation may carry
pub const MAX_STORED_MESSAGE_CHARS: usize = 1024;

/// Discriminant of [`Donor`], as persisted in `donor_type`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonorType {
    User,
    Token,
}

impl DonorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonorType::User => "user",
            DonorType::Token => "token",
        }
    }
}

impl FromStr for DonorType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(DonorType::User),
            "token" => Ok(DonorType::Token),
            other => Err(ModelError::unknown("donor type", other)),
        }
    }
}

impl std::fmt::Display for DonorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who gave a donation.
///
/// A token is an opaque anonymous identifier and is never interpreted as a
/// user id; the two only meet during token migration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "donor_type", content = "donor_id", rename_all = "lowercase")]
pub enum Donor {
    /// Signed-in user, keyed by user id
    User(String),

    /// Anonymous donor, keyed by an opaque browser token
    Token(String),
}

impl Donor {
    /// Build a donor from its persisted `(donor_type, donor_id)` pair
    pub fn from_parts(donor_type: &str, donor_id: &str) -> Result<Self> {
        if donor_id.is_empty() {
            return Err(ModelError::EmptyDonorId);
        }
        Ok(match donor_type.parse::<DonorType>()? {
            DonorType::User => Donor::User(donor_id.to_string()),
            DonorType::Token => Donor::Token(donor_id.to_string()),
        })
    }

    pub fn donor_type(&self) -> DonorType {
        match self {
            Donor::User(_) => DonorType::User,
            Donor::Token(_) => DonorType::Token,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Donor::User(id) | Donor::Token(id) => id,
        }
    }

    /// True when this donor is the signed-in user `user_id`
    pub fn is_user(&self, user_id: &str) -> bool {
        matches!(self, Donor::User(id) if id == user_id)
    }
}

/// Local state of a recurring donation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    /// Terminal
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same state is allowed so that provider acks and
    /// replayed webhooks are no-ops.
    pub fn can_become(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::{Active, Cancelled, Paused};
        match (self, next) {
            (Cancelled, Cancelled) => true,
            (Cancelled, _) => false,
            (Active | Paused, Active | Paused | Cancelled) => true,
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(ModelError::unknown("subscription status", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed donation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Donation {
    /// Opaque unique id
    pub id: String,

    pub project_id: String,

    #[serde(flatten)]
    pub donor: Donor,

    /// Minor currency units, always positive
    pub amount: i64,

    /// Lowercase ISO currency code
    pub currency: String,

    pub is_recurring: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Only ever true for recurring donations
    pub paused: bool,

    /// Message the donor wants posted with the next recurring charge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_billing_message: Option<String>,

    /// Subscription state; `None` for one-off donations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,

    /// Provider payment reference (one-off) or subscription reference (recurring)
    #[serde(skip_serializing)]
    pub external_payment_id: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing)]
    pub deleted: bool,
}

impl Donation {
    /// Materialise a new donation from a provider confirmation
    pub fn new(new: NewDonation, now: DateTime<Utc>) -> Self {
        let status = new.is_recurring.then_some(SubscriptionStatus::Active);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: new.project_id,
            donor: new.donor,
            amount: new.amount,
            currency: new.currency,
            is_recurring: new.is_recurring,
            message: new.message,
            paused: false,
            next_billing_message: None,
            status,
            external_payment_id: new.external_payment_id,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    /// Calendar month (UTC) the donation counts towards
    pub fn month(&self) -> String {
        month_key(self.created_at)
    }

    /// Apply a status change, keeping `paused` consistent with it.
    ///
    /// Returns false (and changes nothing) when the transition is illegal.
    pub fn transition(&mut self, next: SubscriptionStatus, now: DateTime<Utc>) -> bool {
        let Some(current) = self.status else {
            return false;
        };
        if !current.can_become(next) {
            return false;
        }
        self.status = Some(next);
        self.paused = next == SubscriptionStatus::Paused;
        self.updated_at = now;
        true
    }
}

/// A donation about to be recorded from a webhook
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDonation {
    pub project_id: String,
    pub donor: Donor,
    pub amount: i64,
    pub currency: String,
    pub is_recurring: bool,
    pub message: Option<String>,
    pub external_payment_id: String,
}

impl NewDonation {
    /// Clip an incoming message to what a stored row may carry
    pub fn clipped_message(message: Option<&str>) -> Option<String> {
        message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|m| m.chars().take(MAX_STORED_MESSAGE_CHARS).collect())
    }
}

/// Owner-initiated changes to a donation
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DonationPatch {
    #[serde(default)]
    pub amount: Option<i64>,

    #[serde(default)]
    pub paused: Option<bool>,

    /// Recurring only; an empty string clears it
    #[serde(default)]
    pub next_billing_message: Option<String>,
}

impl DonationPatch {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.paused.is_none() && self.next_billing_message.is_none()
    }

    /// The message to store: trimmed, with empty meaning none
    pub fn normalized_next_billing_message(&self) -> Option<Option<String>> {
        self.next_billing_message.as_deref().map(|m| {
            let m = m.trim();
            (!m.is_empty()).then(|| m.to_string())
        })
    }
}

/// `yyyy-mm` key of the calendar month containing `at` (UTC)
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}
