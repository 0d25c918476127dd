//! # givers-store
//!
//! Durable state for the donation lifecycle.
//!
//! - [`DonationStore`] owns donations, subscriptions, the processed-event
//!   ledger and the token-migration audit. Webhook ingestion works through a
//!   [`DonationTx`]; dropping one without committing rolls it back.
//! - [`ActivityStore`] owns the public activity feed.
//! - [`ProjectDirectory`] and [`UserDirectory`] read data owned by other
//!   subsystems.
//!
//! Two backends implement every trait: [`MemoryStore`] for tests and local
//! development, and (feature `postgres`) [`PgStore`].

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod pg;

use async_trait::async_trait;
use givers_core::{
    ActivityItem, Donation, DonationPatch, MessagePage, MessageQuery, MigrationOutcome,
    MonthlySum, Project, SubscriptionStatus, MAX_MESSAGE_CHARS,
};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use pg::{create_pool, mask_database_url, run_migrations, DbPool, PgStore};

/// Result of an idempotent insert
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was new and is now stored
    Inserted(Donation),

    /// `(project_id, external_payment_id)` was already present; nothing changed
    Existing(Donation),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn donation(&self) -> &Donation {
        match self {
            InsertOutcome::Inserted(d) | InsertOutcome::Existing(d) => d,
        }
    }
}

/// Webhook-side unit of work.
///
/// Nothing is visible to other readers until [`DonationTx::commit`].
#[async_trait]
pub trait DonationTx: Send {
    /// Record that `event_id` has been applied. `false` means it already was.
    async fn mark_event_processed(&mut self, event_id: &str) -> Result<bool>;

    /// Insert keyed by `(project_id, external_payment_id)`
    async fn insert_if_absent(&mut self, donation: Donation) -> Result<InsertOutcome>;

    /// Bump `updated_at` only
    async fn touch(&mut self, donation_id: &str) -> Result<()>;

    /// Sum of non-deleted amounts for `project_id` in `month` (`yyyy-mm`).
    ///
    /// Serialises concurrent writers for the same project until the
    /// transaction ends.
    async fn month_total(&mut self, project_id: &str, month: &str) -> Result<i64>;

    async fn find_by_external_id(&mut self, external_payment_id: &str)
        -> Result<Option<Donation>>;

    /// Write a subscription status (and the matching `paused` flag)
    async fn set_status(&mut self, donation_id: &str, status: SubscriptionStatus) -> Result<()>;

    /// Read and clear the donation's next-billing message
    async fn take_next_billing_message(&mut self, donation_id: &str) -> Result<Option<String>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Donation storage
#[async_trait]
pub trait DonationStore: Send + Sync {
    /// Open a webhook transaction
    async fn begin(&self) -> Result<Box<dyn DonationTx>>;

    /// Fetch by id, including soft-deleted rows
    async fn get(&self, donation_id: &str) -> Result<Option<Donation>>;

    /// Newest first, soft-deleted rows excluded
    async fn list_by_user(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<Donation>>;

    async fn list_messages_by_project(
        &self,
        project_id: &str,
        query: &MessageQuery,
    ) -> Result<MessagePage>;

    /// Owner-only change of amount and/or pause flag
    async fn patch(&self, donation_id: &str, user_id: &str, patch: &DonationPatch)
        -> Result<Donation>;

    /// Owner-only subscription status change, after the provider acknowledged it
    async fn set_subscription_status(
        &self,
        donation_id: &str,
        user_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Donation>;

    /// Owner-only soft delete
    async fn soft_delete(&self, donation_id: &str, user_id: &str) -> Result<()>;

    /// `{month, amount}` ascending, soft-deleted rows excluded
    async fn monthly_sums(&self, project_id: &str) -> Result<Vec<MonthlySum>>;

    /// Move every donation of `token` to `user_id`, atomically
    async fn rebind_token(&self, token: &str, user_id: &str) -> Result<MigrationOutcome>;

    /// The live donation `donation_id` if it belongs to `user_id`
    async fn get_owned(&self, donation_id: &str, user_id: &str) -> Result<Donation> {
        check_owner(self.get(donation_id).await?, donation_id, user_id)
    }
}

/// Activity feed storage
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn insert(&self, item: &ActivityItem) -> Result<()>;

    /// Newest first
    async fn list_global(&self, limit: i64) -> Result<Vec<ActivityItem>>;

    /// Newest first
    async fn list_by_project(&self, project_id: &str, limit: i64) -> Result<Vec<ActivityItem>>;
}

/// Read access to projects, plus the one write the payments flow needs
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Store the connected payments account after onboarding
    async fn attach_external_account(&self, project_id: &str, account_id: &str) -> Result<()>;
}

/// Display names of signed-in users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>>;
}

/// Ownership and patch rules shared by both backends
pub(crate) fn apply_patch(
    donation: &mut Donation,
    patch: &DonationPatch,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    if let Some(amount) = patch.amount {
        if amount <= 0 {
            return Err(StoreError::Invalid("amount must be positive".into()));
        }
    }
    if let Some(paused) = patch.paused {
        if !donation.is_recurring {
            return Err(StoreError::Invalid(
                "paused only applies to recurring donations".into(),
            ));
        }
        let next = if paused {
            SubscriptionStatus::Paused
        } else {
            SubscriptionStatus::Active
        };
        if !donation.transition(next, now) {
            return Err(StoreError::Invalid("subscription is cancelled".into()));
        }
    }
    let next_message = patch.normalized_next_billing_message();
    if let Some(message) = &next_message {
        if !donation.is_recurring {
            return Err(StoreError::Invalid(
                "next_billing_message only applies to recurring donations".into(),
            ));
        }
        if message
            .as_deref()
            .is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS)
        {
            return Err(StoreError::Invalid("next_billing_message is too long".into()));
        }
    }
    if let Some(amount) = patch.amount {
        donation.amount = amount;
    }
    if let Some(message) = next_message {
        donation.next_billing_message = message;
    }
    donation.updated_at = now;
    Ok(())
}

/// Check ownership of a fetched row
pub(crate) fn check_owner(
    donation: Option<Donation>,
    donation_id: &str,
    user_id: &str,
) -> Result<Donation> {
    let donation = donation
        .filter(|d| !d.deleted)
        .ok_or_else(|| StoreError::NotFound(format!("donation {donation_id}")))?;
    if donation.donor.is_user(user_id) {
        Ok(donation)
    } else {
        Err(StoreError::Forbidden)
    }
}
