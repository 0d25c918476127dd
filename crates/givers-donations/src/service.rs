//! Donation Service
//!
//! Orchestrates the donation lifecycle over the payments gateway and the
//! stores. Checkout persists nothing; rows appear only when the provider
//! confirms a payment through a signed webhook.

use std::sync::Arc;

use chrono::Utc;
use givers_core::{
    milestone, month_key, ActivityItem, ChartPoint, Donation, DonationPatch, Donor, MessagePage,
    MessageQuery, MigrationOutcome, NewDonation, Project, SubscriptionStatus,
    MAX_DONATION_AMOUNT, MAX_MESSAGE_CHARS,
};
use givers_payments::{
    CheckoutRequest, PaymentConfirmation, PaymentError, PaymentsGateway,
    RemoteSubscriptionState, WebhookEvent,
};
use givers_store::{
    ActivityStore, DonationStore, DonationTx, InsertOutcome, ProjectDirectory, UserDirectory,
};
use serde::Deserialize;

use crate::activity::ActivityRecorder;
use crate::error::{DonationError, Result};

pub const DEFAULT_LOCALE: &str = "ja";

/// Rows returned by the donor history listing
pub const HISTORY_LIMIT: i64 = 50;

/// Authenticated caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,

    /// Platform host with oversight over every project
    pub is_host: bool,
}

impl Principal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_host: false,
        }
    }

    pub fn host(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_host: true,
        }
    }

    /// Owner of `project`, or a host
    pub fn can_manage(&self, project: &Project) -> bool {
        self.is_host || project.is_owned_by(&self.user_id)
    }
}

/// A donor's checkout request, with the donor already resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutInput {
    pub project_id: String,
    pub amount: i64,
    /// Empty means the project currency
    pub currency: String,
    pub is_recurring: bool,
    pub message: Option<String>,
    pub locale: Option<String>,
    pub donor: Donor,
}

/// Which payment event is being recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PaymentKind {
    OneOff,
    SubscriptionStart,
    /// A recurring charge; posts any pending next-billing message
    Invoice,
}

/// What webhook ingestion did with an event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Side effects committed
    Applied,

    /// `event.id` was already in the ledger
    Duplicate,

    /// Not an event type the lifecycle handles
    Ignored,
}

/// Query parameters of the owner message listing
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MessageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<givers_core::SortOrder>,
    pub donor: Option<String>,
}

impl From<MessageParams> for MessageQuery {
    fn from(p: MessageParams) -> Self {
        MessageQuery::new(p.limit, p.offset, p.sort, p.donor)
    }
}

/// The donation lifecycle
pub struct DonationService {
    gateway: Arc<dyn PaymentsGateway>,
    donations: Arc<dyn DonationStore>,
    projects: Arc<dyn ProjectDirectory>,
    users: Arc<dyn UserDirectory>,
    activity: ActivityRecorder,
    frontend_url: String,
}

impl DonationService {
    pub fn new(
        gateway: Arc<dyn PaymentsGateway>,
        donations: Arc<dyn DonationStore>,
        projects: Arc<dyn ProjectDirectory>,
        users: Arc<dyn UserDirectory>,
        activity: Arc<dyn ActivityStore>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            donations,
            projects,
            users,
            activity: ActivityRecorder::new(activity),
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a service whose every store is the same backend
    pub fn with_store<S>(
        gateway: Arc<dyn PaymentsGateway>,
        store: Arc<S>,
        frontend_url: impl Into<String>,
    ) -> Self
    where
        S: DonationStore + ActivityStore + ProjectDirectory + UserDirectory + 'static,
    {
        Self::new(
            gateway,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            frontend_url,
        )
    }

    pub fn activity(&self) -> &ActivityRecorder {
        &self.activity
    }

    pub fn payments_configured(&self) -> bool {
        self.gateway.is_configured()
    }

    async fn project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| DonationError::NotFound(format!("project {project_id}")))
    }

    fn project_url(&self, project_id: &str, query: &str) -> String {
        format!("{}/projects/{project_id}?{query}", self.frontend_url)
    }

    // ---------------------------------------------------------------------
    // Checkout
    // ---------------------------------------------------------------------

    /// Validate a checkout request and return the provider's hosted page URL
    pub async fn checkout(&self, input: CheckoutInput) -> Result<String> {
        if !self.gateway.is_configured() {
            return Err(DonationError::PaymentsDisabled);
        }

        let project = self.project(&input.project_id).await?;
        if !project.accepts_donations() {
            return Err(DonationError::invalid("project_not_accepting_donations"));
        }

        if !(1..=MAX_DONATION_AMOUNT).contains(&input.amount) {
            return Err(DonationError::invalid("amount_out_of_range"));
        }

        let currency = match input.currency.trim() {
            "" => project.currency.to_lowercase(),
            c => c.to_lowercase(),
        };
        if currency != project.currency.to_lowercase() {
            return Err(DonationError::invalid("currency_mismatch"));
        }

        let message = input
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());
        if message.is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS) {
            return Err(DonationError::invalid("message_too_long"));
        }

        if input.donor.id().is_empty() {
            return Err(DonationError::invalid("donor_token_missing"));
        }

        let locale = input
            .locale
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LOCALE);

        let request = CheckoutRequest {
            connected_account_id: project.external_account_id.clone(),
            project_id: project.id.clone(),
            amount: input.amount,
            currency,
            is_recurring: input.is_recurring,
            message: message.map(str::to_string),
            locale: locale.to_string(),
            success_url: self.project_url(&project.id, "donation=ok"),
            cancel_url: self.project_url(&project.id, "donation=cancelled"),
            donor_type: input.donor.donor_type().as_str().to_string(),
            donor_id: input.donor.id().to_string(),
        };

        let url = self.gateway.create_checkout(&request).await?;
        tracing::info!(
            project_id = %project.id,
            amount = request.amount,
            recurring = request.is_recurring,
            "Created checkout session"
        );
        Ok(url)
    }

    // ---------------------------------------------------------------------
    // Webhook ingestion
    // ---------------------------------------------------------------------

    /// Verify, deduplicate and apply one provider event.
    ///
    /// Any error leaves no trace in the store so the provider's retry
    /// re-drives the whole pipeline.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        if let Err(e) = self.gateway.verify_webhook(payload, signature) {
            if matches!(e, PaymentError::ConfigMissing(_)) {
                tracing::error!("Webhook received but no webhook secret is configured");
            } else {
                tracing::warn!(error = %e, "Rejected webhook signature");
            }
            return Err(DonationError::Unauthorized);
        }

        let event = self.gateway.parse_event(payload).map_err(|e| match e {
            PaymentError::Parse(detail) => {
                tracing::warn!(error = %detail, "Unreadable webhook body");
                DonationError::invalid("invalid_payload")
            }
            other => other.into(),
        })?;
        if !event.is_handled() {
            tracing::debug!(event_id = event.event_id(), kind = event.kind(), "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        let mut tx = self.donations.begin().await?;
        let applied = self.apply_event(tx.as_mut(), &event).await;
        let activities = match applied {
            Ok(activities) => {
                tx.commit().await?;
                activities
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Webhook rollback failed");
                }
                tracing::error!(event_id = event.event_id(), kind = event.kind(), error = %e, "Webhook processing failed");
                return Err(e);
            }
        };

        let Some(activities) = activities else {
            tracing::debug!(event_id = event.event_id(), "Duplicate webhook event");
            return Ok(WebhookOutcome::Duplicate);
        };
        for item in activities {
            self.activity.record(item).await;
        }
        tracing::info!(event_id = event.event_id(), kind = event.kind(), "Applied webhook event");
        Ok(WebhookOutcome::Applied)
    }

    /// `None` when the event was already processed; otherwise the activity
    /// items to record once the transaction commits.
    async fn apply_event(
        &self,
        tx: &mut dyn DonationTx,
        event: &WebhookEvent,
    ) -> Result<Option<Vec<ActivityItem>>> {
        if !tx.mark_event_processed(event.event_id()).await? {
            return Ok(None);
        }

        let activities = match event {
            WebhookEvent::PaymentSucceeded(c) => {
                self.record_payment(tx, c, PaymentKind::OneOff).await?
            }
            WebhookEvent::SubscriptionStarted(c) => {
                self.record_payment(tx, c, PaymentKind::SubscriptionStart).await?
            }
            WebhookEvent::InvoicePaid(c) => self.record_payment(tx, c, PaymentKind::Invoice).await?,
            WebhookEvent::SubscriptionUpdated {
                subscription_id,
                state,
                ..
            } => {
                let status = match state {
                    RemoteSubscriptionState::Active => SubscriptionStatus::Active,
                    RemoteSubscriptionState::Paused => SubscriptionStatus::Paused,
                    RemoteSubscriptionState::Cancelled => SubscriptionStatus::Cancelled,
                };
                mirror_subscription(tx, subscription_id, status).await?;
                Vec::new()
            }
            WebhookEvent::SubscriptionCancelled {
                subscription_id, ..
            } => {
                mirror_subscription(tx, subscription_id, SubscriptionStatus::Cancelled).await?;
                Vec::new()
            }
            WebhookEvent::Other { .. } => Vec::new(),
        };
        Ok(Some(activities))
    }

    async fn record_payment(
        &self,
        tx: &mut dyn DonationTx,
        confirmation: &PaymentConfirmation,
        kind: PaymentKind,
    ) -> Result<Vec<ActivityItem>> {
        let is_recurring = kind != PaymentKind::OneOff;
        let meta = &confirmation.metadata;
        let event_id = confirmation.event_id.as_str();

        let Some(project_id) = meta.project_id.as_deref() else {
            tracing::warn!(event_id, "Payment event without project metadata");
            return Ok(Vec::new());
        };
        let donor = match Donor::from_parts(
            meta.donor_type.as_deref().unwrap_or_default(),
            meta.donor_id.as_deref().unwrap_or_default(),
        ) {
            Ok(donor) => donor,
            Err(e) => {
                tracing::warn!(event_id, error = %e, "Payment event without usable donor metadata");
                return Ok(Vec::new());
            }
        };
        let Some(amount) = confirmation.amount.filter(|a| *a > 0) else {
            tracing::warn!(event_id, "Payment event without a positive amount");
            return Ok(Vec::new());
        };
        let Some(project) = self.projects.get_project(project_id).await? else {
            tracing::warn!(event_id, project_id, "Payment event for unknown project");
            return Ok(Vec::new());
        };

        let currency = confirmation
            .currency
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| project.currency.to_lowercase());

        let now = Utc::now();
        let prior_total = tx.month_total(&project.id, &month_key(now)).await?;

        let donation = Donation::new(
            NewDonation {
                project_id: project.id.clone(),
                donor,
                amount,
                currency,
                is_recurring,
                message: NewDonation::clipped_message(meta.message.as_deref()),
                external_payment_id: confirmation.reference.clone(),
            },
            now,
        );

        match tx.insert_if_absent(donation).await? {
            InsertOutcome::Existing(existing) => {
                if is_recurring {
                    tx.touch(&existing.id).await?;
                }
                tracing::debug!(event_id, donation_id = %existing.id, "Payment already recorded");
                if kind != PaymentKind::Invoice || existing.deleted {
                    return Ok(Vec::new());
                }
                let Some(message) = tx.take_next_billing_message(&existing.id).await? else {
                    return Ok(Vec::new());
                };
                tracing::info!(event_id, donation_id = %existing.id, "Posting next-billing message");
                let actor = self.actor_name(&existing.donor).await;
                Ok(vec![ActivityItem::donation(
                    &project.id,
                    &project.name,
                    actor,
                    existing.amount,
                )
                .with_message(message)])
            }
            InsertOutcome::Inserted(donation) => {
                tracing::info!(
                    event_id,
                    donation_id = %donation.id,
                    project_id = %project.id,
                    amount = donation.amount,
                    recurring = is_recurring,
                    "Recorded donation"
                );
                let actor = self.actor_name(&donation.donor).await;
                let mut items = vec![ActivityItem::donation(
                    &project.id,
                    &project.name,
                    actor,
                    donation.amount,
                )];
                if let Some(reached) = milestone::evaluate(&project, prior_total, donation.amount) {
                    tracing::info!(
                        project_id = %project.id,
                        milestone = reached.kind.as_str(),
                        total = reached.total,
                        "Milestone reached"
                    );
                    items.push(ActivityItem::milestone(&project.id, &project.name, &reached));
                }
                Ok(items)
            }
        }
    }

    /// Display name for the feed; anonymous donors stay anonymous
    async fn actor_name(&self, donor: &Donor) -> Option<String> {
        let Donor::User(user_id) = donor else {
            return None;
        };
        match self.users.display_name(user_id).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to look up donor name");
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Donor operations
    // ---------------------------------------------------------------------

    /// Rebind every donation made under `token` to `user_id`
    pub async fn migrate_token(&self, token: &str, user_id: &str) -> Result<MigrationOutcome> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DonationError::invalid("donor_token_missing"));
        }
        let outcome = self.donations.rebind_token(token, user_id).await?;
        tracing::info!(
            user_id,
            migrated = outcome.migrated_count,
            already_migrated = outcome.already_migrated,
            "Migrated donor token"
        );
        Ok(outcome)
    }

    /// The caller's donations, newest first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Donation>> {
        Ok(self.donations.list_by_user(user_id, HISTORY_LIMIT, 0).await?)
    }

    pub async fn pause(&self, donation_id: &str, user_id: &str) -> Result<Donation> {
        self.change_subscription(donation_id, user_id, SubscriptionStatus::Paused)
            .await
    }

    pub async fn resume(&self, donation_id: &str, user_id: &str) -> Result<Donation> {
        self.change_subscription(donation_id, user_id, SubscriptionStatus::Active)
            .await
    }

    pub async fn cancel(&self, donation_id: &str, user_id: &str) -> Result<Donation> {
        self.change_subscription(donation_id, user_id, SubscriptionStatus::Cancelled)
            .await
    }

    /// Ownership check, provider call, then the local mirror. A provider
    /// failure leaves the row untouched.
    async fn change_subscription(
        &self,
        donation_id: &str,
        user_id: &str,
        target: SubscriptionStatus,
    ) -> Result<Donation> {
        let donation = self.donations.get_owned(donation_id, user_id).await?;
        let Some(current) = donation.status else {
            return Err(DonationError::invalid("not_a_subscription"));
        };
        if current == target {
            return Ok(donation);
        }
        if !current.can_become(target) {
            return Err(DonationError::invalid("subscription_cancelled"));
        }

        let subscription_id = donation.external_payment_id.as_str();
        match target {
            SubscriptionStatus::Paused => self.gateway.pause_subscription(subscription_id).await?,
            SubscriptionStatus::Active => self.gateway.resume_subscription(subscription_id).await?,
            SubscriptionStatus::Cancelled => {
                self.gateway.cancel_subscription(subscription_id).await?;
            }
        }

        let updated = self
            .donations
            .set_subscription_status(donation_id, user_id, target)
            .await?;
        tracing::info!(donation_id, status = target.as_str(), "Subscription updated");
        Ok(updated)
    }

    /// Owner edit of amount and/or pause flag
    pub async fn patch(
        &self,
        donation_id: &str,
        user_id: &str,
        patch: &DonationPatch,
    ) -> Result<Donation> {
        let mut donation = self.donations.get_owned(donation_id, user_id).await?;
        if patch.is_empty() {
            return Ok(donation);
        }
        if patch
            .amount
            .is_some_and(|a| !(1..=MAX_DONATION_AMOUNT).contains(&a))
        {
            return Err(DonationError::invalid("amount_out_of_range"));
        }
        if let Some(message) = patch.normalized_next_billing_message() {
            if !donation.is_recurring {
                return Err(DonationError::invalid("not_a_subscription"));
            }
            if message.is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS) {
                return Err(DonationError::invalid("message_too_long"));
            }
        }

        if let Some(paused) = patch.paused {
            if !donation.is_recurring {
                return Err(DonationError::invalid("not_a_subscription"));
            }
            let target = if paused {
                SubscriptionStatus::Paused
            } else {
                SubscriptionStatus::Active
            };
            donation = self
                .change_subscription(donation_id, user_id, target)
                .await?;
        }

        let stored_fields = DonationPatch {
            paused: None,
            ..patch.clone()
        };
        if !stored_fields.is_empty() {
            donation = self
                .donations
                .patch(donation_id, user_id, &stored_fields)
                .await?;
        }
        Ok(donation)
    }

    /// Soft delete; a live subscription is cancelled at the provider first
    pub async fn delete(&self, donation_id: &str, user_id: &str) -> Result<()> {
        let donation = self.donations.get_owned(donation_id, user_id).await?;
        if donation
            .status
            .is_some_and(|s| !s.is_terminal())
        {
            self.change_subscription(donation_id, user_id, SubscriptionStatus::Cancelled)
                .await?;
        }
        self.donations.soft_delete(donation_id, user_id).await?;
        tracing::info!(donation_id, "Deleted donation");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Project views
    // ---------------------------------------------------------------------

    /// Donor messages of a project, for its owner or a host
    pub async fn list_project_messages(
        &self,
        project_id: &str,
        principal: &Principal,
        query: &MessageQuery,
    ) -> Result<MessagePage> {
        let project = self.project(project_id).await?;
        if !principal.can_manage(&project) {
            return Err(DonationError::Forbidden);
        }
        Ok(self
            .donations
            .list_messages_by_project(project_id, query)
            .await?)
    }

    /// Monthly funding chart of a project
    pub async fn chart(&self, project_id: &str) -> Result<Vec<ChartPoint>> {
        let project = self.project(project_id).await?;
        let sums = self.donations.monthly_sums(project_id).await?;
        Ok(ChartPoint::series(&project, &sums))
    }

    // ---------------------------------------------------------------------
    // Connected-account onboarding
    // ---------------------------------------------------------------------

    pub async fn onboarding_link(
        &self,
        project_id: &str,
        principal: &Principal,
        redirect_uri: &str,
    ) -> Result<String> {
        let project = self.project(project_id).await?;
        if !principal.can_manage(&project) {
            return Err(DonationError::Forbidden);
        }
        Ok(self.gateway.onboarding_link(&project.id, redirect_uri)?)
    }

    /// Finish onboarding and return where to send the owner's browser.
    ///
    /// Failures are logged and reported to the frontend via the query string.
    pub async fn complete_onboarding(&self, code: &str, project_id: &str) -> String {
        match self.attach_account(code, project_id).await {
            Ok(account_id) => {
                tracing::info!(project_id, account_id = %account_id, "Connected payments account");
                self.project_url(project_id, "payments_connected=1")
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "Payments onboarding failed");
                if project_id.is_empty() {
                    format!("{}/?payments_error=1", self.frontend_url)
                } else {
                    self.project_url(project_id, "payments_error=1")
                }
            }
        }
    }

    async fn attach_account(&self, code: &str, project_id: &str) -> Result<String> {
        if code.is_empty() || project_id.is_empty() {
            return Err(DonationError::invalid("onboarding_callback_incomplete"));
        }
        let project = self.project(project_id).await?;
        let account_id = self.gateway.exchange_account_code(code).await?;
        self.projects
            .attach_external_account(&project.id, &account_id)
            .await?;
        Ok(account_id)
    }
}

/// Mirror a provider-reported subscription state. Unknown subscriptions and
/// attempts to revive a cancelled one are logged and dropped.
async fn mirror_subscription(
    tx: &mut dyn DonationTx,
    subscription_id: &str,
    target: SubscriptionStatus,
) -> Result<()> {
    let Some(donation) = tx.find_by_external_id(subscription_id).await? else {
        tracing::warn!(subscription_id, "Webhook for unknown subscription");
        return Ok(());
    };
    let Some(current) = donation.status else {
        return Ok(());
    };
    if current == target {
        return Ok(());
    }
    if !current.can_become(target) {
        tracing::info!(
            subscription_id,
            requested = target.as_str(),
            "Ignoring update to a cancelled subscription"
        );
        return Ok(());
    }
    tx.set_status(&donation.id, target).await?;
    tracing::info!(subscription_id, status = target.as_str(), "Mirrored subscription state");
    Ok(())
}
