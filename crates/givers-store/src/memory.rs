//! In-Memory Store
//!
//! Implements every storage trait over process memory. A [`DonationTx`] holds
//! the donation lock for its whole lifetime and works on a copy of the state;
//! commit swaps the copy in, drop discards it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

use givers_core::{
    month_key, ActivityItem, Donation, DonationMessage, DonationPatch, Donor, MessagePage,
    MessageQuery, MigrationOutcome, MonthlySum, Project, SortOrder, SubscriptionStatus,
    ANONYMOUS_DONOR,
};

use crate::error::{Result, StoreError};
use crate::{
    apply_patch, check_owner, ActivityStore, DonationStore, DonationTx, InsertOutcome,
    ProjectDirectory, UserDirectory,
};

#[derive(Clone, Debug, Default)]
struct TokenMigration {
    token: String,
    user_id: String,
    migrated_count: u64,
    migrated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
struct DonationState {
    /// Insertion order
    donations: Vec<Donation>,
    processed_events: HashMap<String, DateTime<Utc>>,
    migrations: Vec<TokenMigration>,
}

impl DonationState {
    fn find_mut(&mut self, donation_id: &str) -> Option<&mut Donation> {
        self.donations.iter_mut().find(|d| d.id == donation_id)
    }

    fn owned_mut(&mut self, donation_id: &str, user_id: &str) -> Result<&mut Donation> {
        let existing = self.donations.iter().find(|d| d.id == donation_id).cloned();
        check_owner(existing, donation_id, user_id)?;
        self.find_mut(donation_id)
            .ok_or_else(|| StoreError::NotFound(format!("donation {donation_id}")))
    }

    fn month_total(&self, project_id: &str, month: &str) -> i64 {
        self.donations
            .iter()
            .filter(|d| d.project_id == project_id && !d.deleted && d.month() == month)
            .map(|d| d.amount)
            .sum()
    }
}

/// Memory-backed store for every trait in this crate
#[derive(Clone, Default)]
pub struct MemoryStore {
    donations: Arc<Mutex<DonationState>>,
    activity: Arc<RwLock<Vec<ActivityItem>>>,
    projects: Arc<RwLock<HashMap<String, Project>>>,
    users: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project (the project subsystem owns these in production)
    pub fn insert_project(&self, project: Project) {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.id.clone(), project);
    }

    /// Register a user's display name
    pub fn insert_user(&self, user_id: &str, display_name: &str) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string(), display_name.to_string());
    }

    /// Store a donation directly, bypassing webhook ingestion
    pub async fn seed_donation(&self, donation: Donation) {
        self.donations.lock().await.donations.push(donation);
    }

    /// Every donation row, including soft-deleted ones
    pub async fn all_donations(&self) -> Vec<Donation> {
        self.donations.lock().await.donations.clone()
    }

    pub async fn processed_event_count(&self) -> usize {
        self.donations.lock().await.processed_events.len()
    }

    pub fn activity_count(&self) -> usize {
        self.activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn donor_name(&self, donor: &Donor) -> String {
        match donor {
            Donor::User(id) => self
                .users
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned()
                .unwrap_or_else(|| ANONYMOUS_DONOR.to_string()),
            Donor::Token(_) => ANONYMOUS_DONOR.to_string(),
        }
    }
}

/// Open transaction over [`MemoryStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<DonationState>,
    working: DonationState,
}

#[async_trait]
impl DonationTx for MemoryTx {
    async fn mark_event_processed(&mut self, event_id: &str) -> Result<bool> {
        if self.working.processed_events.contains_key(event_id) {
            return Ok(false);
        }
        self.working
            .processed_events
            .insert(event_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn insert_if_absent(&mut self, donation: Donation) -> Result<InsertOutcome> {
        if let Some(existing) = self.working.donations.iter().find(|d| {
            d.project_id == donation.project_id
                && d.external_payment_id == donation.external_payment_id
        }) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        self.working.donations.push(donation.clone());
        Ok(InsertOutcome::Inserted(donation))
    }

    async fn touch(&mut self, donation_id: &str) -> Result<()> {
        let donation = self
            .working
            .find_mut(donation_id)
            .ok_or_else(|| StoreError::NotFound(format!("donation {donation_id}")))?;
        donation.updated_at = Utc::now();
        Ok(())
    }

    async fn month_total(&mut self, project_id: &str, month: &str) -> Result<i64> {
        Ok(self.working.month_total(project_id, month))
    }

    async fn find_by_external_id(
        &mut self,
        external_payment_id: &str,
    ) -> Result<Option<Donation>> {
        Ok(self
            .working
            .donations
            .iter()
            .find(|d| d.external_payment_id == external_payment_id)
            .cloned())
    }

    async fn set_status(&mut self, donation_id: &str, status: SubscriptionStatus) -> Result<()> {
        let donation = self
            .working
            .find_mut(donation_id)
            .ok_or_else(|| StoreError::NotFound(format!("donation {donation_id}")))?;
        donation.status = Some(status);
        donation.paused = status == SubscriptionStatus::Paused;
        donation.updated_at = Utc::now();
        Ok(())
    }

    async fn take_next_billing_message(&mut self, donation_id: &str) -> Result<Option<String>> {
        let donation = self
            .working
            .find_mut(donation_id)
            .ok_or_else(|| StoreError::NotFound(format!("donation {donation_id}")))?;
        Ok(donation.next_billing_message.take())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DonationStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn DonationTx>> {
        let guard = Arc::clone(&self.donations).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn get(&self, donation_id: &str) -> Result<Option<Donation>> {
        let state = self.donations.lock().await;
        Ok(state.donations.iter().find(|d| d.id == donation_id).cloned())
    }

    async fn list_by_user(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<Donation>> {
        let state = self.donations.lock().await;
        let mut rows: Vec<Donation> = state
            .donations
            .iter()
            .rev()
            .filter(|d| !d.deleted && d.donor.is_user(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn list_messages_by_project(
        &self,
        project_id: &str,
        query: &MessageQuery,
    ) -> Result<MessagePage> {
        let state = self.donations.lock().await;
        let mut messages: Vec<DonationMessage> = state
            .donations
            .iter()
            .filter(|d| d.project_id == project_id && !d.deleted)
            .filter_map(|d| {
                let message = d.message.clone().filter(|m| !m.is_empty())?;
                Some(DonationMessage {
                    donor_name: self.donor_name(&d.donor),
                    amount: d.amount,
                    message,
                    is_recurring: d.is_recurring,
                    created_at: d.created_at,
                })
            })
            .filter(|m| query.matches_donor(&m.donor_name))
            .collect();

        messages.sort_by(|a, b| match query.sort {
            SortOrder::Asc => a.created_at.cmp(&b.created_at),
            SortOrder::Desc => b.created_at.cmp(&a.created_at),
        });

        let total = i64::try_from(messages.len()).unwrap_or(i64::MAX);
        let messages = messages
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(0))
            .take(usize::try_from(query.limit).unwrap_or(0))
            .collect();
        Ok(MessagePage { messages, total })
    }

    async fn patch(
        &self,
        donation_id: &str,
        user_id: &str,
        patch: &DonationPatch,
    ) -> Result<Donation> {
        let mut state = self.donations.lock().await;
        let donation = state.owned_mut(donation_id, user_id)?;
        let mut updated = donation.clone();
        apply_patch(&mut updated, patch, Utc::now())?;
        *donation = updated.clone();
        Ok(updated)
    }

    async fn set_subscription_status(
        &self,
        donation_id: &str,
        user_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Donation> {
        let mut state = self.donations.lock().await;
        let donation = state.owned_mut(donation_id, user_id)?;
        if !donation.transition(status, Utc::now()) {
            return Err(StoreError::Invalid(format!(
                "cannot move subscription to {status}"
            )));
        }
        Ok(donation.clone())
    }

    async fn soft_delete(&self, donation_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.donations.lock().await;
        let donation = state.owned_mut(donation_id, user_id)?;
        donation.deleted = true;
        donation.updated_at = Utc::now();
        Ok(())
    }

    async fn monthly_sums(&self, project_id: &str) -> Result<Vec<MonthlySum>> {
        let state = self.donations.lock().await;
        let mut months: BTreeMap<String, i64> = BTreeMap::new();
        for d in state
            .donations
            .iter()
            .filter(|d| d.project_id == project_id && !d.deleted)
        {
            *months.entry(month_key(d.created_at)).or_default() += d.amount;
        }
        Ok(months
            .into_iter()
            .map(|(month, amount)| MonthlySum { month, amount })
            .collect())
    }

    async fn rebind_token(&self, token: &str, user_id: &str) -> Result<MigrationOutcome> {
        let mut state = self.donations.lock().await;
        let now = Utc::now();
        let source = Donor::Token(token.to_string());

        let mut migrated_count = 0_u64;
        for d in state.donations.iter_mut().filter(|d| d.donor == source) {
            d.donor = Donor::User(user_id.to_string());
            d.updated_at = now;
            migrated_count += 1;
        }

        let audit = state
            .migrations
            .iter()
            .position(|m| m.token == token && m.user_id == user_id);

        if migrated_count == 0 {
            let previous = audit.map(|i| &state.migrations[i]);
            if let Some(entry) = previous {
                tracing::debug!(
                    user_id,
                    previously_migrated = entry.migrated_count,
                    migrated_at = ?entry.migrated_at,
                    "Token already migrated"
                );
            }
            return Ok(MigrationOutcome {
                migrated_count: 0,
                already_migrated: previous.is_some(),
            });
        }

        match audit {
            Some(index) => {
                let entry = &mut state.migrations[index];
                entry.migrated_count += migrated_count;
                entry.migrated_at = Some(now);
            }
            None => state.migrations.push(TokenMigration {
                token: token.to_string(),
                user_id: user_id.to_string(),
                migrated_count,
                migrated_at: Some(now),
            }),
        }

        Ok(MigrationOutcome {
            migrated_count,
            already_migrated: false,
        })
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn insert(&self, item: &ActivityItem) -> Result<()> {
        self.activity
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item.clone());
        Ok(())
    }

    async fn list_global(&self, limit: i64) -> Result<Vec<ActivityItem>> {
        let items = self.activity.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<ActivityItem> = items.iter().rev().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn list_by_project(&self, project_id: &str, limit: i64) -> Result<Vec<ActivityItem>> {
        let items = self.activity.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<ActivityItem> = items
            .iter()
            .rev()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl ProjectDirectory for MemoryStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .cloned())
    }

    async fn attach_external_account(&self, project_id: &str, account_id: &str) -> Result<()> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
        project.external_account_id = Some(account_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use givers_core::NewDonation;

    fn donation(project: &str, donor: Donor, amount: i64, ext: &str, recurring: bool) -> Donation {
        Donation::new(
            NewDonation {
                project_id: project.into(),
                donor,
                amount,
                currency: "jpy".into(),
                is_recurring: recurring,
                message: None,
                external_payment_id: ext.into(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_keyed_by_project_and_reference() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = donation("p1", Donor::Token("tk".into()), 1000, "pi_1", false);
        assert!(tx.insert_if_absent(first.clone()).await.unwrap().is_inserted());

        let dup = donation("p1", Donor::Token("tk".into()), 9999, "pi_1", false);
        let outcome = tx.insert_if_absent(dup).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Existing(first));

        let other_project = donation("p2", Donor::Token("tk".into()), 1000, "pi_1", false);
        assert!(tx.insert_if_absent(other_project).await.unwrap().is_inserted());
        tx.commit().await.unwrap();

        assert_eq!(store.all_donations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.mark_event_processed("evt_1").await.unwrap());
        tx.insert_if_absent(donation("p1", Donor::Token("tk".into()), 1000, "pi_1", false))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.all_donations().await.is_empty());
        assert_eq!(store.processed_event_count().await, 0);

        // Dropping without commit behaves the same
        {
            let mut tx = store.begin().await.unwrap();
            tx.mark_event_processed("evt_1").await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        assert!(tx.mark_event_processed("evt_1").await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.mark_event_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_monthly_sums_exclude_deleted() {
        let store = MemoryStore::new();
        let mut old = donation("p1", Donor::User("u1".into()), 300, "pi_0", false);
        old.created_at = Utc::now() - Duration::days(62);
        store.seed_donation(old).await;

        let keep = donation("p1", Donor::User("u1".into()), 1000, "pi_1", false);
        let gone = donation("p1", Donor::User("u1".into()), 500, "pi_2", false);
        let gone_id = gone.id.clone();
        store.seed_donation(keep).await;
        store.seed_donation(gone).await;
        store.seed_donation(donation("p2", Donor::User("u1".into()), 7, "pi_3", false)).await;
        store.soft_delete(&gone_id, "u1").await.unwrap();

        let sums = store.monthly_sums("p1").await.unwrap();
        assert_eq!(sums.len(), 2);
        assert!(sums[0].month < sums[1].month);
        assert_eq!(sums[0].amount, 300);
        assert_eq!(sums[1].amount, 1000);
    }

    #[tokio::test]
    async fn test_patch_enforces_ownership_and_recurrence() {
        let store = MemoryStore::new();
        let one_off = donation("p1", Donor::User("u1".into()), 1000, "pi_1", false);
        let id = one_off.id.clone();
        store.seed_donation(one_off).await;

        let patch = DonationPatch { amount: Some(2000), ..DonationPatch::default() };
        assert_eq!(store.patch(&id, "u2", &patch).await, Err(StoreError::Forbidden));
        assert_eq!(store.get(&id).await.unwrap().unwrap().amount, 1000);

        let pause = DonationPatch { paused: Some(true), ..DonationPatch::default() };
        assert!(matches!(
            store.patch(&id, "u1", &pause).await,
            Err(StoreError::Invalid(_))
        ));

        let updated = store.patch(&id, "u1", &patch).await.unwrap();
        assert_eq!(updated.amount, 2000);

        assert!(matches!(
            store.patch("missing", "u1", &patch).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_next_billing_message_is_taken_once() {
        let store = MemoryStore::new();
        let sub = donation("p1", Donor::User("u1".into()), 500, "sub_1", true);
        let id = sub.id.clone();
        store.seed_donation(sub).await;

        let set = DonationPatch {
            next_billing_message: Some(" thanks again ".into()),
            ..DonationPatch::default()
        };
        let updated = store.patch(&id, "u1", &set).await.unwrap();
        assert_eq!(updated.next_billing_message.as_deref(), Some("thanks again"));

        let too_long = DonationPatch {
            next_billing_message: Some("x".repeat(501)),
            ..DonationPatch::default()
        };
        assert!(matches!(
            store.patch(&id, "u1", &too_long).await,
            Err(StoreError::Invalid(_))
        ));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.take_next_billing_message(&id).await.unwrap().as_deref(),
            Some("thanks again")
        );
        assert_eq!(tx.take_next_billing_message(&id).await.unwrap(), None);
        tx.commit().await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().next_billing_message, None);
    }

    #[tokio::test]
    async fn test_token_donor_is_never_an_owner() {
        let store = MemoryStore::new();
        let d = donation("p1", Donor::Token("u1".into()), 1000, "pi_1", false);
        let id = d.id.clone();
        store.seed_donation(d).await;
        assert_eq!(store.soft_delete(&id, "u1").await, Err(StoreError::Forbidden));
        assert!(store.list_by_user("u1", 50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebind_token_is_idempotent() {
        let store = MemoryStore::new();
        store.seed_donation(donation("p1", Donor::Token("tk_xyz".into()), 100, "pi_1", false)).await;
        store.seed_donation(donation("p2", Donor::Token("tk_xyz".into()), 200, "pi_2", false)).await;

        let first = store.rebind_token("tk_xyz", "u7").await.unwrap();
        assert_eq!(first, MigrationOutcome { migrated_count: 2, already_migrated: false });

        let second = store.rebind_token("tk_xyz", "u7").await.unwrap();
        assert_eq!(second, MigrationOutcome { migrated_count: 0, already_migrated: true });

        let unknown = store.rebind_token("tk_never", "u7").await.unwrap();
        assert_eq!(unknown, MigrationOutcome { migrated_count: 0, already_migrated: false });

        assert_eq!(store.list_by_user("u7", 50, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_messages_filter_sort_and_page() {
        let store = MemoryStore::new();
        store.insert_user("u1", "Alice");
        let base = Utc::now() - Duration::minutes(10);
        for (i, donor) in [
            Donor::User("u1".into()),
            Donor::Token("tk".into()),
            Donor::User("u_unknown".into()),
        ]
        .into_iter()
        .enumerate()
        {
            let mut d = donation("p1", donor, 100, &format!("pi_{i}"), false);
            d.message = Some(format!("thanks {i}"));
            d.created_at = base + Duration::minutes(i64::try_from(i).unwrap());
            store.seed_donation(d).await;
        }
        store.seed_donation(donation("p1", Donor::User("u1".into()), 5, "pi_silent", false)).await;

        let page = store
            .list_messages_by_project("p1", &MessageQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.messages[0].message, "thanks 2");
        assert_eq!(page.messages[0].donor_name, ANONYMOUS_DONOR);

        let query = MessageQuery::new(Some(1), Some(1), Some(SortOrder::Asc), Some("anon".into()));
        let page = store.list_messages_by_project("p1", &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].message, "thanks 2");

        let query = MessageQuery::new(None, None, None, Some("ALICE".into()));
        let page = store.list_messages_by_project("p1", &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].donor_name, "Alice");
    }

    #[tokio::test]
    async fn test_subscription_status_is_terminal_when_cancelled() {
        let store = MemoryStore::new();
        let sub = donation("p1", Donor::User("u1".into()), 500, "sub_9", true);
        let id = sub.id.clone();
        store.seed_donation(sub).await;

        let paused = store
            .set_subscription_status(&id, "u1", SubscriptionStatus::Paused)
            .await
            .unwrap();
        assert!(paused.paused);
        store
            .set_subscription_status(&id, "u1", SubscriptionStatus::Cancelled)
            .await
            .unwrap();
        assert!(matches!(
            store
                .set_subscription_status(&id, "u1", SubscriptionStatus::Active)
                .await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_activity_feeds_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut item = ActivityItem::donation(if i % 2 == 0 { "p1" } else { "p2" }, "P", None, i);
            item.created_at = Utc::now() + Duration::seconds(i);
            store.insert(&item).await.unwrap();
        }
        let global = store.list_global(3).await.unwrap();
        assert_eq!(global.len(), 3);
        assert_eq!(global[0].amount, Some(4));

        let p1 = store.list_by_project("p1", 20).await.unwrap();
        assert_eq!(p1.iter().map(|a| a.amount.unwrap()).collect::<Vec<_>>(), vec![4, 2, 0]);
    }

    #[tokio::test]
    async fn test_attach_external_account() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.attach_external_account("p1", "acct_1").await,
            Err(StoreError::NotFound(_))
        ));

        store.insert_project(Project {
            id: "p1".into(),
            owner_id: "u1".into(),
            name: "Tool".into(),
            status: givers_core::ProjectStatus::Active,
            external_account_id: None,
            monthly_target: None,
            owner_want_monthly: None,
            currency: "jpy".into(),
        });
        store.attach_external_account("p1", "acct_1").await.unwrap();
        let project = store.get_project("p1").await.unwrap().unwrap();
        assert!(project.accepts_donations());
    }
}
