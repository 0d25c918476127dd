//! Explicit transactions over a pooled connection.
//!
//! The connection is owned by the transaction. If a `PgTx` is dropped while
//! still open, the pool sees a connection with an unfinished transaction,
//! refuses to recycle it, and the server rolls the work back when the
//! connection closes.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};

use givers_core::{Donation, SubscriptionStatus};

use super::models::{DonationRow, TotalRow};
use super::schema::{donations, processed_events};
use super::{bounded, DbConnection, PgStore};
use crate::error::Result;
use crate::{DonationTx, InsertOutcome};

type Tm = AnsiTransactionManager;

/// Open transaction holding its own connection
pub struct PgTx {
    conn: DbConnection,
}

impl PgTx {
    pub(crate) async fn begin(store: &PgStore) -> Result<Self> {
        let mut conn = store.conn().await?;
        bounded(<Tm as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut *conn)).await?;
        bounded(diesel::sql_query("SET LOCAL statement_timeout = '10s'").execute(&mut *conn))
            .await?;
        Ok(Self { conn })
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result through
    pub(crate) async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                bounded(<Tm as TransactionManager<AsyncPgConnection>>::commit_transaction(
                    &mut *self.conn,
                ))
                .await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = bounded(
                    <Tm as TransactionManager<AsyncPgConnection>>::rollback_transaction(
                        &mut *self.conn,
                    ),
                )
                .await
                {
                    tracing::warn!(error = %rollback, "Rollback failed; connection will be discarded");
                }
                Err(err)
            }
        }
    }

    pub(crate) fn conn(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }

    /// Fetch and row-lock a donation
    pub(crate) async fn lock_donation(&mut self, donation_id: &str) -> Result<Option<Donation>> {
        let row: Option<DonationRow> = bounded(
            donations::table
                .find(donation_id)
                .select(DonationRow::as_select())
                .for_update()
                .get_result(&mut *self.conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;
        row.map(Donation::try_from).transpose()
    }

    /// Write back every mutable column of `donation`
    pub(crate) async fn save_donation(&mut self, donation: &Donation) -> Result<()> {
        let row = DonationRow::from(donation);
        bounded(
            diesel::update(donations::table.find(&row.id))
                .set((
                    donations::donor_type.eq(&row.donor_type),
                    donations::donor_id.eq(&row.donor_id),
                    donations::amount.eq(row.amount),
                    donations::paused.eq(row.paused),
                    donations::next_billing_message.eq(row.next_billing_message.as_deref()),
                    donations::status.eq(row.status.as_deref()),
                    donations::updated_at.eq(row.updated_at),
                    donations::deleted.eq(row.deleted),
                ))
                .execute(&mut *self.conn),
        )
        .await?;
        Ok(())
    }
}

/// Map diesel's `NotFound` onto `Ok(None)`
pub(crate) fn none_if_not_found<T>(err: crate::StoreError) -> Result<Option<T>> {
    match err {
        crate::StoreError::NotFound(_) => Ok(None),
        other => Err(other),
    }
}

#[async_trait]
impl DonationTx for PgTx {
    async fn mark_event_processed(&mut self, event_id: &str) -> Result<bool> {
        let inserted = bounded(
            diesel::insert_into(processed_events::table)
                .values((
                    processed_events::event_id.eq(event_id),
                    processed_events::processed_at.eq(Utc::now()),
                ))
                .on_conflict_do_nothing()
                .execute(&mut *self.conn),
        )
        .await?;
        Ok(inserted == 1)
    }

    async fn insert_if_absent(&mut self, donation: Donation) -> Result<InsertOutcome> {
        let row = DonationRow::from(&donation);
        let inserted: Option<DonationRow> = bounded(
            diesel::insert_into(donations::table)
                .values(&row)
                .on_conflict((donations::project_id, donations::external_payment_id))
                .do_nothing()
                .returning(DonationRow::as_returning())
                .get_result(&mut *self.conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;

        if let Some(inserted) = inserted {
            return Ok(InsertOutcome::Inserted(inserted.try_into()?));
        }

        let existing: DonationRow = bounded(
            donations::table
                .filter(donations::project_id.eq(&row.project_id))
                .filter(donations::external_payment_id.eq(&row.external_payment_id))
                .select(DonationRow::as_select())
                .first(&mut *self.conn),
        )
        .await?;
        Ok(InsertOutcome::Existing(existing.try_into()?))
    }

    async fn touch(&mut self, donation_id: &str) -> Result<()> {
        bounded(
            diesel::update(donations::table.find(donation_id))
                .set(donations::updated_at.eq(Utc::now()))
                .execute(&mut *self.conn),
        )
        .await?;
        Ok(())
    }

    async fn month_total(&mut self, project_id: &str, month: &str) -> Result<i64> {
        bounded(
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(project_id)
                .execute(&mut *self.conn),
        )
        .await?;

        let total: TotalRow = bounded(
            diesel::sql_query(
                "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM donations \
                 WHERE project_id = $1 AND NOT deleted \
                 AND to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM') = $2",
            )
            .bind::<Text, _>(project_id)
            .bind::<Text, _>(month)
            .get_result(&mut *self.conn),
        )
        .await?;
        Ok(total.total)
    }

    async fn find_by_external_id(
        &mut self,
        external_payment_id: &str,
    ) -> Result<Option<Donation>> {
        let row: Option<DonationRow> = bounded(
            donations::table
                .filter(donations::external_payment_id.eq(external_payment_id))
                .order(donations::created_at.asc())
                .select(DonationRow::as_select())
                .first(&mut *self.conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;
        row.map(Donation::try_from).transpose()
    }

    async fn set_status(&mut self, donation_id: &str, status: SubscriptionStatus) -> Result<()> {
        bounded(
            diesel::update(donations::table.find(donation_id))
                .set((
                    donations::status.eq(Some(status.as_str())),
                    donations::paused.eq(status == SubscriptionStatus::Paused),
                    donations::updated_at.eq(Utc::now()),
                ))
                .execute(&mut *self.conn),
        )
        .await?;
        Ok(())
    }

    async fn take_next_billing_message(&mut self, donation_id: &str) -> Result<Option<String>> {
        let Some(donation) = self.lock_donation(donation_id).await? else {
            return Ok(None);
        };
        if donation.next_billing_message.is_some() {
            bounded(
                diesel::update(donations::table.find(donation_id))
                    .set(donations::next_billing_message.eq(None::<String>))
                    .execute(&mut *self.conn),
            )
            .await?;
        }
        Ok(donation.next_billing_message)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        (*self).finish(Ok(())).await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        bounded(<Tm as TransactionManager<AsyncPgConnection>>::rollback_transaction(
            &mut *self.conn,
        ))
        .await
    }
}
