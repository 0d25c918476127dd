use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;

use givers_core::{
    Donation, DonationPatch, MessagePage, MessageQuery, MigrationOutcome, MonthlySum,
    SubscriptionStatus, ANONYMOUS_DONOR,
};

use super::models::{donations_from_rows, DonationRow, MessageRow, MonthRow, TotalRow};
use super::schema::{donations, donor_token_migrations};
use super::tx::{none_if_not_found, PgTx};
use super::{bounded, PgStore};
use crate::error::{Result, StoreError};
use crate::{apply_patch, check_owner, DonationStore, DonationTx};

/// Messages attached to live donations, with the donor's display name
const MESSAGE_FROM: &str = "FROM donations d \
     LEFT JOIN users u ON d.donor_type = 'user' AND d.donor_id = u.id \
     WHERE d.project_id = $1 AND NOT d.deleted \
     AND d.message IS NOT NULL AND d.message <> '' \
     AND ($2 = '' OR COALESCE(u.display_name, $3) ILIKE $2 ESCAPE '\\')";

/// `%needle%` with the needle's own wildcards escaped; empty means no filter
fn donor_pattern(needle: &str) -> String {
    if needle.is_empty() {
        return String::new();
    }
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl PgStore {
    /// Lock the row, check ownership, apply `change`, write it back
    async fn update_owned<F>(&self, donation_id: &str, user_id: &str, change: F) -> Result<Donation>
    where
        F: FnOnce(&mut Donation) -> Result<()> + Send,
    {
        let mut tx = PgTx::begin(self).await?;
        let result: Result<Donation> = async {
            let locked = tx.lock_donation(donation_id).await?;
            let mut donation = check_owner(locked, donation_id, user_id)?;
            change(&mut donation)?;
            tx.save_donation(&donation).await?;
            Ok(donation)
        }
        .await;
        tx.finish(result).await
    }
}

#[async_trait]
impl DonationStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn DonationTx>> {
        Ok(Box::new(PgTx::begin(self).await?))
    }

    async fn get(&self, donation_id: &str) -> Result<Option<Donation>> {
        let mut conn = self.conn().await?;
        let row: Option<DonationRow> = bounded(
            donations::table
                .find(donation_id)
                .select(DonationRow::as_select())
                .first(&mut *conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;
        row.map(Donation::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<Donation>> {
        let mut conn = self.conn().await?;
        let rows: Vec<DonationRow> = bounded(
            donations::table
                .filter(donations::donor_type.eq("user"))
                .filter(donations::donor_id.eq(user_id))
                .filter(donations::deleted.eq(false))
                .order(donations::created_at.desc())
                .limit(limit)
                .offset(offset)
                .select(DonationRow::as_select())
                .load(&mut *conn),
        )
        .await?;
        donations_from_rows(rows)
    }

    async fn list_messages_by_project(
        &self,
        project_id: &str,
        query: &MessageQuery,
    ) -> Result<MessagePage> {
        let mut conn = self.conn().await?;
        let donor = donor_pattern(query.donor.as_deref().unwrap_or_default());

        let total: TotalRow = bounded(
            diesel::sql_query(format!("SELECT COUNT(*)::BIGINT AS total {MESSAGE_FROM}"))
                .bind::<Text, _>(project_id)
                .bind::<Text, _>(&donor)
                .bind::<Text, _>(ANONYMOUS_DONOR)
                .get_result(&mut *conn),
        )
        .await?;

        let rows: Vec<MessageRow> = bounded(
            diesel::sql_query(format!(
                "SELECT COALESCE(u.display_name, $3) AS donor_name, d.amount, d.message, \
                 d.is_recurring, d.created_at {MESSAGE_FROM} \
                 ORDER BY d.created_at {} LIMIT $4 OFFSET $5",
                query.sort.as_sql()
            ))
            .bind::<Text, _>(project_id)
            .bind::<Text, _>(&donor)
            .bind::<Text, _>(ANONYMOUS_DONOR)
            .bind::<BigInt, _>(query.limit)
            .bind::<BigInt, _>(query.offset)
            .load(&mut *conn),
        )
        .await?;

        Ok(MessagePage {
            messages: rows.into_iter().map(Into::into).collect(),
            total: total.total,
        })
    }

    async fn patch(
        &self,
        donation_id: &str,
        user_id: &str,
        patch: &DonationPatch,
    ) -> Result<Donation> {
        self.update_owned(donation_id, user_id, |d| apply_patch(d, patch, Utc::now()))
            .await
    }

    async fn set_subscription_status(
        &self,
        donation_id: &str,
        user_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Donation> {
        self.update_owned(donation_id, user_id, |d| {
            if d.transition(status, Utc::now()) {
                Ok(())
            } else {
                Err(StoreError::Invalid(format!("cannot move subscription to {status}")))
            }
        })
        .await
    }

    async fn soft_delete(&self, donation_id: &str, user_id: &str) -> Result<()> {
        self.update_owned(donation_id, user_id, |d| {
            d.deleted = true;
            d.updated_at = Utc::now();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn monthly_sums(&self, project_id: &str) -> Result<Vec<MonthlySum>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MonthRow> = bounded(
            diesel::sql_query(
                "SELECT to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM') AS month, \
                 SUM(amount)::BIGINT AS amount \
                 FROM donations WHERE project_id = $1 AND NOT deleted \
                 GROUP BY month ORDER BY month ASC",
            )
            .bind::<Text, _>(project_id)
            .load(&mut *conn),
        )
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn rebind_token(&self, token: &str, user_id: &str) -> Result<MigrationOutcome> {
        let mut tx = PgTx::begin(self).await?;
        let result: Result<MigrationOutcome> = async {
            let now = Utc::now();
            let migrated = bounded(
                diesel::update(
                    donations::table
                        .filter(donations::donor_type.eq("token"))
                        .filter(donations::donor_id.eq(token)),
                )
                .set((
                    donations::donor_type.eq("user"),
                    donations::donor_id.eq(user_id),
                    donations::updated_at.eq(now),
                ))
                .execute(tx.conn()),
            )
            .await?;
            let migrated_count = i64::try_from(migrated).unwrap_or(i64::MAX);

            if migrated_count == 0 {
                let audits: i64 = bounded(
                    donor_token_migrations::table
                        .find((token, user_id))
                        .count()
                        .get_result(tx.conn()),
                )
                .await?;
                return Ok(MigrationOutcome {
                    migrated_count: 0,
                    already_migrated: audits > 0,
                });
            }

            bounded(
                diesel::insert_into(donor_token_migrations::table)
                    .values((
                        donor_token_migrations::token.eq(token),
                        donor_token_migrations::user_id.eq(user_id),
                        donor_token_migrations::migrated_count.eq(migrated_count),
                        donor_token_migrations::migrated_at.eq(now),
                    ))
                    .on_conflict((donor_token_migrations::token, donor_token_migrations::user_id))
                    .do_update()
                    .set((
                        donor_token_migrations::migrated_count
                            .eq(donor_token_migrations::migrated_count + migrated_count),
                        donor_token_migrations::migrated_at.eq(now),
                    ))
                    .execute(tx.conn()),
            )
            .await?;

            tracing::info!(user_id, migrated_count, "Rebound donor token to user");
            Ok(MigrationOutcome {
                migrated_count: u64::try_from(migrated_count).unwrap_or(0),
                already_migrated: false,
            })
        }
        .await;
        tx.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_donor_pattern_escapes_wildcards() {
        assert_eq!(donor_pattern(""), "");
        assert_eq!(donor_pattern("hana"), "%hana%");
        assert_eq!(donor_pattern("100%"), "%100\\%%");
        assert_eq!(donor_pattern("a_b\\c"), "%a\\_b\\\\c%");
    }
}
