use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use givers_core::{ActivityItem, Project};

use super::models::{ActivityRow, ProjectRow};
use super::schema::{activity, projects, users};
use super::tx::none_if_not_found;
use super::{bounded, PgStore};
use crate::error::{Result, StoreError};
use crate::{ActivityStore, ProjectDirectory, UserDirectory};

fn items_from_rows(rows: Vec<ActivityRow>) -> Result<Vec<ActivityItem>> {
    rows.into_iter().map(ActivityItem::try_from).collect()
}

#[async_trait]
impl ActivityStore for PgStore {
    async fn insert(&self, item: &ActivityItem) -> Result<()> {
        let mut conn = self.conn().await?;
        bounded(
            diesel::insert_into(activity::table)
                .values(ActivityRow::from(item))
                .execute(&mut *conn),
        )
        .await?;
        Ok(())
    }

    async fn list_global(&self, limit: i64) -> Result<Vec<ActivityItem>> {
        let mut conn = self.conn().await?;
        let rows = bounded(
            activity::table
                .order(activity::created_at.desc())
                .limit(limit)
                .select(ActivityRow::as_select())
                .load(&mut *conn),
        )
        .await?;
        items_from_rows(rows)
    }

    async fn list_by_project(&self, project_id: &str, limit: i64) -> Result<Vec<ActivityItem>> {
        let mut conn = self.conn().await?;
        let rows = bounded(
            activity::table
                .filter(activity::project_id.eq(project_id))
                .order(activity::created_at.desc())
                .limit(limit)
                .select(ActivityRow::as_select())
                .load(&mut *conn),
        )
        .await?;
        items_from_rows(rows)
    }
}

#[async_trait]
impl ProjectDirectory for PgStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let mut conn = self.conn().await?;
        let row: Option<ProjectRow> = bounded(
            projects::table
                .find(project_id)
                .select(ProjectRow::as_select())
                .first(&mut *conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;
        row.map(Project::try_from).transpose()
    }

    async fn attach_external_account(&self, project_id: &str, account_id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let updated = bounded(
            diesel::update(projects::table.find(project_id))
                .set(projects::external_account_id.eq(account_id))
                .execute(&mut *conn),
        )
        .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let name: Option<Option<String>> = bounded(
            users::table
                .find(user_id)
                .select(users::display_name)
                .first(&mut *conn),
        )
        .await
        .map(Some)
        .or_else(none_if_not_found)?;
        Ok(name.flatten())
    }
}
