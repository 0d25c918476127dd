//! Activity Recorder
//!
//! Best-effort append to the public feed. A failed write is logged and
//! swallowed; it never fails the operation that produced the item.

use std::sync::Arc;

use givers_core::ActivityItem;
use givers_store::ActivityStore;

use crate::error::Result;

pub const DEFAULT_GLOBAL_FEED: i64 = 10;
pub const MAX_GLOBAL_FEED: i64 = 50;
pub const MAX_PROJECT_FEED: i64 = 20;

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn ActivityStore>,
}

fn clamp(limit: Option<i64>, default: i64, max: i64) -> i64 {
    match limit {
        Some(l) if l > 0 => l.min(max),
        _ => default,
    }
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, item: ActivityItem) {
        match self.store.insert(&item).await {
            Ok(()) => tracing::debug!(
                kind = item.kind.as_str(),
                project_id = %item.project_id,
                "Recorded activity"
            ),
            Err(e) => tracing::warn!(
                kind = item.kind.as_str(),
                project_id = %item.project_id,
                error = %e,
                "Failed to record activity"
            ),
        }
    }

    /// Newest first; `limit` defaults to 10 and is capped at 50
    pub async fn global_feed(&self, limit: Option<i64>) -> Result<Vec<ActivityItem>> {
        let limit = clamp(limit, DEFAULT_GLOBAL_FEED, MAX_GLOBAL_FEED);
        Ok(self.store.list_global(limit).await?)
    }

    /// Newest first; capped at 20
    pub async fn project_feed(
        &self,
        project_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ActivityItem>> {
        let limit = clamp(limit, MAX_PROJECT_FEED, MAX_PROJECT_FEED);
        Ok(self.store.list_by_project(project_id, limit).await?)
    }
}
