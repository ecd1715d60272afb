//! Read-only catalog access for front ends.

use std::sync::Arc;

use cfcat_core::{ProblemKey, ProblemRecord};
use cfcat_storage::{CatalogStore, ProblemFilter, StoreError, MAX_QUERY_LIMIT};
use tracing::error;

pub const DEFAULT_FILTER_LIMIT: usize = 10;
pub const SEARCH_LIMIT: usize = 20;

/// Store failures are logged and surface as empty results, so a broken database
/// degrades reads instead of failing them.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn CatalogStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// At most one problem per contest, ordered by contest id then index.
    pub async fn problems_by_filters(
        &self,
        rating: Option<i32>,
        topic: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ProblemRecord> {
        let filter = ProblemFilter {
            rating,
            topic: topic.map(str::to_string),
            limit: limit.unwrap_or(DEFAULT_FILTER_LIMIT).clamp(1, MAX_QUERY_LIMIT),
        };
        or_log(self.store.filter_problems(&filter).await, "filtering problems").unwrap_or_default()
    }

    pub async fn search(&self, query: &str) -> Vec<ProblemRecord> {
        or_log(
            self.store.search_problems(query.trim(), SEARCH_LIMIT).await,
            "searching problems",
        )
        .unwrap_or_default()
    }

    pub async fn available_ratings(&self) -> Vec<i32> {
        or_log(self.store.available_ratings().await, "listing ratings").unwrap_or_default()
    }

    pub async fn available_topics(&self) -> Vec<String> {
        or_log(self.store.available_topics().await, "listing topics").unwrap_or_default()
    }

    pub async fn problem_by_code(&self, contest_id: i32, index: &str) -> Option<ProblemRecord> {
        let key = ProblemKey::new(contest_id, index);
        or_log(self.store.problem_by_key(&key).await, "looking up problem").flatten()
    }
}

fn or_log<T>(result: Result<T, StoreError>, action: &'static str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            error!(error = %err, "{action} failed");
            None
        }
    }
}
