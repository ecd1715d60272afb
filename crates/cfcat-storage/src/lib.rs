//! Catalog persistence (PostgreSQL + in-memory backends) and HTTP fetch utilities.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use cfcat_core::{CatalogStats, ProblemKey, ProblemRecord};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

pub mod http;
pub mod memory;
pub mod postgres;

pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

pub const CRATE_NAME: &str = "cfcat-storage";

/// Upper bound applied to every filtered read, whatever the caller asks for.
pub const MAX_QUERY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid database configuration: {0}")]
    Config(String),
    #[error("duplicate {what}: {key}")]
    Duplicate { what: &'static str, key: String },
    #[error("unknown {what} id {id}")]
    Missing { what: &'static str, id: i32 },
    #[error("no open savepoint")]
    NoSavepoint,
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProblemId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(pub i32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProblem {
    pub key: ProblemKey,
    pub name: String,
    pub rating: Option<i32>,
    pub solved_count: i32,
}

/// Column changes for an existing problem; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemUpdate {
    pub name: Option<String>,
    pub rating: Option<i32>,
    pub solved_count: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemFilter {
    pub rating: Option<i32>,
    pub topic: Option<String>,
    pub limit: usize,
}

/// Read side of the catalog plus the entry point for write transactions.
///
/// Any number of readers may run while one transaction is open; readers observe
/// either the state before or after its commit, never a partial batch.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError>;

    /// Problems matching optional exact rating and topic, one per contest id,
    /// ordered by (contest id, index).
    async fn filter_problems(&self, filter: &ProblemFilter) -> Result<Vec<ProblemRecord>, StoreError>;

    /// Case-insensitive substring match on name, index or full code.
    async fn search_problems(&self, needle: &str, limit: usize) -> Result<Vec<ProblemRecord>, StoreError>;

    async fn available_ratings(&self) -> Result<Vec<i32>, StoreError>;

    async fn available_topics(&self) -> Result<Vec<String>, StoreError>;

    async fn problem_by_key(&self, key: &ProblemKey) -> Result<Option<ProblemRecord>, StoreError>;

    async fn stats(&self) -> Result<CatalogStats, StoreError>;
}

/// A single reconciliation batch. Dropping it without `commit` discards every change.
#[async_trait]
pub trait CatalogTransaction: Send {
    async fn find_problem(&mut self, key: &ProblemKey) -> Result<Option<ProblemId>, StoreError>;

    async fn insert_problem(&mut self, problem: &NewProblem) -> Result<ProblemId, StoreError>;

    async fn update_problem(&mut self, id: ProblemId, update: &ProblemUpdate) -> Result<(), StoreError>;

    async fn find_topic(&mut self, name: &str) -> Result<Option<TopicId>, StoreError>;

    async fn insert_topic(&mut self, name: &str) -> Result<TopicId, StoreError>;

    /// Attach a topic to a problem; attaching twice is a no-op.
    async fn link_topic(&mut self, problem: ProblemId, topic: TopicId) -> Result<(), StoreError>;

    /// Open an entry-scoped savepoint. Only one level is supported.
    async fn savepoint(&mut self) -> Result<(), StoreError>;

    async fn release_savepoint(&mut self) -> Result<(), StoreError>;

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `DATABASE_URL` wins; otherwise the URL is composed from the `DATABASE_*` parts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                compose_database_url(
                    &lookup("DATABASE_HOST").unwrap_or_else(|| "localhost".to_string()),
                    &lookup("DATABASE_PORT").unwrap_or_else(|| "5432".to_string()),
                    &lookup("DATABASE_NAME").unwrap_or_else(|| "codeforces_db".to_string()),
                    &lookup("DATABASE_USER").unwrap_or_else(|| "user".to_string()),
                    &lookup("DATABASE_PASSWORD").unwrap_or_else(|| "password".to_string()),
                )
            });
        Self {
            url,
            max_connections: lookup("CFCAT_DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, StoreError> {
        PgConnectOptions::from_str(&self.url)
            .map_err(|err| StoreError::Config(format!("{}: {err}", self.redacted_url())))
    }

    /// The URL with any password replaced by `***`, safe for log lines.
    pub fn redacted_url(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() && url.set_password(Some("***")).is_err() {
                    return "<unprintable database url>".to_string();
                }
                url.to_string()
            }
            Err(_) => "<invalid database url>".to_string(),
        }
    }
}

pub fn compose_database_url(host: &str, port: &str, name: &str, user: &str, password: &str) -> String {
    format!(
        "postgresql://{}:{}@{host}:{port}/{name}",
        urlencoding::encode(user),
        urlencoding::encode(password)
    )
}

pub(crate) fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_QUERY_LIMIT)
}
