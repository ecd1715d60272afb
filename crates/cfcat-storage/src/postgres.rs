//! PostgreSQL-backed catalog store.

use async_trait::async_trait;
use cfcat_core::{CatalogStats, ProblemKey, ProblemRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::info;

use crate::{
    clamp_limit, like_pattern, CatalogStore, CatalogTransaction, DatabaseConfig, NewProblem,
    ProblemFilter, ProblemId, ProblemUpdate, StoreError, TopicId,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS problems (
    id SERIAL PRIMARY KEY,
    contest_id INTEGER NOT NULL,
    problem_index VARCHAR(10) NOT NULL,
    name VARCHAR(500) NOT NULL,
    rating INTEGER,
    solved_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (contest_id, problem_index)
);

CREATE TABLE IF NOT EXISTS topics (
    id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS problem_topic_association (
    problem_id INTEGER NOT NULL REFERENCES problems(id),
    topic_id INTEGER NOT NULL REFERENCES topics(id),
    PRIMARY KEY (problem_id, topic_id)
);

CREATE INDEX IF NOT EXISTS idx_problems_rating ON problems(rating);
"#;

/// Shared projection; `topics` is folded into a sorted text array per problem.
const PROBLEM_COLUMNS: &str = r#"
    p.id, p.contest_id, p.problem_index, p.name, p.rating, p.solved_count,
    ARRAY(
        SELECT t.name::text
          FROM problem_topic_association pta
          JOIN topics t ON t.id = pta.topic_id
         WHERE pta.problem_id = p.id
         ORDER BY t.name
    ) AS topics
"#;

const SAVEPOINT: &str = "reconcile_entry";

#[derive(Debug, FromRow)]
struct ProblemRow {
    id: i32,
    contest_id: i32,
    problem_index: String,
    name: String,
    rating: Option<i32>,
    solved_count: i32,
    topics: Vec<String>,
}

impl From<ProblemRow> for ProblemRecord {
    fn from(row: ProblemRow) -> Self {
        ProblemRecord {
            id: row.id,
            key: ProblemKey::new(row.contest_id, row.problem_index),
            name: row.name,
            rating: row.rating,
            solved_count: row.solved_count,
            topics: row.topics,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = config.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;
        info!(database = %config.redacted_url(), "connected to catalog database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the catalog tables when they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("catalog schema ready");
        Ok(())
    }

    /// Server version string, used as a connectivity probe.
    pub async fn check_connection(&self) -> Result<String, StoreError> {
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogTransaction { tx }))
    }

    async fn filter_problems(&self, filter: &ProblemFilter) -> Result<Vec<ProblemRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT DISTINCT ON (p.contest_id) {PROBLEM_COLUMNS}
              FROM problems p
             WHERE ($1::int IS NULL OR p.rating = $1)
               AND ($2::text IS NULL OR EXISTS (
                        SELECT 1
                          FROM problem_topic_association pta
                          JOIN topics t ON t.id = pta.topic_id
                         WHERE pta.problem_id = p.id
                           AND t.name = $2))
             ORDER BY p.contest_id, p.problem_index
             LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, ProblemRow>(&sql)
            .bind(filter.rating)
            .bind(filter.topic.as_deref())
            .bind(clamp_limit(filter.limit) as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ProblemRecord::from).collect())
    }

    async fn search_problems(&self, needle: &str, limit: usize) -> Result<Vec<ProblemRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PROBLEM_COLUMNS}
              FROM problems p
             WHERE p.name ILIKE $1
                OR p.problem_index ILIKE $1
                OR (p.contest_id::text || p.problem_index) ILIKE $1
             ORDER BY p.contest_id, p.problem_index
             LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, ProblemRow>(&sql)
            .bind(like_pattern(needle))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ProblemRecord::from).collect())
    }

    async fn available_ratings(&self) -> Result<Vec<i32>, StoreError> {
        let ratings = sqlx::query_scalar(
            r#"
            SELECT DISTINCT rating
              FROM problems
             WHERE rating IS NOT NULL
             ORDER BY rating
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ratings)
    }

    async fn available_topics(&self) -> Result<Vec<String>, StoreError> {
        let topics = sqlx::query_scalar("SELECT DISTINCT name::text FROM topics ORDER BY 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(topics)
    }

    async fn problem_by_key(&self, key: &ProblemKey) -> Result<Option<ProblemRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PROBLEM_COLUMNS}
              FROM problems p
             WHERE p.contest_id = $1
               AND p.problem_index = $2
            "#
        );
        let row = sqlx::query_as::<_, ProblemRow>(&sql)
            .bind(key.contest_id)
            .bind(&key.index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ProblemRecord::from))
    }

    async fn stats(&self) -> Result<CatalogStats, StoreError> {
        let (problems, topics, links): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT (SELECT COUNT(*) FROM problems),
                   (SELECT COUNT(*) FROM topics),
                   (SELECT COUNT(*) FROM problem_topic_association)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CatalogStats {
            problems: problems as u64,
            topics: topics as u64,
            links: links as u64,
        })
    }
}

/// Holds one pooled connection for the whole batch; sqlx rolls back on drop.
pub struct PgCatalogTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTransaction for PgCatalogTransaction {
    async fn find_problem(&mut self, key: &ProblemKey) -> Result<Option<ProblemId>, StoreError> {
        let id: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM problems WHERE contest_id = $1 AND problem_index = $2",
        )
        .bind(key.contest_id)
        .bind(&key.index)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id.map(ProblemId))
    }

    async fn insert_problem(&mut self, problem: &NewProblem) -> Result<ProblemId, StoreError> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO problems (contest_id, problem_index, name, rating, solved_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(problem.key.contest_id)
        .bind(&problem.key.index)
        .bind(&problem.name)
        .bind(problem.rating)
        .bind(problem.solved_count)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(ProblemId(id))
    }

    async fn update_problem(&mut self, id: ProblemId, update: &ProblemUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE problems
               SET name = COALESCE($2, name),
                   rating = COALESCE($3, rating),
                   solved_count = COALESCE($4, solved_count)
             WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(update.name.as_deref())
        .bind(update.rating)
        .bind(update.solved_count)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing { what: "problem", id: id.0 });
        }
        Ok(())
    }

    async fn find_topic(&mut self, name: &str) -> Result<Option<TopicId>, StoreError> {
        let id: Option<i32> = sqlx::query_scalar("SELECT id FROM topics WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id.map(TopicId))
    }

    async fn insert_topic(&mut self, name: &str) -> Result<TopicId, StoreError> {
        let id: i32 = sqlx::query_scalar("INSERT INTO topics (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(TopicId(id))
    }

    async fn link_topic(&mut self, problem: ProblemId, topic: TopicId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO problem_topic_association (problem_id, topic_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(problem.0)
        .bind(topic.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        sqlx::query(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
