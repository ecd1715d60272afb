//! Shared fixtures and fault-injecting wrappers for this crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cfcat_adapters::{SnapshotSource, SourceError, SourceKind};
use cfcat_core::{CatalogStats, ProblemEntry, ProblemKey, ProblemRecord, ProblemStatistic, Snapshot};
use cfcat_storage::{
    CatalogStore, CatalogTransaction, MemoryCatalogStore, NewProblem, ProblemFilter, ProblemId,
    ProblemUpdate, StoreError, TopicId,
};

pub fn entry(contest_id: i32, index: &str, name: &str, rating: Option<i32>, tags: &[&str]) -> ProblemEntry {
    ProblemEntry {
        contest_id: Some(contest_id),
        index: Some(index.to_string()),
        name: Some(name.to_string()),
        rating,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn stat(contest_id: i32, index: &str, solved_count: i32) -> ProblemStatistic {
    ProblemStatistic {
        contest_id: Some(contest_id),
        index: Some(index.to_string()),
        solved_count: Some(solved_count),
    }
}

pub fn scenario_snapshot() -> Snapshot {
    Snapshot::new(
        vec![
            entry(1, "A", "Sum", Some(1500), &["dp", "math"]),
            entry(1, "B", "Diff", Some(1600), &["greedy"]),
        ],
        vec![stat(1, "A", 1000), stat(1, "B", 500)],
    )
}

/// Returns a fixed snapshot, or a remote-status failure when built with `failing`.
pub struct StaticSource {
    snapshot: Option<Snapshot>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            snapshot: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    fn source_id(&self) -> &'static str {
        "static"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Fixture
    }

    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshot.clone().ok_or_else(|| SourceError::Remote {
            status: "FAILED".into(),
            comment: "Internal error".into(),
        })
    }
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    commits: AtomicUsize,
}

/// Memory store wrapper that can fail commits or inserts of one topic name.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryCatalogStore,
    fail_commit: bool,
    poison_topic: Option<String>,
    counters: Arc<Counters>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn poison_topic(mut self, name: &str) -> Self {
        self.poison_topic = Some(name.to_string());
        self
    }

    pub fn inner(&self) -> &MemoryCatalogStore {
        &self.inner
    }

    pub fn begins(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            fail_commit: self.fail_commit,
            poison_topic: self.poison_topic.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn filter_problems(&self, filter: &ProblemFilter) -> Result<Vec<ProblemRecord>, StoreError> {
        self.inner.filter_problems(filter).await
    }

    async fn search_problems(&self, needle: &str, limit: usize) -> Result<Vec<ProblemRecord>, StoreError> {
        self.inner.search_problems(needle, limit).await
    }

    async fn available_ratings(&self) -> Result<Vec<i32>, StoreError> {
        self.inner.available_ratings().await
    }

    async fn available_topics(&self) -> Result<Vec<String>, StoreError> {
        self.inner.available_topics().await
    }

    async fn problem_by_key(&self, key: &ProblemKey) -> Result<Option<ProblemRecord>, StoreError> {
        self.inner.problem_by_key(key).await
    }

    async fn stats(&self) -> Result<CatalogStats, StoreError> {
        self.inner.stats().await
    }
}

struct FaultyTransaction {
    inner: Box<dyn CatalogTransaction>,
    fail_commit: bool,
    poison_topic: Option<String>,
    counters: Arc<Counters>,
}

#[async_trait]
impl CatalogTransaction for FaultyTransaction {
    async fn find_problem(&mut self, key: &ProblemKey) -> Result<Option<ProblemId>, StoreError> {
        self.inner.find_problem(key).await
    }

    async fn insert_problem(&mut self, problem: &NewProblem) -> Result<ProblemId, StoreError> {
        self.inner.insert_problem(problem).await
    }

    async fn update_problem(&mut self, id: ProblemId, update: &ProblemUpdate) -> Result<(), StoreError> {
        self.inner.update_problem(id, update).await
    }

    async fn find_topic(&mut self, name: &str) -> Result<Option<TopicId>, StoreError> {
        self.inner.find_topic(name).await
    }

    async fn insert_topic(&mut self, name: &str) -> Result<TopicId, StoreError> {
        if self.poison_topic.as_deref() == Some(name) {
            return Err(StoreError::Backend(format!("value too long for topic {name}")));
        }
        self.inner.insert_topic(name).await
    }

    async fn link_topic(&mut self, problem: ProblemId, topic: TopicId) -> Result<(), StoreError> {
        self.inner.link_topic(problem, topic).await
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.inner.savepoint().await
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.inner.release_savepoint().await
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.inner.rollback_to_savepoint().await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Backend("connection reset during commit".into()));
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
