//! In-memory [`CatalogStore`] for tests and offline runs.
//!
//! Committed state lives behind a `std::sync::RwLock`. A transaction works on a
//! private copy and swaps it in on commit, so readers never see a partial batch.
//! Savepoints are an undo log replayed in reverse.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cfcat_core::{CatalogStats, ProblemKey, ProblemRecord};

use crate::{
    clamp_limit, CatalogStore, CatalogTransaction, NewProblem, ProblemFilter, ProblemId,
    ProblemUpdate, StoreError, TopicId,
};

#[derive(Debug, Clone)]
struct StoredProblem {
    key: ProblemKey,
    name: String,
    rating: Option<i32>,
    solved_count: i32,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    problems: BTreeMap<i32, StoredProblem>,
    problem_keys: HashMap<ProblemKey, i32>,
    topics: BTreeMap<i32, String>,
    topic_names: HashMap<String, i32>,
    links: BTreeSet<(i32, i32)>,
    next_problem_id: i32,
    next_topic_id: i32,
}

impl CatalogState {
    fn record(&self, id: i32) -> Option<ProblemRecord> {
        let problem = self.problems.get(&id)?;
        let mut topics = self.topics_of(id);
        topics.sort();
        Some(ProblemRecord {
            id,
            key: problem.key.clone(),
            name: problem.name.clone(),
            rating: problem.rating,
            solved_count: problem.solved_count,
            topics,
        })
    }

    fn topics_of(&self, problem_id: i32) -> Vec<String> {
        self.links
            .range((problem_id, i32::MIN)..=(problem_id, i32::MAX))
            .filter_map(|(_, topic_id)| self.topics.get(topic_id).cloned())
            .collect()
    }

    /// Problem ids ordered by (contest id, index).
    fn ordered_ids(&self) -> Vec<i32> {
        let mut ids: Vec<_> = self.problems.iter().map(|(id, p)| (&p.key, *id)).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn has_topic(&self, problem_id: i32, name: &str) -> bool {
        self.topic_names
            .get(name)
            .is_some_and(|topic_id| self.links.contains(&(problem_id, *topic_id)))
    }
}

enum Undo {
    InsertProblem(i32),
    UpdateProblem(i32, StoredProblem),
    InsertTopic(i32),
    Link(i32, i32),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    state: Arc<RwLock<CatalogState>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state<T>(&self, f: impl FnOnce(&CatalogState) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("catalog lock poisoned".into()))?;
        Ok(f(&state))
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError> {
        let working = self.read_state(CatalogState::clone)?;
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            working,
            undo: None,
        }))
    }

    async fn filter_problems(&self, filter: &ProblemFilter) -> Result<Vec<ProblemRecord>, StoreError> {
        let limit = clamp_limit(filter.limit);
        self.read_state(|state| {
            let mut seen_contests = BTreeSet::new();
            state
                .ordered_ids()
                .into_iter()
                .filter(|id| {
                    let problem = &state.problems[id];
                    filter.rating.map_or(true, |r| problem.rating == Some(r))
                        && filter
                            .topic
                            .as_deref()
                            .map_or(true, |topic| state.has_topic(*id, topic))
                })
                .filter(|id| seen_contests.insert(state.problems[id].key.contest_id))
                .take(limit)
                .filter_map(|id| state.record(id))
                .collect()
        })
    }

    async fn search_problems(&self, needle: &str, limit: usize) -> Result<Vec<ProblemRecord>, StoreError> {
        let needle = needle.to_lowercase();
        self.read_state(|state| {
            state
                .ordered_ids()
                .into_iter()
                .filter(|id| {
                    let problem = &state.problems[id];
                    problem.name.to_lowercase().contains(&needle)
                        || problem.key.index.to_lowercase().contains(&needle)
                        || problem.key.full_code().to_lowercase().contains(&needle)
                })
                .take(limit)
                .filter_map(|id| state.record(id))
                .collect()
        })
    }

    async fn available_ratings(&self) -> Result<Vec<i32>, StoreError> {
        self.read_state(|state| {
            state
                .problems
                .values()
                .filter_map(|p| p.rating)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    async fn available_topics(&self) -> Result<Vec<String>, StoreError> {
        self.read_state(|state| {
            state
                .topics
                .values()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    async fn problem_by_key(&self, key: &ProblemKey) -> Result<Option<ProblemRecord>, StoreError> {
        self.read_state(|state| {
            state
                .problem_keys
                .get(key)
                .and_then(|id| state.record(*id))
        })
    }

    async fn stats(&self) -> Result<CatalogStats, StoreError> {
        self.read_state(|state| CatalogStats {
            problems: state.problems.len() as u64,
            topics: state.topics.len() as u64,
            links: state.links.len() as u64,
        })
    }
}

pub struct MemoryTransaction {
    shared: Arc<RwLock<CatalogState>>,
    working: CatalogState,
    undo: Option<Vec<Undo>>,
}

impl MemoryTransaction {
    fn record_undo(&mut self, step: Undo) {
        if let Some(log) = self.undo.as_mut() {
            log.push(step);
        }
    }
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn find_problem(&mut self, key: &ProblemKey) -> Result<Option<ProblemId>, StoreError> {
        Ok(self.working.problem_keys.get(key).copied().map(ProblemId))
    }

    async fn insert_problem(&mut self, problem: &NewProblem) -> Result<ProblemId, StoreError> {
        if self.working.problem_keys.contains_key(&problem.key) {
            return Err(StoreError::Duplicate {
                what: "problem",
                key: problem.key.full_code(),
            });
        }
        self.working.next_problem_id += 1;
        let id = self.working.next_problem_id;
        self.working.problems.insert(
            id,
            StoredProblem {
                key: problem.key.clone(),
                name: problem.name.clone(),
                rating: problem.rating,
                solved_count: problem.solved_count,
            },
        );
        self.working.problem_keys.insert(problem.key.clone(), id);
        self.record_undo(Undo::InsertProblem(id));
        Ok(ProblemId(id))
    }

    async fn update_problem(&mut self, id: ProblemId, update: &ProblemUpdate) -> Result<(), StoreError> {
        let problem = self
            .working
            .problems
            .get_mut(&id.0)
            .ok_or(StoreError::Missing { what: "problem", id: id.0 })?;
        let before = problem.clone();
        if let Some(name) = &update.name {
            problem.name = name.clone();
        }
        if let Some(rating) = update.rating {
            problem.rating = Some(rating);
        }
        if let Some(solved_count) = update.solved_count {
            problem.solved_count = solved_count;
        }
        self.record_undo(Undo::UpdateProblem(id.0, before));
        Ok(())
    }

    async fn find_topic(&mut self, name: &str) -> Result<Option<TopicId>, StoreError> {
        Ok(self.working.topic_names.get(name).copied().map(TopicId))
    }

    async fn insert_topic(&mut self, name: &str) -> Result<TopicId, StoreError> {
        if self.working.topic_names.contains_key(name) {
            return Err(StoreError::Duplicate {
                what: "topic",
                key: name.to_string(),
            });
        }
        self.working.next_topic_id += 1;
        let id = self.working.next_topic_id;
        self.working.topics.insert(id, name.to_string());
        self.working.topic_names.insert(name.to_string(), id);
        self.record_undo(Undo::InsertTopic(id));
        Ok(TopicId(id))
    }

    async fn link_topic(&mut self, problem: ProblemId, topic: TopicId) -> Result<(), StoreError> {
        if !self.working.problems.contains_key(&problem.0) {
            return Err(StoreError::Missing { what: "problem", id: problem.0 });
        }
        if !self.working.topics.contains_key(&topic.0) {
            return Err(StoreError::Missing { what: "topic", id: topic.0 });
        }
        if self.working.links.insert((problem.0, topic.0)) {
            self.record_undo(Undo::Link(problem.0, topic.0));
        }
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.undo = Some(Vec::new());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.undo.take().ok_or(StoreError::NoSavepoint)?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let log = self.undo.take().ok_or(StoreError::NoSavepoint)?;
        let state = &mut self.working;
        for step in log.into_iter().rev() {
            match step {
                Undo::InsertProblem(id) => {
                    if let Some(problem) = state.problems.remove(&id) {
                        state.problem_keys.remove(&problem.key);
                    }
                }
                Undo::UpdateProblem(id, before) => {
                    state.problems.insert(id, before);
                }
                Undo::InsertTopic(id) => {
                    if let Some(name) = state.topics.remove(&id) {
                        state.topic_names.remove(&name);
                    }
                }
                Undo::Link(problem_id, topic_id) => {
                    state.links.remove(&(problem_id, topic_id));
                }
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { shared, working, .. } = *self;
        let mut state = shared
            .write()
            .map_err(|_| StoreError::Backend("catalog lock poisoned".into()))?;
        *state = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
