//! Insert-or-update of a snapshot into the catalog store, committed once per run.

use std::collections::HashMap;
use std::sync::Arc;

use cfcat_core::{ProblemEntry, ProblemKey, ProblemStatistic, Snapshot};
use cfcat_storage::{CatalogStore, CatalogTransaction, NewProblem, ProblemUpdate, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Reasons a single snapshot entry is skipped; never fatal to the batch.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("entry has no contest id or problem index")]
    MissingIdentity,
    #[error("entry could not be decoded: {0}")]
    Malformed(String),
    #[error("new problem {0} has no name")]
    MissingName(ProblemKey),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Created,
    Updated,
}

pub fn index_statistics(statistics: &[ProblemStatistic]) -> HashMap<ProblemKey, i32> {
    statistics
        .iter()
        .filter_map(|stat| Some((stat.key()?, stat.solved_count?)))
        .collect()
}

pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Merge `snapshot` into the store inside one transaction.
    ///
    /// Entry-level failures are logged and skipped behind a savepoint. Anything else
    /// (begin, savepoint bookkeeping, commit) rolls back the whole batch.
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<ReconcileReport, StoreError> {
        let solved_counts = index_statistics(&snapshot.statistics);
        let mut tx = self.store.begin().await?;

        match apply_batch(tx.as_mut(), snapshot, &solved_counts).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    created = report.created,
                    updated = report.updated,
                    skipped = report.skipped,
                    "reconciliation committed"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed reconciliation also failed");
                }
                Err(err)
            }
        }
    }
}

async fn apply_batch(
    tx: &mut dyn CatalogTransaction,
    snapshot: &Snapshot,
    solved_counts: &HashMap<ProblemKey, i32>,
) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport::default();

    for rejected in &snapshot.malformed {
        let err = EntryError::Malformed(rejected.reason.clone());
        warn!(problem = %rejected.label, error = %err, "skipping problem");
        report.skipped += 1;
    }

    for entry in &snapshot.problems {
        let Some(key) = entry.key() else {
            warn!(problem = %entry.label(), error = %EntryError::MissingIdentity, "skipping problem");
            report.skipped += 1;
            continue;
        };

        tx.savepoint().await?;
        match apply_entry(tx, &key, entry, solved_counts.get(&key).copied()).await {
            Ok(outcome) => {
                tx.release_savepoint().await?;
                match outcome {
                    EntryOutcome::Created => report.created += 1,
                    EntryOutcome::Updated => report.updated += 1,
                }
            }
            Err(err) => {
                warn!(
                    contest_id = key.contest_id,
                    index = %key.index,
                    error = %err,
                    "skipping problem"
                );
                tx.rollback_to_savepoint().await?;
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

async fn apply_entry(
    tx: &mut dyn CatalogTransaction,
    key: &ProblemKey,
    entry: &ProblemEntry,
    solved_count: Option<i32>,
) -> Result<EntryOutcome, EntryError> {
    if let Some(id) = tx.find_problem(key).await? {
        let update = ProblemUpdate {
            name: entry.name.clone(),
            rating: entry.rating,
            solved_count,
        };
        tx.update_problem(id, &update).await?;
        // Topic membership of existing problems stays as first ingested.
        return Ok(EntryOutcome::Updated);
    }

    let name = entry
        .name
        .clone()
        .ok_or_else(|| EntryError::MissingName(key.clone()))?;
    let id = tx
        .insert_problem(&NewProblem {
            key: key.clone(),
            name,
            rating: entry.rating,
            solved_count: solved_count.unwrap_or(0),
        })
        .await?;

    for tag in entry.tags.iter().filter(|t| !t.trim().is_empty()) {
        let topic = match tx.find_topic(tag).await? {
            Some(topic) => topic,
            None => tx.insert_topic(tag).await?,
        };
        tx.link_topic(id, topic).await?;
    }

    Ok(EntryOutcome::Created)
}
