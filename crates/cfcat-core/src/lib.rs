//! Core domain model for the Codeforces problem catalog.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cfcat-core";

/// Base URL used to build canonical problem links.
pub const PROBLEMSET_BASE_URL: &str = "https://codeforces.com/problemset/problem";

/// Composite identity of a problem: contest id plus problem index ("A", "B1", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProblemKey {
    pub contest_id: i32,
    pub index: String,
}

impl ProblemKey {
    pub fn new(contest_id: i32, index: impl Into<String>) -> Self {
        Self {
            contest_id,
            index: index.into(),
        }
    }

    /// Display identifier, e.g. `1234B1`.
    pub fn full_code(&self) -> String {
        format!("{}{}", self.contest_id, self.index)
    }

    pub fn url(&self) -> String {
        format!("{PROBLEMSET_BASE_URL}/{}/{}", self.contest_id, self.index)
    }
}

impl fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.contest_id, self.index)
    }
}

/// Persisted problem as read back from the catalog store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub id: i32,
    pub key: ProblemKey,
    pub name: String,
    pub rating: Option<i32>,
    pub solved_count: i32,
    /// Topic names, sorted ascending.
    pub topics: Vec<String>,
}

impl ProblemRecord {
    pub fn full_code(&self) -> String {
        self.key.full_code()
    }

    pub fn url(&self) -> String {
        self.key.url()
    }
}

/// One problem as reported by the remote catalog.
///
/// Identity fields are optional at decode time so one malformed entry cannot make the
/// whole snapshot undecodable; the reconciler validates them entry by entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemEntry {
    #[serde(default)]
    pub contest_id: Option<i32>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ProblemEntry {
    /// Identity of the entry when both halves are present and the index is not blank.
    pub fn key(&self) -> Option<ProblemKey> {
        let contest_id = self.contest_id?;
        let index = self.index.as_deref().map(str::trim).filter(|i| !i.is_empty())?;
        Some(ProblemKey::new(contest_id, index))
    }

    /// Best-effort label for log lines, tolerant of missing fields.
    pub fn label(&self) -> String {
        format!(
            "{}{}",
            self.contest_id
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.index.as_deref().unwrap_or("?")
        )
    }
}

/// Solve-count statistic for one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemStatistic {
    #[serde(default)]
    pub contest_id: Option<i32>,
    #[serde(default)]
    pub index: Option<String>,
    /// Absent when the row carries no count; the stored value is then left alone.
    #[serde(default)]
    pub solved_count: Option<i32>,
}

impl ProblemStatistic {
    pub fn key(&self) -> Option<ProblemKey> {
        let contest_id = self.contest_id?;
        let index = self.index.as_deref().map(str::trim).filter(|i| !i.is_empty())?;
        Some(ProblemKey::new(contest_id, index))
    }
}

/// A problem entry whose fields had the wrong JSON types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEntry {
    /// Same shape as [`ProblemEntry::label`], built from whatever fields were readable.
    pub label: String,
    pub reason: String,
}

/// One full fetch of the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub problems: Vec<ProblemEntry>,
    pub statistics: Vec<ProblemStatistic>,
    #[serde(default)]
    pub malformed: Vec<MalformedEntry>,
}

impl Snapshot {
    pub fn new(problems: Vec<ProblemEntry>, statistics: Vec<ProblemStatistic>) -> Self {
        Self {
            fetched_at: Utc::now(),
            problems,
            statistics,
            malformed: Vec::new(),
        }
    }
}

/// Row counts across the catalog tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub problems: u64,
    pub topics: u64,
    pub links: u64,
}
