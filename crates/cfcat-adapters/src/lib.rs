//! Snapshot sources: the Codeforces problemset API and on-disk fixtures of the same envelope.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cfcat_core::{MalformedEntry, ProblemEntry, ProblemStatistic, Snapshot};
use cfcat_storage::{FetchError, HttpClientConfig, HttpFetcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "cfcat-adapters";

pub const CODEFORCES_PROBLEMSET_URL: &str = "https://codeforces.com/api/problemset.problems";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Api,
    Fixture,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding problemset envelope: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("remote reported status {status}: {comment}")]
    Remote { status: String, comment: String },
    #[error("envelope reported OK without a result")]
    MissingResult,
    #[error("reading fixture {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces one full snapshot of the remote catalog per call. Implementations do not retry.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn kind(&self) -> SourceKind;

    async fn fetch(&self) -> Result<Snapshot, SourceError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Option<ProblemsetResult>,
}

/// Elements stay raw so each one is typed on its own.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProblemsetResult {
    #[serde(default)]
    problems: Vec<Value>,
    #[serde(default)]
    problem_statistics: Vec<Value>,
}

/// Decode `{status, comment?, result:{problems, problemStatistics}}`; only `status == "OK"` is trusted.
pub fn decode_envelope(bytes: &[u8], fetched_at: DateTime<Utc>) -> Result<Snapshot, SourceError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.status != "OK" {
        return Err(SourceError::Remote {
            status: envelope.status,
            comment: envelope
                .comment
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }
    let result = envelope.result.ok_or(SourceError::MissingResult)?;

    let mut problems = Vec::with_capacity(result.problems.len());
    let mut malformed = Vec::new();
    for raw in result.problems {
        let label = raw_label(&raw);
        match serde_json::from_value::<ProblemEntry>(raw) {
            Ok(entry) => problems.push(entry),
            Err(err) => malformed.push(MalformedEntry {
                label,
                reason: err.to_string(),
            }),
        }
    }

    let statistics = result
        .problem_statistics
        .into_iter()
        .filter_map(|raw| {
            let label = raw_label(&raw);
            match serde_json::from_value::<ProblemStatistic>(raw) {
                Ok(stat) => Some(stat),
                Err(err) => {
                    warn!(statistic = %label, error = %err, "dropping malformed statistics row");
                    None
                }
            }
        })
        .collect();

    Ok(Snapshot {
        fetched_at,
        problems,
        statistics,
        malformed,
    })
}

/// `contestId` + `index` rendered from whatever JSON types they hold, `?` when unusable.
fn raw_label(raw: &Value) -> String {
    let part = |field: &str| match raw.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "?".to_string(),
    };
    format!("{}{}", part("contestId"), part("index"))
}

fn log_outcome(source_id: &str, outcome: &Result<Snapshot, SourceError>) {
    match outcome {
        Ok(snapshot) => info!(
            source_id,
            problems = snapshot.problems.len(),
            statistics = snapshot.statistics.len(),
            malformed = snapshot.malformed.len(),
            "fetched problemset snapshot"
        ),
        Err(SourceError::Remote { status, comment }) => {
            error!(source_id, status = %status, comment = %comment, "problemset API returned an error")
        }
        Err(err) => error!(source_id, error = %err, "problemset fetch failed"),
    }
}

pub struct CodeforcesApiSource {
    http: HttpFetcher,
    url: String,
}

impl CodeforcesApiSource {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for CodeforcesApiSource {
    fn source_id(&self) -> &'static str {
        "codeforces-api"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        info!(url = %self.url, "fetching problems from Codeforces API");
        let outcome = match self.http.fetch_bytes(&self.url).await {
            Ok(resp) => decode_envelope(&resp.body, Utc::now()),
            Err(err) => Err(err.into()),
        };
        log_outcome(self.source_id(), &outcome);
        outcome
    }
}

/// Reads a saved problemset envelope from disk instead of the network.
#[derive(Debug, Clone)]
pub struct FixtureSnapshotSource {
    path: PathBuf,
}

impl FixtureSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for FixtureSnapshotSource {
    fn source_id(&self) -> &'static str {
        "codeforces-fixture"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Fixture
    }

    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        let outcome = match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode_envelope(&bytes, Utc::now()),
            Err(source) => Err(SourceError::Io {
                path: self.path.clone(),
                source,
            }),
        };
        log_outcome(self.source_id(), &outcome);
        outcome
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub api_url: String,
    pub fixture_path: Option<PathBuf>,
    pub http: HttpClientConfig,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            api_url: CODEFORCES_PROBLEMSET_URL.to_string(),
            fixture_path: None,
            http: HttpClientConfig::default(),
        }
    }
}

/// A fixture path, when configured, takes precedence over the network source.
pub fn source_for(settings: &SourceSettings) -> anyhow::Result<Arc<dyn SnapshotSource>> {
    if let Some(path) = &settings.fixture_path {
        return Ok(Arc::new(FixtureSnapshotSource::new(path.clone())));
    }
    let http = HttpFetcher::new(settings.http.clone())?;
    Ok(Arc::new(CodeforcesApiSource::new(http, settings.api_url.clone())))
}
