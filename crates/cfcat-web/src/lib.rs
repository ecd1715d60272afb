//! Axum JSON surface over the problem catalog.

pub mod query;

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cfcat_core::ProblemRecord;
use cfcat_storage::CatalogStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use query::QueryService;

pub const CRATE_NAME: &str = "cfcat-web";
pub const DEFAULT_WEB_PORT: u16 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("CFCAT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WEB_PORT),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub queries: QueryService,
}

impl AppState {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            queries: QueryService::new(store),
        }
    }
}

/// Wire shape of a problem, with the derived code and link filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemView {
    pub id: i32,
    pub contest_id: i32,
    pub index: String,
    pub name: String,
    pub rating: Option<i32>,
    pub solved_count: i32,
    pub topics: Vec<String>,
    pub full_code: String,
    pub url: String,
}

impl From<ProblemRecord> for ProblemView {
    fn from(record: ProblemRecord) -> Self {
        Self {
            full_code: record.full_code(),
            url: record.url(),
            id: record.id,
            contest_id: record.key.contest_id,
            index: record.key.index,
            name: record.name,
            rating: record.rating,
            solved_count: record.solved_count,
            topics: record.topics,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProblemsQuery {
    rating: Option<i32>,
    topic: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/problems", get(problems_handler))
        .route("/problems/search", get(search_handler))
        .route("/problems/{contest_id}/{index}", get(problem_detail_handler))
        .route("/ratings", get(ratings_handler))
        .route("/topics", get(topics_handler))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve(
    store: Arc<dyn CatalogStore>,
    config: WebConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "query service listening");
    axum::serve(listener, app(AppState::new(store)))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.queries.store().stats().await {
        Ok(stats) => Json(json!({ "status": "ok", "catalog": stats })).into_response(),
        Err(err) => {
            error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn problems_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProblemsQuery>,
) -> Json<Vec<ProblemView>> {
    let topic = query.topic.as_deref().filter(|t| !t.is_empty());
    let rows = state
        .queries
        .problems_by_filters(query.rating, topic, query.limit)
        .await;
    Json(rows.into_iter().map(ProblemView::from).collect())
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<ProblemView>> {
    let rows = state.queries.search(&query.q).await;
    Json(rows.into_iter().map(ProblemView::from).collect())
}

async fn problem_detail_handler(
    State(state): State<Arc<AppState>>,
    Path((contest_id, index)): Path<(i32, String)>,
) -> Response {
    match state.queries.problem_by_code(contest_id, &index).await {
        Some(record) => Json(ProblemView::from(record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "problem not found",
                "code": format!("{contest_id}{index}"),
            })),
        )
            .into_response(),
    }
}

async fn ratings_handler(State(state): State<Arc<AppState>>) -> Json<Vec<i32>> {
    Json(state.queries.available_ratings().await)
}

async fn topics_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.queries.available_topics().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::seeded_store;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn seeded_app() -> Router {
        app(AppState::new(Arc::new(seeded_store().await)))
    }

    #[tokio::test]
    async fn problems_endpoint_applies_filters() {
        let (status, body) = get_json(seeded_app().await, "/problems?rating=800&topic=math").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["full_code"], "1A");
        assert_eq!(rows[0]["url"], "https://codeforces.com/problemset/problem/1/A");
        assert_eq!(rows[1]["full_code"], "2A");
    }

    #[tokio::test]
    async fn bad_rating_is_rejected() {
        let resp = seeded_app()
            .await
            .oneshot(Request::builder().uri("/problems?rating=hard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_endpoint_matches_full_code() {
        let (status, body) = get_json(seeded_app().await, "/problems/search?q=1B").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Greedy Walk");
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detail_endpoint_returns_404_json() {
        let app = seeded_app().await;
        let (status, body) = get_json(app.clone(), "/problems/3/C1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rating"], serde_json::Value::Null);
        assert_eq!(body["topics"], json!(["dp"]));

        let (status, body) = get_json(app, "/problems/9/Z").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "9Z");
    }

    #[tokio::test]
    async fn ratings_topics_and_health() {
        let app = seeded_app().await;
        let (_, ratings) = get_json(app.clone(), "/ratings").await;
        assert_eq!(ratings, json!([800, 1200]));
        let (_, topics) = get_json(app.clone(), "/topics").await;
        assert_eq!(topics, json!(["dp", "greedy", "implementation", "math"]));
        let (status, health) = get_json(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["catalog"]["problems"], 4);
    }
}
