//! Job status reporting.
//!
//! A [`StatusBoard`] holds one entry per job. Running code updates its entry
//! through a [`JobHandle`]; [`StatusServer`] publishes the board as JSON over
//! HTTP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reelkit_common::error::{ReelkitError, ReelkitResult};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, ToSocketAddrs};

pub const STATUS_PATH: &str = "/api/v1/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    FinishedOk,
    FinishedError,
    FinishedCancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::FinishedOk | JobStatus::FinishedError | JobStatus::FinishedCancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    /// Fraction done in `[0, 1]`; `None` while unknown.
    pub progress: Option<f64>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub jobs: Vec<JobReport>,
}

fn lock(report: &Mutex<JobReport>) -> MutexGuard<'_, JobReport> {
    report
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of jobs.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    jobs: Arc<Mutex<Vec<Arc<Mutex<JobReport>>>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>) -> JobHandle {
        let report = Arc::new(Mutex::new(JobReport {
            name: name.into(),
            progress: None,
            status: JobStatus::Pending,
            started_at: None,
            error: None,
        }));
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report.clone());
        JobHandle { report }
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|r| lock(r).clone())
            .collect()
    }
}

/// Updates one job's entry on a [`StatusBoard`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    report: Arc<Mutex<JobReport>>,
}

impl JobHandle {
    pub fn report(&self) -> JobReport {
        lock(&self.report).clone()
    }

    pub fn start(&self) {
        let mut report = lock(&self.report);
        if report.status == JobStatus::Pending {
            report.status = JobStatus::Running;
            report.started_at = Some(Utc::now());
        }
    }

    /// Raise progress to `fraction`; lower values and updates after the job
    /// has finished are ignored.
    pub fn set_progress(&self, fraction: f64) {
        let mut report = lock(&self.report);
        if report.status.is_finished() || !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if report.progress.map_or(true, |p| fraction > p) {
            report.progress = Some(fraction);
        }
    }

    pub fn finish_ok(&self) {
        let mut report = lock(&self.report);
        if !report.status.is_finished() {
            report.status = JobStatus::FinishedOk;
            report.progress = Some(1.0);
        }
    }

    /// Record an error; progress stays where it was.
    pub fn fail(&self, error: impl Into<String>) {
        let mut report = lock(&self.report);
        if !report.status.is_finished() {
            report.status = JobStatus::FinishedError;
            report.error = Some(error.into());
        }
    }

    pub fn cancelled(&self) {
        let mut report = lock(&self.report);
        if !report.status.is_finished() {
            report.status = JobStatus::FinishedCancelled;
        }
    }
}

/// Routes for the status surface: [`STATUS_PATH`], or `/?action=status`.
pub fn router(board: StatusBoard) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .route("/", get(action))
        .fallback(not_found)
        .with_state(board)
}

async fn status(State(board): State<StatusBoard>) -> Json<StatusResponse> {
    Json(StatusResponse {
        jobs: board.reports(),
    })
}

#[derive(Debug, Deserialize)]
struct ActionQuery {
    action: Option<String>,
}

async fn action(State(board): State<StatusBoard>, Query(query): Query<ActionQuery>) -> Response {
    if query.action.as_deref() == Some("status") {
        status(State(board)).await.into_response()
    } else {
        not_found().await.into_response()
    }
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not found" })),
    )
}

/// Serves a [`StatusBoard`] over HTTP.
pub struct StatusServer {
    listener: TcpListener,
    board: StatusBoard,
}

impl StatusServer {
    pub async fn bind(addr: impl ToSocketAddrs, board: StatusBoard) -> ReelkitResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, board })
    }

    pub fn local_addr(&self) -> ReelkitResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the task is dropped.
    pub async fn run(self) -> ReelkitResult<()> {
        tracing::info!(addr = %self.local_addr()?, "Status server listening");
        axum::serve(self.listener, router(self.board)).await?;
        Ok(())
    }
}

/// Fetch the board from a status server at `addr` (`host:port`).
pub async fn fetch_status(addr: &str) -> ReelkitResult<Vec<JobReport>> {
    let url = format!("http://{addr}{STATUS_PATH}");
    let response = reqwest::get(&url)
        .await
        .map_err(|e| ReelkitError::remote(format!("{url}: {e}")))?;
    let code = response.status();
    if !code.is_success() {
        return Err(ReelkitError::remote(format!(
            "status server answered {code}"
        )));
    }
    let body: StatusResponse = response
        .json()
        .await
        .map_err(|e| ReelkitError::remote(format!("malformed status response: {e}")))?;
    Ok(body.jobs)
}
