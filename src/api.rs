//! HTTP endpoints for applications, follow-ups and email processing.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};
use uuid::Uuid;

use crate::applications::{Application, ApplicationFilter, ApplicationStatus};
use crate::classifier::Classifier;
use crate::error::Error;
use crate::followup::{FollowUpReason, FollowUpScheduler, MarkSentOutcome};
use crate::mail::EmailMessage;
use crate::responses::ResponseTracker;
use crate::store::ApplicationStore;

type ApiResponse = (StatusCode, Json<Value>);

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ApplicationStore>,
    pub scheduler: Arc<FollowUpScheduler>,
    pub tracker: Arc<ResponseTracker>,
    pub classifier: Classifier,
}

/// Build the router.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/applications",
            get(list_applications).post(create_application),
        )
        .route("/api/applications/{id}", get(get_application))
        .route("/api/followups/run", post(run_followups))
        .route("/api/followups/{id}/sent", post(mark_sent))
        .route("/api/emails/classify", post(classify_email))
        .route("/api/emails/process", post(process_email))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

fn internal_error(e: Error) -> ApiResponse {
    error!(error = %e, "Request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn parse_id(id: &str) -> Result<Uuid, ApiResponse> {
    Uuid::parse_str(id)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid application ID"))
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "job-tracker"
    }))
}

// ── Applications ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_applications(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResponse {
    let mut filter = ApplicationFilter::all();
    if let Some(raw) = query.status {
        match raw.parse::<ApplicationStatus>() {
            Ok(status) => filter.statuses.push(status),
            Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, e),
        }
    }

    match state.store.list_applications(&filter).await {
        Ok(apps) => (StatusCode::OK, Json(json!(apps))),
        Err(e) => internal_error(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct NewApplication {
    company: String,
    position: String,
    contact_email: Option<String>,
    applied_date: Option<DateTime<Utc>>,
    status: Option<ApplicationStatus>,
}

async fn create_application(
    State(state): State<ApiState>,
    Json(req): Json<NewApplication>,
) -> ApiResponse {
    if req.company.trim().is_empty() || req.position.trim().is_empty() {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "company and position are required",
        );
    }

    let mut app = Application::new(
        req.company.trim(),
        req.position.trim(),
        req.applied_date.unwrap_or_else(Utc::now),
    );
    app.contact_email = req.contact_email.filter(|c| !c.trim().is_empty());
    if let Some(status) = req.status {
        app.status = status;
    }

    match state.store.insert_application(&app).await {
        Ok(()) => {
            info!(id = %app.id, company = %app.company, "Application created");
            (StatusCode::CREATED, Json(json!(app)))
        }
        Err(e) => internal_error(e.into()),
    }
}

async fn get_application(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let app = match state.store.get_application(id).await {
        Ok(Some(app)) => app,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Application not found"),
        Err(e) => return internal_error(e.into()),
    };

    match state.store.list_emails(id).await {
        Ok(emails) => (
            StatusCode::OK,
            Json(json!({ "application": app, "emails": emails })),
        ),
        Err(e) => internal_error(e.into()),
    }
}

// ── Follow-ups ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunParams {
    dry_run: bool,
    dispatch: bool,
}

async fn run_followups(
    State(state): State<ApiState>,
    Query(params): Query<RunParams>,
) -> ApiResponse {
    let now = Utc::now();
    let pass = match state.scheduler.run_policy_pass(now, params.dry_run).await {
        Ok(report) => report,
        Err(e) => return internal_error(e),
    };

    if params.dispatch && !params.dry_run {
        match state.scheduler.dispatch_due(now).await {
            Ok(dispatch) => (
                StatusCode::OK,
                Json(json!({ "policy": pass, "dispatch": dispatch })),
            ),
            Err(e) => internal_error(e),
        }
    } else {
        (StatusCode::OK, Json(json!({ "policy": pass })))
    }
}

async fn mark_sent(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.scheduler.mark_sent(id, Utc::now()).await {
        Ok(MarkSentOutcome::Sent(app)) => (StatusCode::OK, Json(json!(app))),
        Ok(MarkSentOutcome::NotEligible(FollowUpReason::NotFound)) => {
            error_response(StatusCode::NOT_FOUND, "Application not found")
        }
        Ok(MarkSentOutcome::NotEligible(reason)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": reason.to_string(), "reason": reason })),
        ),
        Err(e) => internal_error(e),
    }
}

// ── Email ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

async fn classify_email(
    State(state): State<ApiState>,
    Json(req): Json<ClassifyRequest>,
) -> ApiResponse {
    let classification = state.classifier.classify(&req.subject, &req.body);
    (StatusCode::OK, Json(json!(classification)))
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    message_id: Option<String>,
    from_address: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    received_date: Option<DateTime<Utc>>,
}

async fn process_email(
    State(state): State<ApiState>,
    Json(req): Json<ProcessRequest>,
) -> ApiResponse {
    let now = Utc::now();
    let email = EmailMessage {
        message_id: req
            .message_id
            .unwrap_or_else(|| format!("<{}@job-tracker>", Uuid::new_v4())),
        from_address: req.from_address,
        subject: req.subject,
        body: req.body,
        received_date: req.received_date.unwrap_or(now),
    };

    match state.tracker.process(&email, now).await {
        Ok(processed) => (StatusCode::OK, Json(json!(processed))),
        Err(e) => internal_error(e),
    }
}
