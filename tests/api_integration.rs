//! Integration tests for the HTTP surface.
//!
//! Each test builds the router over an in-memory database and drives it
//! with `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use job_tracker::api::{ApiState, routes};
use job_tracker::applications::Application;
use job_tracker::classifier::Classifier;
use job_tracker::error::MailError;
use job_tracker::followup::{FollowUpPolicy, FollowUpScheduler};
use job_tracker::mail::Mailer;
use job_tracker::responses::ResponseTracker;
use job_tracker::store::{ApplicationStore, LibSqlBackend};

#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

async fn app() -> (Router, Arc<dyn ApplicationStore>, Arc<StubMailer>) {
    let store: Arc<dyn ApplicationStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailer = Arc::new(StubMailer::default());
    let scheduler = Arc::new(FollowUpScheduler::new(
        store.clone(),
        mailer.clone(),
        FollowUpPolicy::default(),
    ));
    let tracker = Arc::new(ResponseTracker::new(store.clone(), Classifier::new()));
    let router = routes(ApiState {
        store: store.clone(),
        scheduler,
        tracker,
        classifier: Classifier::new(),
    });
    (router, store, mailer)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_ok() {
    let (router, _, _) = app().await;
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_then_fetch_application() {
    let (router, _, _) = app().await;
    let (status, created) = send(
        &router,
        "POST",
        "/api/applications",
        Some(json!({
            "company": "Acme",
            "position": "Backend Engineer",
            "contact_email": "hr@acme.com"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "applied");
    assert_eq!(created["follow_ups_sent"], 0);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&router, "GET", &format!("/api/applications/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["application"]["company"], "Acme");
    assert_eq!(fetched["emails"], json!([]));

    let (status, list) = send(&router, "GET", "/api/applications?status=applied", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_requires_company_and_position() {
    let (router, _, _) = app().await;
    let (status, body) = send(
        &router,
        "POST",
        "/api/applications",
        Some(json!({ "company": " ", "position": "Engineer" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("required"));
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let (router, _, _) = app().await;
    let (status, _) = send(
        &router,
        "GET",
        &format!("/api/applications/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, "GET", "/api/applications/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "GET", "/api/applications?status=hired", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn dry_run_lists_flagged_without_writing() {
    let (router, store, _) = app().await;
    let due = Application::new("Acme", "Engineer", Utc::now() - Duration::days(10))
        .with_contact("hr@acme.com");
    store.insert_application(&due).await.unwrap();

    let (status, body) = send(&router, "POST", "/api/followups/run?dry_run=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"]["dry_run"], true);
    assert_eq!(body["policy"]["checked"], 1);
    assert_eq!(
        body["policy"]["flagged"][0]["application_id"],
        due.id.to_string()
    );
    assert!(body.get("dispatch").is_none());

    let stored = store.get_application(due.id).await.unwrap().unwrap();
    assert!(!stored.followup_sent);
}

#[tokio::test]
async fn mark_sent_endpoint() {
    let (router, store, _) = app().await;
    let mut queued = Application::new("Acme", "Engineer", Utc::now() - Duration::days(10));
    queued.followup_sent = true;
    store.insert_application(&queued).await.unwrap();

    let uri = format!("/api/followups/{}/sent", queued.id);
    let (status, body) = send(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["follow_ups_sent"], 1);
    assert_eq!(body["followup_sent"], false);

    let (status, body) = send(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"]["kind"], "not_queued");
}

#[tokio::test]
async fn classify_endpoint() {
    let (router, _, _) = app().await;
    let (status, body) = send(
        &router,
        "POST",
        "/api/emails/classify",
        Some(json!({
            "subject": "Interview Invitation",
            "body": "schedule a zoom call to discuss next steps"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "interview");
    assert_eq!(body["action_required"], true);
}

#[tokio::test]
async fn process_endpoint_records_response_once() {
    let (router, store, _) = app().await;
    let app = Application::new("Acme", "Engineer", Utc::now() - Duration::days(10))
        .with_contact("hr@acme.com");
    store.insert_application(&app).await.unwrap();

    let email = json!({
        "message_id": "<reply-1@acme.com>",
        "from_address": "Jane <hr@acme.com>",
        "subject": "Thank you for your application",
        "body": "we have decided to move forward with other candidates, best of luck"
    });
    let (status, body) = send(&router, "POST", "/api/emails/process", Some(email.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["classification"]["category"], "rejection");
    assert_eq!(body["outcome"]["kind"], "responded");
    assert_eq!(body["outcome"]["status"], "rejected");

    let (_, again) = send(&router, "POST", "/api/emails/process", Some(email)).await;
    assert_eq!(again["outcome"]["kind"], "duplicate");

    let stored = store.get_application(app.id).await.unwrap().unwrap();
    assert!(stored.response_received);
}
