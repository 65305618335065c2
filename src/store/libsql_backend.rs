//! libSQL backend: async `ApplicationStore` implementation.
//!
//! Supports local file and in-memory databases. SQLite is single-writer;
//! every mutation here is one statement or one transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applications::{Application, ApplicationFilter, ApplicationStatus, ApplicationUpdate};
use crate::classifier::ResponseCategory;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ApplicationStore, TrackedEmail};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_text_owned(s: Option<String>) -> Value {
    match s {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> Value {
    opt_text_owned(dt.map(|d| d.to_rfc3339()))
}

fn bool_value(b: bool) -> Value {
    Value::Integer(i64::from(b))
}

const APPLICATION_COLUMNS: &str = "id, company, position, contact_email, applied_date, status, \
     response_received, response_date, response_type, follow_ups_sent, followup_sent, \
     last_follow_up, next_follow_up_scheduled, dispatch_attempts, last_dispatch_error, \
     created_at, updated_at";

const EMAIL_COLUMNS: &str = "message_id, application_id, from_address, subject, category, \
     confidence, action_required, received_date, processed_at";

/// Map a libsql Row to an Application. Column order matches APPLICATION_COLUMNS.
fn row_to_application(row: &libsql::Row) -> Result<Application, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let id_str: String = row.get(0).map_err(get_err)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("bad application id {id_str}: {e}")))?;
    let status_str: String = row.get(5).map_err(get_err)?;
    let status: ApplicationStatus = status_str
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let response_type = match row.get::<String>(8).ok() {
        Some(raw) => Some(
            raw.parse::<ResponseCategory>()
                .map_err(DatabaseError::Serialization)?,
        ),
        None => None,
    };
    let applied_str: String = row.get(4).map_err(get_err)?;
    let created_str: String = row.get(15).map_err(get_err)?;
    let updated_str: String = row.get(16).map_err(get_err)?;

    Ok(Application {
        id,
        company: row.get(1).map_err(get_err)?,
        position: row.get(2).map_err(get_err)?,
        contact_email: row.get(3).ok(),
        applied_date: parse_datetime(&applied_str),
        status,
        response_received: row.get::<i64>(6).map_err(get_err)? != 0,
        response_date: parse_optional_datetime(&row.get(7).ok()),
        response_type,
        follow_ups_sent: row.get::<i64>(9).map_err(get_err)?.max(0) as u32,
        followup_sent: row.get::<i64>(10).map_err(get_err)? != 0,
        last_follow_up: parse_optional_datetime(&row.get(11).ok()),
        next_follow_up_scheduled: parse_optional_datetime(&row.get(12).ok()),
        dispatch_attempts: row.get::<i64>(13).map_err(get_err)?.max(0) as u32,
        last_dispatch_error: row.get(14).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a TrackedEmail. Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<TrackedEmail, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let application_id = match row.get::<String>(1).ok() {
        Some(raw) => Some(
            Uuid::parse_str(&raw)
                .map_err(|e| DatabaseError::Serialization(format!("bad application id: {e}")))?,
        ),
        None => None,
    };
    let category_str: String = row.get(4).map_err(get_err)?;
    let received_str: String = row.get(7).map_err(get_err)?;
    let processed_str: String = row.get(8).map_err(get_err)?;

    Ok(TrackedEmail {
        message_id: row.get(0).map_err(get_err)?,
        application_id,
        from_address: row.get(2).map_err(get_err)?,
        subject: row.get(3).map_err(get_err)?,
        category: category_str
            .parse()
            .map_err(DatabaseError::Serialization)?,
        confidence: row.get(5).map_err(get_err)?,
        action_required: row.get::<i64>(6).map_err(get_err)? != 0,
        received_date: parse_datetime(&received_str),
        processed_at: parse_datetime(&processed_str),
    })
}

/// Build the guarded UPDATE statement for one application.
fn update_statement(id: Uuid, update: &ApplicationUpdate) -> (String, Vec<Value>) {
    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = update.status {
        sets.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(received) = update.response_received {
        sets.push("response_received = ?");
        values.push(bool_value(received));
    }
    if let Some(date) = update.response_date {
        sets.push("response_date = ?");
        values.push(opt_datetime(date));
    }
    if let Some(kind) = update.response_type {
        sets.push("response_type = ?");
        values.push(opt_text_owned(kind.map(|k| k.as_str().to_string())));
    }
    if let Some(count) = update.follow_ups_sent {
        sets.push("follow_ups_sent = ?");
        values.push(Value::Integer(i64::from(count)));
    }
    if let Some(queued) = update.followup_sent {
        sets.push("followup_sent = ?");
        values.push(bool_value(queued));
    }
    if let Some(last) = update.last_follow_up {
        sets.push("last_follow_up = ?");
        values.push(opt_datetime(last));
    }
    if let Some(next) = update.next_follow_up_scheduled {
        sets.push("next_follow_up_scheduled = ?");
        values.push(opt_datetime(next));
    }
    if let Some(attempts) = update.dispatch_attempts {
        sets.push("dispatch_attempts = ?");
        values.push(Value::Integer(i64::from(attempts)));
    }
    if let Some(ref error) = update.last_dispatch_error {
        sets.push("last_dispatch_error = ?");
        values.push(opt_text_owned(error.clone()));
    }
    if let Some(ref contact) = update.contact_email {
        sets.push("contact_email = ?");
        values.push(opt_text_owned(contact.clone()));
    }
    sets.push("updated_at = ?");
    values.push(Value::Text(Utc::now().to_rfc3339()));

    let mut sql = format!("UPDATE applications SET {} WHERE id = ?", sets.join(", "));
    values.push(Value::Text(id.to_string()));

    if let Some(expected) = update.expect_followup_sent {
        sql.push_str(" AND followup_sent = ?");
        values.push(bool_value(expected));
    }
    if let Some(expected) = update.expect_follow_ups_sent {
        sql.push_str(" AND follow_ups_sent = ?");
        values.push(Value::Integer(i64::from(expected)));
    }
    if let Some(expected) = update.expect_response_received {
        sql.push_str(" AND response_received = ?");
        values.push(bool_value(expected));
    }
    match update.expect_next_follow_up_scheduled {
        Some(Some(expected)) => {
            sql.push_str(" AND next_follow_up_scheduled = ?");
            values.push(Value::Text(expected.to_rfc3339()));
        }
        Some(None) => sql.push_str(" AND next_follow_up_scheduled IS NULL"),
        None => {}
    }

    (sql, values)
}

/// Build the SELECT for a list filter.
fn list_statement(filter: &ApplicationFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.statuses.is_empty() {
        let placeholders = vec!["?"; filter.statuses.len()].join(", ");
        clauses.push(format!("status IN ({placeholders})"));
        values.extend(
            filter
                .statuses
                .iter()
                .map(|s| Value::Text(s.as_str().to_string())),
        );
    }
    if let Some(queued) = filter.followup_sent {
        clauses.push("followup_sent = ?".to_string());
        values.push(bool_value(queued));
    }
    if let Some(received) = filter.response_received {
        clauses.push("response_received = ?".to_string());
        values.push(bool_value(received));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    (
        format!("SELECT {APPLICATION_COLUMNS} FROM applications{where_clause} ORDER BY applied_date ASC"),
        values,
    )
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ApplicationStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_application(&self, app: &Application) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO applications ({APPLICATION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            vec![
                Value::Text(app.id.to_string()),
                Value::Text(app.company.clone()),
                Value::Text(app.position.clone()),
                opt_text_owned(app.contact_email.clone()),
                Value::Text(app.applied_date.to_rfc3339()),
                Value::Text(app.status.as_str().to_string()),
                bool_value(app.response_received),
                opt_datetime(app.response_date),
                opt_text_owned(app.response_type.map(|k| k.as_str().to_string())),
                Value::Integer(i64::from(app.follow_ups_sent)),
                bool_value(app.followup_sent),
                opt_datetime(app.last_follow_up),
                opt_datetime(app.next_follow_up_scheduled),
                Value::Integer(i64::from(app.dispatch_attempts)),
                opt_text_owned(app.last_dispatch_error.clone()),
                Value::Text(app.created_at.to_rfc3339()),
                Value::Text(app.updated_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Constraint(format!("application {} already exists", app.id))
            } else {
                DatabaseError::Query(format!("insert_application: {msg}"))
            }
        })?;

        debug!(id = %app.id, company = %app.company, "Application inserted");
        Ok(())
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<Application>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_application: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_application(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_application: {e}"))),
        }
    }

    async fn list_applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, DatabaseError> {
        let (sql, values) = list_statement(filter);
        let conn = self.conn();
        let mut rows = conn
            .query(&sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("list_applications: {e}")))?;

        let mut apps = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_application(&row) {
                    Ok(app) => apps.push(app),
                    Err(e) => warn!("Skipping application row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_applications: {e}"))),
            }
        }
        Ok(apps)
    }

    async fn update_application(
        &self,
        id: Uuid,
        update: &ApplicationUpdate,
    ) -> Result<bool, DatabaseError> {
        let (sql, values) = update_statement(id, update);
        let changed = self
            .conn()
            .execute(&sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("update_application: {e}")))?;

        debug!(id = %id, changed, "Application update applied");
        Ok(changed > 0)
    }

    async fn update_applications(
        &self,
        updates: &[(Uuid, ApplicationUpdate)],
    ) -> Result<Vec<Uuid>, DatabaseError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin batch: {e}")))?;

        let mut written = Vec::new();
        for (id, update) in updates {
            let (sql, values) = update_statement(*id, update);
            match tx.execute(&sql, values).await {
                Ok(0) => {}
                Ok(_) => written.push(*id),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Batch rollback failed");
                    }
                    return Err(DatabaseError::Query(format!("batch update {id}: {e}")));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit batch: {e}")))?;

        debug!(
            requested = updates.len(),
            written = written.len(),
            "Application batch committed"
        );
        Ok(written)
    }

    async fn record_email(&self, email: &TrackedEmail) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO email_tracking ({EMAIL_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                vec![
                    Value::Text(email.message_id.clone()),
                    opt_text_owned(email.application_id.map(|id| id.to_string())),
                    Value::Text(email.from_address.clone()),
                    Value::Text(email.subject.clone()),
                    Value::Text(email.category.as_str().to_string()),
                    Value::Real(email.confidence),
                    bool_value(email.action_required),
                    Value::Text(email.received_date.to_rfc3339()),
                    Value::Text(email.processed_at.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_email: {e}")))?;

        Ok(inserted > 0)
    }

    async fn has_email(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM email_tracking WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_email: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_email: {e}"))),
        }
    }

    async fn list_emails(&self, application_id: Uuid) -> Result<Vec<TrackedEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM email_tracking WHERE application_id = ?1 \
                     ORDER BY received_date DESC"
                ),
                params![application_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => warn!("Skipping email row: {e}"),
            }
        }
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_app(company: &str, days_ago: i64) -> Application {
        Application::new(company, "Backend Engineer", Utc::now() - Duration::days(days_ago))
            .with_contact(format!("jobs@{}.com", company.to_lowercase()))
    }

    fn tracked(message_id: &str, application_id: Option<Uuid>) -> TrackedEmail {
        TrackedEmail {
            message_id: message_id.into(),
            application_id,
            from_address: "jane@acme.com".into(),
            subject: "Interview Invitation".into(),
            category: ResponseCategory::Interview,
            confidence: 0.3,
            action_required: true,
            received_date: Utc::now(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let db = test_db().await;
        let mut app = make_app("Acme", 10);
        app.response_type = Some(ResponseCategory::InfoRequest);
        app.next_follow_up_scheduled = Some(Utc::now());
        db.insert_application(&app).await.unwrap();

        let loaded = db.get_application(app.id).await.unwrap().expect("present");
        assert_eq!(loaded.id, app.id);
        assert_eq!(loaded.company, "Acme");
        assert_eq!(loaded.contact_email.as_deref(), Some("jobs@acme.com"));
        assert_eq!(loaded.status, ApplicationStatus::Applied);
        assert_eq!(loaded.response_type, Some(ResponseCategory::InfoRequest));
        assert_eq!(loaded.applied_date.timestamp(), app.applied_date.timestamp());
        assert!(loaded.next_follow_up_scheduled.is_some());
        assert!(loaded.last_follow_up.is_none());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let db = test_db().await;
        assert!(db.get_application(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_constraint_error() {
        let db = test_db().await;
        let app = make_app("Acme", 1);
        db.insert_application(&app).await.unwrap();
        let err = db.insert_application(&app).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_flag() {
        let db = test_db().await;
        let applied = make_app("Acme", 10);
        let mut queued = make_app("Globex", 9);
        queued.followup_sent = true;
        let rejected = make_app("Initech", 8).with_status(ApplicationStatus::Rejected);
        for app in [&applied, &queued, &rejected] {
            db.insert_application(app).await.unwrap();
        }

        let all = db.list_applications(&ApplicationFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);
        // Oldest application first.
        assert_eq!(all[0].id, applied.id);

        let awaiting = db
            .list_applications(&ApplicationFilter {
                statuses: vec![ApplicationStatus::Applied, ApplicationStatus::Ready],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 2);

        let pending = db.list_applications(&ApplicationFilter::queued()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, queued.id);
    }

    #[tokio::test]
    async fn guarded_update_applies_once() {
        let db = test_db().await;
        let app = make_app("Acme", 10);
        db.insert_application(&app).await.unwrap();

        let queue = ApplicationUpdate {
            followup_sent: Some(true),
            next_follow_up_scheduled: Some(Some(Utc::now() + Duration::days(1))),
            expect_followup_sent: Some(false),
            ..Default::default()
        };
        assert!(db.update_application(app.id, &queue).await.unwrap());
        assert!(!db.update_application(app.id, &queue).await.unwrap());

        let loaded = db.get_application(app.id).await.unwrap().unwrap();
        assert!(loaded.followup_sent);
    }

    #[tokio::test]
    async fn schedule_guard_matches_stored_instant() {
        let db = test_db().await;
        let mut app = make_app("Acme", 10);
        app.followup_sent = true;
        app.next_follow_up_scheduled = Some(Utc::now() - Duration::minutes(5));
        db.insert_application(&app).await.unwrap();

        let stored = db.get_application(app.id).await.unwrap().unwrap();
        let claim = ApplicationUpdate {
            next_follow_up_scheduled: Some(Some(Utc::now() + Duration::hours(1))),
            expect_next_follow_up_scheduled: Some(stored.next_follow_up_scheduled),
            ..Default::default()
        };
        assert!(db.update_application(app.id, &claim).await.unwrap());
        assert!(!db.update_application(app.id, &claim).await.unwrap());

        let unscheduled = ApplicationUpdate {
            dispatch_attempts: Some(1),
            expect_next_follow_up_scheduled: Some(None),
            ..Default::default()
        };
        assert!(!db.update_application(app.id, &unscheduled).await.unwrap());
    }

    #[tokio::test]
    async fn update_clears_nullable_columns() {
        let db = test_db().await;
        let mut app = make_app("Acme", 10);
        app.next_follow_up_scheduled = Some(Utc::now());
        db.insert_application(&app).await.unwrap();

        let update = ApplicationUpdate {
            next_follow_up_scheduled: Some(None),
            last_dispatch_error: Some(Some("smtp timeout".into())),
            ..Default::default()
        };
        assert!(db.update_application(app.id, &update).await.unwrap());

        let loaded = db.get_application(app.id).await.unwrap().unwrap();
        assert!(loaded.next_follow_up_scheduled.is_none());
        assert_eq!(loaded.last_dispatch_error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn update_missing_row_returns_false() {
        let db = test_db().await;
        let update = ApplicationUpdate {
            followup_sent: Some(true),
            ..Default::default()
        };
        assert!(!db.update_application(Uuid::new_v4(), &update).await.unwrap());
    }

    #[tokio::test]
    async fn batch_update_reports_written_rows() {
        let db = test_db().await;
        let a = make_app("Acme", 10);
        let mut b = make_app("Globex", 10);
        b.followup_sent = true;
        db.insert_application(&a).await.unwrap();
        db.insert_application(&b).await.unwrap();

        let queue = ApplicationUpdate {
            followup_sent: Some(true),
            expect_followup_sent: Some(false),
            ..Default::default()
        };
        let written = db
            .update_applications(&[(a.id, queue.clone()), (b.id, queue)])
            .await
            .unwrap();
        assert_eq!(written, vec![a.id]);
        assert!(db.update_applications(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_update_rolls_back_on_failure() {
        let db = test_db().await;
        let a = make_app("Acme", 10);
        let b = make_app("Globex", 10);
        db.insert_application(&a).await.unwrap();
        db.insert_application(&b).await.unwrap();

        db.conn()
            .execute_batch(&format!(
                "CREATE TRIGGER reject_globex BEFORE UPDATE ON applications \
                 WHEN NEW.id = '{}' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                b.id
            ))
            .await
            .unwrap();

        let queue = ApplicationUpdate {
            followup_sent: Some(true),
            expect_followup_sent: Some(false),
            ..Default::default()
        };
        let err = db
            .update_applications(&[(a.id, queue.clone()), (b.id, queue)])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));

        let first = db.get_application(a.id).await.unwrap().unwrap();
        assert!(!first.followup_sent);
    }

    #[tokio::test]
    async fn record_email_dedupes_by_message_id() {
        let db = test_db().await;
        let app = make_app("Acme", 10);
        db.insert_application(&app).await.unwrap();

        assert!(db.record_email(&tracked("<m1@acme.com>", Some(app.id))).await.unwrap());
        assert!(!db.record_email(&tracked("<m1@acme.com>", Some(app.id))).await.unwrap());
        assert!(db.record_email(&tracked("<m2@acme.com>", None)).await.unwrap());

        assert!(db.has_email("<m1@acme.com>").await.unwrap());
        assert!(!db.has_email("<m3@acme.com>").await.unwrap());

        let emails = db.list_emails(app.id).await.unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].category, ResponseCategory::Interview);
        assert!(emails[0].action_required);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = test_db().await;
        db.init_schema().await.unwrap();
        let version = migrations::get_current_version(db.conn()).await.unwrap();
        assert_eq!(version, migrations::latest_version());
    }

    #[tokio::test]
    async fn file_database_persists_across_opens() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("tracker.db");
        let app = make_app("Acme", 3);
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_application(&app).await.unwrap();
        }
        assert!(path.exists());

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.get_application(app.id).await.unwrap().is_some());
    }

    #[test]
    fn update_statement_appends_guards() {
        let id = Uuid::new_v4();
        let (sql, values) = update_statement(
            id,
            &ApplicationUpdate {
                follow_ups_sent: Some(2),
                expect_followup_sent: Some(true),
                expect_follow_ups_sent: Some(1),
                ..Default::default()
            },
        );
        assert!(sql.starts_with("UPDATE applications SET follow_ups_sent = ?, updated_at = ?"));
        assert!(sql.ends_with("WHERE id = ? AND followup_sent = ? AND follow_ups_sent = ?"));
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn parse_datetime_accepts_sqlite_format() {
        let dt = parse_datetime("2026-01-05 10:30:00");
        assert_eq!(dt.to_rfc3339(), "2026-01-05T10:30:00+00:00");
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
    }
}
