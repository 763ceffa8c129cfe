// =============================================================================
// Burrow Backend - Reports & Report Types
// =============================================================================
// The report workflow: users flag a post or comment citing a thread-defined
// reason, moderators drive the report through a single PENDING -> terminal
// transition that mutates the target's moderation flags and counters. All
// reads and writes of one operation share a transaction; the "one open
// report per reporter/target" rule lives in a partial unique index, not in
// application code.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::db::{Comment, Database, Post, Thread, User};
use crate::error::ApiError;
use crate::notifications::{notify, notify_bulk, NotifType};
use crate::roles::require_admin_or_moderator;
use crate::AppState;

/// Report lifecycle states. RESOLVED and REJECTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Rejected,
}

/// Content-state change applied when resolving a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportAction {
    Locked,
    Unlocked,
    Removed,
    Skipped,
}

/// A thread-defined reason a report can cite. Unique per (thread, name).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReportType {
    pub id: String,
    pub thread_id: String,
    pub name: String,
    pub description: Option<String>,
}

/// A user's flag of a post or comment. `comment_id` null means the report
/// targets the post itself. `action` is null exactly while PENDING.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Report {
    pub id: String,
    pub reporter_id: String,
    pub post_id: String,
    pub comment_id: Option<String>,
    pub reporter_comment: Option<String>,
    pub report_type_id: String,
    pub status: ReportStatus,
    pub action: Option<ReportAction>,
    pub mod_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Request Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportTypeAdd {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewReportRequest {
    pub report_type_id: String,
    #[serde(rename = "comment")]
    pub reporter_comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: ReportStatus,
    pub action: ReportAction,
    pub mod_comment: Option<String>,
    #[serde(default)]
    pub disable_reports: bool,
}

// -----------------------------------------------------------------------------
// Queries
// -----------------------------------------------------------------------------

impl Database {
    /// Find a report type by ID.
    pub async fn find_report_type_by_id(&self, id: &str) -> Result<Option<ReportType>, sqlx::Error> {
        sqlx::query_as::<_, ReportType>("SELECT * FROM report_types WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }

    /// List a thread's report types.
    pub async fn list_report_types(&self, thread_id: &str) -> Result<Vec<ReportType>, sqlx::Error> {
        sqlx::query_as::<_, ReportType>(
            "SELECT * FROM report_types WHERE thread_id = ? ORDER BY name",
        )
        .bind(thread_id)
        .fetch_all(self.pool())
        .await
    }

    /// Find a report by ID.
    pub async fn find_report_by_id(&self, id: &str) -> Result<Option<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }

    /// Find the reporter's open (PENDING) report against a target.
    pub async fn find_open_report(
        &self,
        reporter_id: &str,
        post_id: &str,
        comment_id: Option<&str>,
    ) -> Result<Option<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            r#"
            SELECT * FROM reports
            WHERE reporter_id = ? AND post_id = ? AND COALESCE(comment_id, '') = COALESCE(?, '')
              AND status = 'PENDING'
            "#,
        )
        .bind(reporter_id)
        .bind(post_id)
        .bind(comment_id)
        .fetch_optional(self.pool())
        .await
    }

    /// List reports against a post itself (not its comments), newest first.
    pub async fn list_post_reports(&self, post_id: &str) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            r#"
            SELECT * FROM reports
            WHERE post_id = ? AND comment_id IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
    }

    /// List reports against a comment, newest first.
    pub async fn list_comment_reports(&self, comment_id: &str) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE comment_id = ? ORDER BY created_at DESC",
        )
        .bind(comment_id)
        .fetch_all(self.pool())
        .await
    }

    /// List a user's submitted reports, newest first.
    pub async fn list_reports_by_reporter(&self, reporter_id: &str) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE reporter_id = ? ORDER BY created_at DESC",
        )
        .bind(reporter_id)
        .fetch_all(self.pool())
        .await
    }

    /// Count PENDING reports citing a report type.
    pub async fn count_open_reports_for_type(&self, type_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reports WHERE report_type_id = ? AND status = 'PENDING'",
        )
        .bind(type_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}

// -----------------------------------------------------------------------------
// Report-Type Catalog Operations
// -----------------------------------------------------------------------------

/// Bulk-insert report types for a thread, rejecting any name the thread
/// already uses (or that appears twice in the batch).
pub async fn add_report_types(
    db: &Database,
    thread: &Thread,
    items: Vec<ReportTypeAdd>,
) -> Result<Vec<ReportType>, ApiError> {
    if items.is_empty() {
        return Err(ApiError::BadRequest("No report types given".into()));
    }
    for item in &items {
        if item.name.trim().is_empty() {
            return Err(ApiError::BadRequest("Name cannot be empty".into()));
        }
        if item.description.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(ApiError::BadRequest("Description cannot be empty".into()));
        }
    }

    let mut tx = db.pool().begin().await?;
    let mut ids = Vec::with_capacity(items.len());
    for item in &items {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO report_types (id, thread_id, name, description)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&thread.id)
        .bind(item.name.trim())
        .bind(item.description.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::BadRequest(
                format!("Report type '{}' already exists in thread", item.name),
            ),
            _ => ApiError::Database(e),
        })?;
        ids.push(id);
    }
    tx.commit().await?;

    let mut created = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(rt) = db.find_report_type_by_id(&id).await? {
            created.push(rt);
        }
    }
    Ok(created)
}

/// Delete a report type. Refused while PENDING reports cite it; resolved
/// reports keep a dangling label as an accepted trade-off.
pub async fn delete_report_type(
    db: &Database,
    thread: &Thread,
    type_id: &str,
) -> Result<(), ApiError> {
    let report_type = db
        .find_report_type_by_id(type_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Report type {} not found", type_id)))?;
    if report_type.thread_id != thread.id {
        return Err(ApiError::BadRequest(format!(
            "Report type not found in thread {}",
            thread.name
        )));
    }
    if db.count_open_reports_for_type(&report_type.id).await? > 0 {
        return Err(ApiError::BadRequest(
            "Report type has open reports and cannot be deleted".into(),
        ));
    }

    sqlx::query("DELETE FROM report_types WHERE id = ?")
        .bind(&report_type.id)
        .execute(db.pool())
        .await?;
    Ok(())
}

// -----------------------------------------------------------------------------
// Report Workflow Operations
// -----------------------------------------------------------------------------

/// Look up the caller's open report against a target. Rejects when the
/// target has reports disabled.
pub async fn get_open_report(
    db: &Database,
    reporter_id: &str,
    post: &Post,
    comment: Option<&Comment>,
) -> Result<Option<Report>, ApiError> {
    let disabled = comment.map_or(post.reports_disabled, |c| c.reports_disabled);
    if disabled {
        return Err(ApiError::Forbidden(
            "Reports are disabled for this content".into(),
        ));
    }
    Ok(db
        .find_open_report(reporter_id, &post.id, comment.map(|c| c.id.as_str()))
        .await?)
}

/// Submit a report against a post (or one of its comments). Creates a
/// PENDING report, bumps the target's report counter, and fans a
/// notification out to every moderator of the thread.
pub async fn submit_report(
    db: &Database,
    reporter: &User,
    thread: &Thread,
    post: &Post,
    comment: Option<&Comment>,
    req: &NewReportRequest,
) -> Result<Report, ApiError> {
    if post.thread_id != thread.id {
        return Err(ApiError::NotFound(format!(
            "Post not found in thread {}",
            thread.name
        )));
    }
    if let Some(c) = comment {
        if c.post_id != post.id {
            return Err(ApiError::NotFound("Comment not found in post".into()));
        }
    }
    if req.reporter_comment.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(ApiError::BadRequest("Report comment cannot be empty".into()));
    }

    if get_open_report(db, &reporter.id, post, comment).await?.is_some() {
        let what = if comment.is_some() { "comment" } else { "post" };
        return Err(ApiError::BadRequest(format!(
            "You have already reported this {}",
            what
        )));
    }

    let report_type = db
        .find_report_type_by_id(&req.report_type_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Report type {} not found", req.report_type_id))
        })?;
    if report_type.thread_id != thread.id {
        return Err(ApiError::NotFound(format!(
            "Report type {} not found in thread {}",
            report_type.id, thread.name
        )));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let moderators = db.moderator_ids(&thread.id).await?;

    let mut tx = db.pool().begin().await?;
    // Atomic counter bump on the target, in the same transaction as the insert
    match comment {
        Some(c) => {
            sqlx::query("UPDATE comments SET report_count = report_count + 1 WHERE id = ?")
                .bind(&c.id)
                .execute(&mut *tx)
                .await?;
        }
        None => {
            sqlx::query("UPDATE posts SET report_count = report_count + 1 WHERE id = ?")
                .bind(&post.id)
                .execute(&mut *tx)
                .await?;
        }
    }
    sqlx::query(
        r#"
        INSERT INTO reports (id, reporter_id, post_id, comment_id, reporter_comment, report_type_id, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'PENDING', ?)
        "#,
    )
    .bind(&id)
    .bind(&reporter.id)
    .bind(&post.id)
    .bind(comment.map(|c| c.id.as_str()))
    .bind(req.reporter_comment.as_deref())
    .bind(&report_type.id)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::on_unique(e, "You have already reported this content"))?;

    let (notif_type, what, res_id) = match comment {
        Some(c) => (NotifType::CommentReported, "comment", c.id.as_str()),
        None => (NotifType::PostReported, "post", post.id.as_str()),
    };
    notify_bulk(
        &mut *tx,
        notif_type,
        &moderators,
        &format!("{} reported a {}", reporter.username, what),
        Some(&report_type.name),
        req.reporter_comment.as_deref(),
        Some(res_id),
    )
    .await?;
    tx.commit().await?;

    db.find_report_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::Internal("Report vanished after insert".into()))
}

/// Resolve a report: the single PENDING -> terminal transition. Validates
/// the resolution/action pairing before any mutation, then applies the
/// counter decrement, content flags, and notifications atomically.
pub async fn resolve_report(
    db: &Database,
    resolver: &User,
    thread: &Thread,
    post: &Post,
    comment: Option<&Comment>,
    report_id: &str,
    req: &ResolveRequest,
) -> Result<Report, ApiError> {
    require_admin_or_moderator(db, &resolver.id, &thread.id).await?;

    let report = db
        .find_report_by_id(report_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Report {} not found", report_id)))?;
    if report.post_id != post.id || report.comment_id.as_deref() != comment.map(|c| c.id.as_str()) {
        return Err(ApiError::NotFound("Report does not target this content".into()));
    }

    match report.status {
        ReportStatus::Pending => {}
        ReportStatus::Resolved | ReportStatus::Rejected => {
            return Err(ApiError::BadRequest("Report already resolved".into()));
        }
    }
    match req.resolution {
        ReportStatus::Pending => {
            return Err(ApiError::BadRequest(
                "Resolution must be RESOLVED or REJECTED".into(),
            ));
        }
        ReportStatus::Rejected => {
            if req.action != ReportAction::Skipped {
                return Err(ApiError::BadRequest(
                    "Cannot lock or remove content with status REJECTED".into(),
                ));
            }
        }
        ReportStatus::Resolved => {
            if req.action == ReportAction::Skipped {
                return Err(ApiError::BadRequest(
                    "Cannot skip reports with status RESOLVED".into(),
                ));
            }
        }
    }
    if req.action == ReportAction::Unlocked && report.action.is_none() {
        return Err(ApiError::BadRequest(
            "Cannot unlock content this report never locked".into(),
        ));
    }
    if req.mod_comment.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(ApiError::BadRequest("Comment cannot be empty".into()));
    }

    let mut tx = db.pool().begin().await?;

    // The single terminal transition, guarded on PENDING in the WHERE
    // clause: under a concurrent resolve only one UPDATE matches, so the
    // loser never reaches the counter/flag mutations below.
    let updated = sqlx::query(
        "UPDATE reports SET status = ?, action = ?, mod_comment = ? WHERE id = ? AND status = 'PENDING'",
    )
    .bind(req.resolution)
    .bind(req.action)
    .bind(req.mod_comment.as_deref())
    .bind(&report.id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::BadRequest("Report already resolved".into()));
    }

    // Counter decrement and flag application on the target
    let (table, target_id) = match comment {
        Some(c) => ("comments", c.id.as_str()),
        None => ("posts", post.id.as_str()),
    };
    sqlx::query(&format!(
        "UPDATE {} SET report_count = MAX(0, report_count - 1) WHERE id = ?",
        table
    ))
    .bind(target_id)
    .execute(&mut *tx)
    .await?;
    match req.action {
        ReportAction::Locked => {
            sqlx::query(&format!("UPDATE {} SET is_locked = 1 WHERE id = ?", table))
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
        }
        ReportAction::Unlocked => {
            sqlx::query(&format!("UPDATE {} SET is_locked = 0 WHERE id = ?", table))
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
        }
        ReportAction::Removed => {
            sqlx::query(&format!("UPDATE {} SET is_removed = 1 WHERE id = ?", table))
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
        }
        ReportAction::Skipped => {}
    }
    if req.disable_reports {
        sqlx::query(&format!("UPDATE {} SET reports_disabled = 1 WHERE id = ?", table))
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
    }

    // Outcome notification to the reporter
    let (reporter_notif, outcome) = match req.resolution {
        ReportStatus::Resolved => (NotifType::ReportResolved, "resolved"),
        ReportStatus::Rejected | ReportStatus::Pending => (NotifType::ReportRejected, "rejected"),
    };
    notify(
        &mut *tx,
        reporter_notif,
        &report.reporter_id,
        &format!("Your report was {}", outcome),
        None,
        req.mod_comment.as_deref(),
        Some(&report.id),
    )
    .await?;

    // Content-owner notification where the action warrants one
    match comment {
        Some(c) => {
            if req.action == ReportAction::Removed {
                notify(
                    &mut *tx,
                    NotifType::CommentRemoved,
                    &c.author_id,
                    "Your comment was removed by a moderator",
                    Some(&thread.name),
                    req.mod_comment.as_deref(),
                    Some(&c.id),
                )
                .await?;
            }
        }
        None => {
            let owner_notif = match req.action {
                ReportAction::Locked => Some((NotifType::PostLocked, "Your post was locked")),
                ReportAction::Unlocked => Some((NotifType::PostUnlocked, "Your post was unlocked")),
                ReportAction::Removed => {
                    Some((NotifType::PostRemoved, "Your post was removed by a moderator"))
                }
                ReportAction::Skipped => None,
            };
            if let Some((notif_type, title)) = owner_notif {
                notify(
                    &mut *tx,
                    notif_type,
                    &post.author_id,
                    title,
                    Some(&thread.name),
                    req.mod_comment.as_deref(),
                    Some(&post.id),
                )
                .await?;
            }
        }
    }

    tx.commit().await?;

    tracing::info!(
        "Report {} resolved as {:?}/{:?} by {}",
        report.id,
        req.resolution,
        req.action,
        resolver.username
    );

    db.find_report_by_id(&report.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Report vanished after update".into()))
}

// -----------------------------------------------------------------------------
// Handler Plumbing
// -----------------------------------------------------------------------------

async fn load_thread(db: &Database, thread_id: &str) -> Result<Thread, ApiError> {
    db.find_thread_by_id(thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {} not found", thread_id)))
}

async fn load_post(db: &Database, thread: &Thread, post_id: &str) -> Result<Post, ApiError> {
    let post = db
        .find_post_by_id(post_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", post_id)))?;
    if post.thread_id != thread.id {
        return Err(ApiError::NotFound(format!(
            "Post not found in thread {}",
            thread.name
        )));
    }
    Ok(post)
}

async fn load_comment(db: &Database, post: &Post, comment_id: &str) -> Result<Comment, ApiError> {
    let comment = db
        .find_comment_by_id(comment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Comment {} not found", comment_id)))?;
    if comment.post_id != post.id {
        return Err(ApiError::NotFound("Comment not found in post".into()));
    }
    Ok(comment)
}

// -----------------------------------------------------------------------------
// Handlers: Report Types
// -----------------------------------------------------------------------------

/// Bulk-add report types to a thread.
pub async fn add_report_types_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<String>,
    Json(items): Json<Vec<ReportTypeAdd>>,
) -> Result<Json<Vec<ReportType>>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    let created = add_report_types(&state.db, &thread, items).await?;
    Ok(Json(created))
}

/// List a thread's report types.
pub async fn get_report_types(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<ReportType>>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let types = state.db.list_report_types(&thread.id).await?;
    Ok(Json(types))
}

/// Delete a report type from a thread.
pub async fn delete_report_type_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, type_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    delete_report_type(&state.db, &thread, &type_id).await?;
    Ok(Json(json!({ "message": "Report type deleted" })))
}

// -----------------------------------------------------------------------------
// Handlers: Reports
// -----------------------------------------------------------------------------

/// Report a post.
pub async fn report_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id)): Path<(String, String)>,
    Json(req): Json<NewReportRequest>,
) -> Result<Json<Report>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let reporter = auth.load(&state.db).await?;
    let report = submit_report(&state.db, &reporter, &thread, &post, None, &req).await?;
    Ok(Json(report))
}

/// Report a comment.
pub async fn report_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id, comment_id)): Path<(String, String, String)>,
    Json(req): Json<NewReportRequest>,
) -> Result<Json<Report>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let comment = load_comment(&state.db, &post, &comment_id).await?;
    let reporter = auth.load(&state.db).await?;
    let report = submit_report(&state.db, &reporter, &thread, &post, Some(&comment), &req).await?;
    Ok(Json(report))
}

/// List reports against a post (moderator view).
pub async fn get_post_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id)): Path<(String, String)>,
) -> Result<Json<Vec<Report>>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    let reports = state.db.list_post_reports(&post.id).await?;
    Ok(Json(reports))
}

/// List reports against a comment (moderator view).
pub async fn get_comment_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id, comment_id)): Path<(String, String, String)>,
) -> Result<Json<Vec<Report>>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let comment = load_comment(&state.db, &post, &comment_id).await?;
    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    let reports = state.db.list_comment_reports(&comment.id).await?;
    Ok(Json(reports))
}

/// Get the caller's open report against a post, if any.
pub async fn get_my_open_post_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id)): Path<(String, String)>,
) -> Result<Json<Option<Report>>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let report = get_open_report(&state.db, &auth.user_id, &post, None).await?;
    Ok(Json(report))
}

/// Resolve a report against a post.
pub async fn resolve_post_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id, report_id)): Path<(String, String, String)>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Report>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let resolver = auth.load(&state.db).await?;
    let report =
        resolve_report(&state.db, &resolver, &thread, &post, None, &report_id, &req).await?;
    Ok(Json(report))
}

/// Resolve a report against a comment.
pub async fn resolve_comment_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id, comment_id, report_id)): Path<(String, String, String, String)>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Report>, ApiError> {
    let thread = load_thread(&state.db, &thread_id).await?;
    let post = load_post(&state.db, &thread, &post_id).await?;
    let comment = load_comment(&state.db, &post, &comment_id).await?;
    let resolver = auth.load(&state.db).await?;
    let report = resolve_report(
        &state.db,
        &resolver,
        &thread,
        &post,
        Some(&comment),
        &report_id,
        &req,
    )
    .await?;
    Ok(Json(report))
}

/// List the caller's submitted reports.
pub async fn get_my_reports(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Report>>, ApiError> {
    let reports = state.db.list_reports_by_reporter(&auth.user_id).await?;
    Ok(Json(reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{insert_grant, RoleType};

    struct Fixture {
        db: Database,
        admin: User,
        moderator: User,
        reporter: User,
        author: User,
        thread: Thread,
        post: Post,
        comment: Comment,
        spam: ReportType,
    }

    async fn fixture() -> Fixture {
        fixture_on(Database::new("sqlite::memory:").await.unwrap()).await
    }

    /// Fixture on a file-backed database, for tests that need several pool
    /// connections to observe the same state concurrently.
    async fn file_fixture() -> Fixture {
        let path = std::env::temp_dir().join(format!("burrow-test-{}.db", uuid::Uuid::new_v4()));
        fixture_on(Database::new(&format!("sqlite:{}", path.display())).await.unwrap()).await
    }

    async fn fixture_on(db: Database) -> Fixture {
        db.run_migrations().await.unwrap();

        let admin = db.create_user("admin", "admin", None, None).await.unwrap();
        let moderator = db.create_user("mod", "mod", None, None).await.unwrap();
        let reporter = db.create_user("rep", "alice", None, None).await.unwrap();
        let author = db.create_user("auth", "bob", None, None).await.unwrap();
        let thread = db.create_thread("general", &admin.id).await.unwrap();
        let post = db
            .create_post(&thread.id, &author.id, "Hello", "First post")
            .await
            .unwrap();
        let comment = db
            .create_comment(&post.id, &author.id, "First comment")
            .await
            .unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        insert_grant(&mut *tx, &admin.id, &admin.id, RoleType::Admin, None)
            .await
            .unwrap();
        insert_grant(&mut *tx, &admin.id, &moderator.id, RoleType::Moderator, Some(&thread.id))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let spam = add_report_types(
            &db,
            &thread,
            vec![ReportTypeAdd {
                name: "Spam".into(),
                description: Some("Unsolicited advertising".into()),
            }],
        )
        .await
        .unwrap()
        .remove(0);

        Fixture {
            db,
            admin,
            moderator,
            reporter,
            author,
            thread,
            post,
            comment,
            spam,
        }
    }

    fn new_report(f: &Fixture) -> NewReportRequest {
        NewReportRequest {
            report_type_id: f.spam.id.clone(),
            reporter_comment: Some("looks like spam".into()),
        }
    }

    fn resolve(resolution: ReportStatus, action: ReportAction) -> ResolveRequest {
        ResolveRequest {
            resolution,
            action,
            mod_comment: None,
            disable_reports: false,
        }
    }

    #[tokio::test]
    async fn test_submit_creates_pending_and_bumps_counter() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.action.is_none());
        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert_eq!(post.report_count, 1);

        // Moderator fan-out (not the admin; fan-out targets thread moderators)
        let inbox = f.db.list_notifications(&f.moderator.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notif_type, NotifType::PostReported);
        assert_eq!(inbox[0].sub_title.as_deref(), Some("Spam"));
        assert!(f.db.list_notifications(&f.admin.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_open_report_rejected() {
        let f = fixture().await;
        submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let err = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // Counter was not double-bumped by the failed attempt
        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert_eq!(post.report_count, 1);
    }

    #[tokio::test]
    async fn test_post_and_comment_reports_are_distinct_targets() {
        let f = fixture().await;
        submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();
        // Same reporter, same post, but targeting the comment: allowed
        let report = submit_report(
            &f.db,
            &f.reporter,
            &f.thread,
            &f.post,
            Some(&f.comment),
            &new_report(&f),
        )
        .await
        .unwrap();
        assert_eq!(report.comment_id.as_deref(), Some(f.comment.id.as_str()));

        let comment = f.db.find_comment_by_id(&f.comment.id).await.unwrap().unwrap();
        assert_eq!(comment.report_count, 1);
    }

    #[tokio::test]
    async fn test_report_type_from_other_thread_rejected() {
        let f = fixture().await;
        let other = f.db.create_thread("other", &f.admin.id).await.unwrap();
        let other_type = add_report_types(
            &f.db,
            &other,
            vec![ReportTypeAdd {
                name: "Off topic".into(),
                description: None,
            }],
        )
        .await
        .unwrap()
        .remove(0);

        let req = NewReportRequest {
            report_type_id: other_type.id,
            reporter_comment: None,
        };
        let err = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &req)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_locked_applies_flag_and_counter() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let resolved = resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Locked),
        )
        .await
        .unwrap();

        assert_eq!(resolved.status, ReportStatus::Resolved);
        assert_eq!(resolved.action, Some(ReportAction::Locked));

        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert!(post.is_locked);
        // Counter nets back to the pre-submit value
        assert_eq!(post.report_count, 0);

        // Reporter told about the outcome, author told about the lock
        let reporter_inbox = f.db.list_notifications(&f.reporter.id).await.unwrap();
        assert_eq!(reporter_inbox.len(), 1);
        assert_eq!(reporter_inbox[0].notif_type, NotifType::ReportResolved);
        let author_inbox = f.db.list_notifications(&f.author.id).await.unwrap();
        assert_eq!(author_inbox.len(), 1);
        assert_eq!(author_inbox[0].notif_type, NotifType::PostLocked);
    }

    #[tokio::test]
    async fn test_resolve_by_non_moderator_forbidden() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let err = resolve_report(
            &f.db,
            &f.reporter,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Locked),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        // Gate failure mutated nothing
        let report = f.db.find_report_by_id(&report.id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn test_rejected_permits_only_skipped() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        for action in [ReportAction::Locked, ReportAction::Unlocked, ReportAction::Removed] {
            let err = resolve_report(
                &f.db,
                &f.moderator,
                &f.thread,
                &f.post,
                None,
                &report.id,
                &resolve(ReportStatus::Rejected, action),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)), "action {:?}", action);
        }

        let rejected = resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Rejected, ReportAction::Skipped),
        )
        .await
        .unwrap();
        assert_eq!(rejected.status, ReportStatus::Rejected);
        assert_eq!(rejected.action, Some(ReportAction::Skipped));

        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert!(!post.is_locked);
        assert!(!post.is_removed);

        let inbox = f.db.list_notifications(&f.reporter.id).await.unwrap();
        assert_eq!(inbox[0].notif_type, NotifType::ReportRejected);
    }

    #[tokio::test]
    async fn test_resolved_forbids_skipped() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let err = resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Skipped),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unlock_without_prior_lock_rejected() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let err = resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Unlocked),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_reresolve_fails() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Locked),
        )
        .await
        .unwrap();

        let err = resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Removed),
        )
        .await
        .unwrap_err();
        match err {
            ApiError::BadRequest(msg) => assert_eq!(msg, "Report already resolved"),
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolves_apply_once() {
        let f = file_fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let resolve_a = resolve(ReportStatus::Resolved, ReportAction::Locked);
        let resolve_b = resolve(ReportStatus::Rejected, ReportAction::Skipped);
        let (a, b) = tokio::join!(
            resolve_report(
                &f.db,
                &f.moderator,
                &f.thread,
                &f.post,
                None,
                &report.id,
                &resolve_a,
            ),
            resolve_report(
                &f.db,
                &f.admin,
                &f.thread,
                &f.post,
                None,
                &report.id,
                &resolve_b,
            ),
        );
        // The PENDING guard on the terminal update lets exactly one through
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let final_report = f.db.find_report_by_id(&report.id).await.unwrap().unwrap();
        assert_ne!(final_report.status, ReportStatus::Pending);

        // Counter decremented exactly once, reporter notified exactly once
        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert_eq!(post.report_count, 0);
        assert_eq!(f.db.list_notifications(&f.reporter.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_report_uniqueness_is_storage_enforced() {
        let f = fixture().await;

        let insert = |id: &'static str| {
            sqlx::query(
                r#"
                INSERT INTO reports (id, reporter_id, post_id, comment_id, report_type_id, status, created_at)
                VALUES (?, ?, ?, NULL, ?, 'PENDING', ?)
                "#,
            )
            .bind(id)
            .bind(&f.reporter.id)
            .bind(&f.post.id)
            .bind(&f.spam.id)
            .bind(Utc::now().to_rfc3339())
        };

        // A second PENDING row for the same (reporter, post, comment) must be
        // refused by the index even when no application pre-check runs
        insert("r1").execute(f.db.pool()).await.unwrap();
        let err = insert("r2").execute(f.db.pool()).await.unwrap_err();
        match err {
            sqlx::Error::Database(e) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }

        // Resolved history does not block a fresh report on the same target
        sqlx::query("UPDATE reports SET status = 'RESOLVED', action = 'SKIPPED' WHERE id = 'r1'")
            .execute(f.db.pool())
            .await
            .unwrap();
        insert("r3").execute(f.db.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_disable_reports_blocks_future_submissions() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let req = ResolveRequest {
            resolution: ReportStatus::Resolved,
            action: ReportAction::Locked,
            mod_comment: Some("repeat offender".into()),
            disable_reports: true,
        };
        resolve_report(&f.db, &f.moderator, &f.thread, &f.post, None, &report.id, &req)
            .await
            .unwrap();

        // Handlers always reload the target, picking up the disabled flag
        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert!(post.reports_disabled);

        let other = f.db.create_user("u9", "carol", None, None).await.unwrap();
        let err = submit_report(&f.db, &other, &f.thread, &post, None, &new_report(&f))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = get_open_report(&f.db, &other.id, &post, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_comment_removed_notifies_comment_author() {
        let f = fixture().await;
        let report = submit_report(
            &f.db,
            &f.reporter,
            &f.thread,
            &f.post,
            Some(&f.comment),
            &new_report(&f),
        )
        .await
        .unwrap();

        resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            Some(&f.comment),
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Removed),
        )
        .await
        .unwrap();

        let comment = f.db.find_comment_by_id(&f.comment.id).await.unwrap().unwrap();
        assert!(comment.is_removed);
        assert_eq!(comment.report_count, 0);

        let author_inbox = f.db.list_notifications(&f.author.id).await.unwrap();
        assert_eq!(author_inbox.len(), 1);
        assert_eq!(author_inbox[0].notif_type, NotifType::CommentRemoved);
    }

    #[tokio::test]
    async fn test_resolve_rejected_leaves_flags_but_decrements() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Rejected, ReportAction::Skipped),
        )
        .await
        .unwrap();

        let post = f.db.find_post_by_id(&f.post.id).await.unwrap().unwrap();
        assert_eq!(post.report_count, 0);
        // SKIPPED rejections never notify the author
        assert!(f.db.list_notifications(&f.author.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_can_resolve_without_moderator_grant() {
        let f = fixture().await;
        let report = submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();

        let resolved = resolve_report(
            &f.db,
            &f.admin,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Resolved, ReportAction::Removed),
        )
        .await
        .unwrap();
        assert_eq!(resolved.status, ReportStatus::Resolved);
    }

    #[tokio::test]
    async fn test_add_duplicate_report_type_name_rejected() {
        let f = fixture().await;
        let err = add_report_types(
            &f.db,
            &f.thread,
            vec![ReportTypeAdd {
                name: "Spam".into(),
                description: None,
            }],
        )
        .await
        .unwrap_err();
        match err {
            ApiError::BadRequest(msg) => assert!(msg.contains("already exists")),
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_report_type_guards() {
        let f = fixture().await;
        let other = f.db.create_thread("other", &f.admin.id).await.unwrap();

        // Wrong thread
        let err = delete_report_type(&f.db, &other, &f.spam.id).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // Open report cites it
        submit_report(&f.db, &f.reporter, &f.thread, &f.post, None, &new_report(&f))
            .await
            .unwrap();
        let err = delete_report_type(&f.db, &f.thread, &f.spam.id).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // After resolution the type can go
        let report = f
            .db
            .find_open_report(&f.reporter.id, &f.post.id, None)
            .await
            .unwrap()
            .unwrap();
        resolve_report(
            &f.db,
            &f.moderator,
            &f.thread,
            &f.post,
            None,
            &report.id,
            &resolve(ReportStatus::Rejected, ReportAction::Skipped),
        )
        .await
        .unwrap();
        delete_report_type(&f.db, &f.thread, &f.spam.id).await.unwrap();
        assert!(f.db.list_report_types(&f.thread.id).await.unwrap().is_empty());

        // The resolved report survives the delete with its label dangling
        let kept = f.db.find_report_by_id(&report.id).await.unwrap().unwrap();
        assert_eq!(kept.report_type_id, f.spam.id);
    }
}
