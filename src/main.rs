// =============================================================================
// Burrow Backend - API Server Entry Point
// =============================================================================
// Table of Contents:
// 1. Imports
// 2. Application State
// 3. Main Entry Point
// 4. Router Setup
// 5. Content Handlers
// =============================================================================

mod auth;
mod config;
mod db;
mod error;
mod invitations;
mod notifications;
mod reports;
mod roles;

use axum::{
    extract::{Path, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthUser;
use crate::config::Config;
use crate::db::{Comment, Database, Post, Thread};
use crate::error::ApiError;

// -----------------------------------------------------------------------------
// 2. Application State
// -----------------------------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
}

// -----------------------------------------------------------------------------
// 3. Main Entry Point
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = dotenvy::dotenv();

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_address.clone();

    // Ensure database directory exists for SQLite
    if config.database_url.starts_with("sqlite:") {
        let db_path = config.database_url.trim_start_matches("sqlite:");
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
    }

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;

    let state = AppState {
        config: Arc::new(config),
        db,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Burrow API server running on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

// -----------------------------------------------------------------------------
// 4. Router Setup
// -----------------------------------------------------------------------------

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Auth routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::get_current_user))
        // Threads and content
        .route("/api/threads", get(get_threads).post(create_thread))
        .route("/api/threads/:thread_id/posts", post(create_post))
        .route(
            "/api/threads/:thread_id/posts/:post_id",
            delete(remove_post),
        )
        .route(
            "/api/threads/:thread_id/posts/:post_id/comments",
            post(create_comment),
        )
        // Moderator roster
        .route(
            "/api/threads/:thread_id/moderators",
            get(roles::get_moderators),
        )
        .route(
            "/api/threads/:thread_id/moderators/:username",
            post(invitations::invite_moderator).delete(roles::remove_moderator),
        )
        // Admin roster
        .route("/api/moderators/admins", get(roles::get_admins))
        .route(
            "/api/moderators/admins/:username",
            post(invitations::invite_admin).delete(roles::remove_admin),
        )
        // Invitations
        .route("/api/me/invites", get(invitations::get_my_invites))
        .route("/api/invites/:inv_id/accept", post(invitations::accept_invite))
        .route("/api/invites/:inv_id/reject", post(invitations::reject_invite))
        // Report types
        .route(
            "/api/threads/:thread_id/reports",
            get(reports::get_report_types).post(reports::add_report_types_handler),
        )
        .route(
            "/api/threads/:thread_id/reports/:type_id",
            delete(reports::delete_report_type_handler),
        )
        // Post reports
        .route(
            "/api/threads/:thread_id/posts/:post_id/reports",
            get(reports::get_post_reports).post(reports::report_post),
        )
        .route(
            "/api/threads/:thread_id/posts/:post_id/reports/open",
            get(reports::get_my_open_post_report),
        )
        .route(
            "/api/threads/:thread_id/posts/:post_id/reports/:report_id/resolve",
            post(reports::resolve_post_report),
        )
        // Comment reports
        .route(
            "/api/threads/:thread_id/posts/:post_id/comments/:comment_id/reports",
            get(reports::get_comment_reports).post(reports::report_comment),
        )
        .route(
            "/api/threads/:thread_id/posts/:post_id/comments/:comment_id/reports/:report_id/resolve",
            post(reports::resolve_comment_report),
        )
        .route("/api/me/reports", get(reports::get_my_reports))
        // Notifications
        .route("/api/me/notifications", get(notifications::get_my_notifications))
        .route(
            "/api/me/notifications/read",
            patch(notifications::mark_all_notifications_read),
        )
        .route(
            "/api/notifications/:notif_id/read",
            post(notifications::mark_notification_read),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// -----------------------------------------------------------------------------
// 5. Content Handlers
// -----------------------------------------------------------------------------
// Threads, posts, and comments exist here as moderation targets; these
// handlers cover creation and listing only.

#[derive(Debug, Deserialize)]
struct CreateThreadRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatePostRequest {
    title: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreateCommentRequest {
    content: String,
}

async fn get_threads(State(state): State<AppState>) -> Result<Json<Vec<Thread>>, ApiError> {
    let threads = state.db.list_threads().await?;
    Ok(Json(threads))
}

async fn create_thread(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateThreadRequest>,
) -> Result<Json<Thread>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Thread name cannot be empty".into()));
    }
    let thread = state
        .db
        .create_thread(req.name.trim(), &auth.user_id)
        .await
        .map_err(|e| ApiError::on_unique(e, "Thread name already taken"))?;
    Ok(Json(thread))
}

async fn create_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(thread_id): Path<String>,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    let thread = state
        .db
        .find_thread_by_id(&thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {} not found", thread_id)))?;
    if req.title.trim().is_empty() || req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Title and content are required".into()));
    }
    let post = state
        .db
        .create_post(&thread.id, &auth.user_id, req.title.trim(), &req.content)
        .await?;
    Ok(Json(post))
}

/// Remove a post: its author may take it down, as may any moderator of the
/// thread or a site admin.
async fn remove_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let post = state
        .db
        .find_post_by_id(&post_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", post_id)))?;
    if post.thread_id != thread_id {
        return Err(ApiError::NotFound("Post not found in thread".into()));
    }

    roles::require_author_or_moderator(&state.db, &auth.user_id, &post.author_id, &thread_id)
        .await?;

    sqlx::query("UPDATE posts SET is_removed = 1 WHERE id = ?")
        .bind(&post.id)
        .execute(state.db.pool())
        .await?;

    Ok(Json(json!({ "message": "Post removed" })))
}

async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, post_id)): Path<(String, String)>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<Comment>, ApiError> {
    let post = state
        .db
        .find_post_by_id(&post_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", post_id)))?;
    if post.thread_id != thread_id {
        return Err(ApiError::NotFound("Post not found in thread".into()));
    }
    if post.is_locked {
        return Err(ApiError::Forbidden("Post is locked".into()));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Comment cannot be empty".into()));
    }
    let comment = state
        .db
        .create_comment(&post.id, &auth.user_id, &req.content)
        .await?;
    Ok(Json(comment))
}
