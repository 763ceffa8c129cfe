// =============================================================================
// Burrow Backend - Role Grants & Authorization Gate
// =============================================================================
// A RoleGrant is a persisted, active elevated permission: global for
// admins/owners, scoped to one thread for moderators. Grants are only ever
// created by accepting an invitation (see invitations.rs); this module owns
// the store, the gate predicates every mutating operation calls first, and
// revocation.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;

use crate::auth::AuthUser;
use crate::db::{Database, Thread, User, UserLink};
use crate::error::ApiError;
use crate::notifications::{notify, NotifType};
use crate::AppState;

/// Elevated role kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    Owner,
    Admin,
    Moderator,
}

/// A held elevated role, optionally scoped to a thread.
///
/// Invariant: `thread_id` is present iff `role_type` is `Moderator`, and a
/// grantee holds at most one grant per (role, scope) pair. Both are enforced
/// by the schema, not just here.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoleGrant {
    pub id: String,
    pub granter_id: String,
    pub grantee_id: String,
    pub role_type: RoleType,
    pub thread_id: Option<String>,
    pub granted_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Gate Predicates
// -----------------------------------------------------------------------------

impl Database {
    /// True iff the user holds an ADMIN or OWNER grant.
    pub async fn is_site_admin(&self, user_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM role_grants WHERE grantee_id = ? AND role_type IN ('ADMIN', 'OWNER')",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// True iff the user holds a MODERATOR grant scoped to the thread.
    pub async fn is_moderator_of(&self, user_id: &str, thread_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM role_grants WHERE grantee_id = ? AND role_type = 'MODERATOR' AND thread_id = ?",
        )
        .bind(user_id)
        .bind(thread_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// Find a grant by (grantee, role, scope).
    pub async fn find_grant(
        &self,
        grantee_id: &str,
        role_type: RoleType,
        thread_id: Option<&str>,
    ) -> Result<Option<RoleGrant>, sqlx::Error> {
        sqlx::query_as::<_, RoleGrant>(
            r#"
            SELECT * FROM role_grants
            WHERE grantee_id = ? AND role_type = ? AND COALESCE(thread_id, '') = COALESCE(?, '')
            "#,
        )
        .bind(grantee_id)
        .bind(role_type)
        .bind(thread_id)
        .fetch_optional(self.pool())
        .await
    }

    /// List moderators of a thread.
    pub async fn list_moderators(&self, thread_id: &str) -> Result<Vec<UserLink>, sqlx::Error> {
        sqlx::query_as::<_, UserLink>(
            r#"
            SELECT u.id, u.username FROM users u
            INNER JOIN role_grants g ON g.grantee_id = u.id
            WHERE g.thread_id = ? AND g.role_type = 'MODERATOR'
            ORDER BY u.username
            "#,
        )
        .bind(thread_id)
        .fetch_all(self.pool())
        .await
    }

    /// List thread moderator user IDs (for report fan-out).
    pub async fn moderator_ids(&self, thread_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT grantee_id FROM role_grants WHERE thread_id = ? AND role_type = 'MODERATOR'",
        )
        .bind(thread_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// List site admins and owners.
    pub async fn list_admins(&self) -> Result<Vec<UserLink>, sqlx::Error> {
        sqlx::query_as::<_, UserLink>(
            r#"
            SELECT u.id, u.username FROM users u
            INNER JOIN role_grants g ON g.grantee_id = u.id
            WHERE g.role_type IN ('ADMIN', 'OWNER')
            ORDER BY u.username
            "#,
        )
        .fetch_all(self.pool())
        .await
    }
}

/// Require the principal to be a site admin or a moderator of the thread.
pub async fn require_admin_or_moderator(
    db: &Database,
    user_id: &str,
    thread_id: &str,
) -> Result<(), ApiError> {
    if db.is_site_admin(user_id).await? || db.is_moderator_of(user_id, thread_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Unauthorized".into()))
    }
}

/// Require the principal to be a site admin.
pub async fn require_admin(db: &Database, user_id: &str) -> Result<(), ApiError> {
    if db.is_site_admin(user_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Unauthorized".into()))
    }
}

/// True iff the principal is the resource's author. Purely an identity
/// comparison; the caller supplies the resource's author ID.
pub fn is_author_of(user_id: &str, author_id: &str) -> bool {
    user_id == author_id
}

/// Require the principal to be the author, a site admin, or a moderator of
/// the thread.
pub async fn require_author_or_moderator(
    db: &Database,
    user_id: &str,
    author_id: &str,
    thread_id: &str,
) -> Result<(), ApiError> {
    if is_author_of(user_id, author_id) {
        return Ok(());
    }
    require_admin_or_moderator(db, user_id, thread_id).await
}

// -----------------------------------------------------------------------------
// Grant Mutation (transaction-scoped)
// -----------------------------------------------------------------------------

/// Insert a role grant inside the caller's transaction. The unique index on
/// (grantee, role, scope) makes a duplicate insert fail rather than stack.
pub(crate) async fn insert_grant(
    conn: &mut SqliteConnection,
    granter_id: &str,
    grantee_id: &str,
    role_type: RoleType,
    thread_id: Option<&str>,
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO role_grants (id, granter_id, grantee_id, role_type, thread_id, granted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(granter_id)
    .bind(grantee_id)
    .bind(role_type)
    .bind(thread_id)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(id)
}

/// Revoke a grant: delete the row and notify the grantee.
async fn revoke_grant(
    db: &Database,
    actor_id: &str,
    grantee: &User,
    role_type: RoleType,
    thread: Option<&Thread>,
) -> Result<(), ApiError> {
    let grant = db
        .find_grant(&grantee.id, role_type, thread.map(|t| t.id.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound("No such role grant".into()))?;

    let (notif_type, title) = match role_type {
        RoleType::Moderator => (
            NotifType::ModeratorRemoved,
            format!(
                "You are no longer a moderator of {}",
                thread.map(|t| t.name.as_str()).unwrap_or_default()
            ),
        ),
        RoleType::Admin | RoleType::Owner => {
            (NotifType::AdminRemoved, "You are no longer a site admin".to_string())
        }
    };

    let mut tx = db.pool().begin().await?;
    sqlx::query("DELETE FROM role_grants WHERE id = ?")
        .bind(&grant.id)
        .execute(&mut *tx)
        .await?;
    notify(
        &mut *tx,
        notif_type,
        &grantee.id,
        &title,
        None,
        None,
        grant.thread_id.as_deref(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        "Revoked {:?} grant from {} (actor {})",
        role_type,
        grantee.username,
        actor_id
    );
    Ok(())
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// List moderators of a thread.
pub async fn get_moderators(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<UserLink>>, ApiError> {
    let thread = state
        .db
        .find_thread_by_id(&thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {} not found", thread_id)))?;
    let mods = state.db.list_moderators(&thread.id).await?;
    Ok(Json(mods))
}

/// Remove a moderator from a thread.
pub async fn remove_moderator(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, username)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = state
        .db
        .find_thread_by_id(&thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {} not found", thread_id)))?;
    let user = state
        .db
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))?;

    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    revoke_grant(&state.db, &auth.user_id, &user, RoleType::Moderator, Some(&thread)).await?;

    Ok(Json(json!({ "message": "Moderator removed" })))
}

/// List site admins.
pub async fn get_admins(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<UserLink>>, ApiError> {
    require_admin(&state.db, &auth.user_id).await?;
    let admins = state.db.list_admins().await?;
    Ok(Json(admins))
}

/// Remove a site admin.
pub async fn remove_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .db
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))?;

    require_admin(&state.db, &auth.user_id).await?;
    revoke_grant(&state.db, &auth.user_id, &user, RoleType::Admin, None).await?;

    Ok(Json(json!({ "message": "Admin removed" })))
}
