// =============================================================================
// Burrow Backend - Notification Sink
// =============================================================================
// Every moderation state transition emits a notification row. Emission always
// happens inside the caller's transaction so a rolled-back operation leaves
// no trace; delivery beyond the inbox listing is out of scope.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::auth::AuthUser;
use crate::db::Database;
use crate::error::ApiError;
use crate::AppState;

/// Kinds of notification this service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifType {
    // Moderator role notifications
    ModeratorInvited,
    ModeratorInviteAccepted,
    ModeratorInviteRejected,
    ModeratorInviteExpired,
    ModeratorRemoved,
    // Admin role notifications
    AdminInvited,
    AdminInviteAccepted,
    AdminInviteRejected,
    AdminInviteExpired,
    AdminRemoved,
    // Report notifications
    PostReported,
    CommentReported,
    ReportResolved,
    ReportRejected,
    // Content moderation notifications
    PostLocked,
    PostUnlocked,
    PostRemoved,
    CommentRemoved,
}

/// Notification model.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub notif_type: NotifType,
    pub user_id: String,
    pub title: String,
    pub sub_title: Option<String>,
    pub content: Option<String>,
    pub res_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seen_at: Option<DateTime<Utc>>,
}

/// Emit a single notification inside the caller's transaction.
pub async fn notify(
    conn: &mut SqliteConnection,
    notif_type: NotifType,
    user_id: &str,
    title: &str,
    sub_title: Option<&str>,
    content: Option<&str>,
    res_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO notifications (id, notif_type, user_id, title, sub_title, content, res_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(notif_type)
    .bind(user_id)
    .bind(title)
    .bind(sub_title)
    .bind(content)
    .bind(res_id)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Emit the same notification to several recipients (moderator fan-out).
pub async fn notify_bulk(
    conn: &mut SqliteConnection,
    notif_type: NotifType,
    user_ids: &[String],
    title: &str,
    sub_title: Option<&str>,
    content: Option<&str>,
    res_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    for user_id in user_ids {
        notify(conn, notif_type, user_id, title, sub_title, content, res_id).await?;
    }
    Ok(())
}

impl Database {
    /// List a user's notifications, newest first.
    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
    }

    /// Mark all of a user's unread notifications as read; returns how many
    /// rows were touched.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET seen_at = ? WHERE user_id = ? AND seen_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Find a notification by ID.
    pub async fn find_notification_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// Get the caller's notification inbox.
pub async fn get_my_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = state.db.list_notifications(&auth.user_id).await?;
    Ok(Json(notifications))
}

/// Mark every unread notification in the caller's inbox as read.
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let marked = state.db.mark_all_read(&auth.user_id).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

/// Mark a notification as read.
pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let notification = state
        .db
        .find_notification_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))?;

    if notification.user_id != auth.user_id {
        return Err(ApiError::Forbidden("Not your notification".into()));
    }

    sqlx::query("UPDATE notifications SET seen_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(&id)
        .execute(state.db.pool())
        .await?;

    let updated = state
        .db
        .find_notification_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))?;

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_notify_and_list() {
        let db = test_db().await;
        let user = db.create_user("u1", "alice", None, None).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        notify(
            &mut *tx,
            NotifType::ReportResolved,
            &user.id,
            "Report resolved",
            Some("spam"),
            None,
            None,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let inbox = db.list_notifications(&user.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notif_type, NotifType::ReportResolved);
        assert!(inbox[0].seen_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_all_read_only_touches_own_unread() {
        let db = test_db().await;
        let alice = db.create_user("u1", "alice", None, None).await.unwrap();
        let bob = db.create_user("u2", "bob", None, None).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        for (user, title) in [(&alice, "one"), (&alice, "two"), (&bob, "three")] {
            notify(&mut *tx, NotifType::PostReported, &user.id, title, None, None, None)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        assert_eq!(db.mark_all_read(&alice.id).await.unwrap(), 2);
        assert!(db
            .list_notifications(&alice.id)
            .await
            .unwrap()
            .iter()
            .all(|n| n.seen_at.is_some()));
        // Bob's inbox is untouched, and a second pass finds nothing unread
        assert!(db.list_notifications(&bob.id).await.unwrap()[0].seen_at.is_none());
        assert_eq!(db.mark_all_read(&alice.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_drops_notification() {
        let db = test_db().await;
        let user = db.create_user("u1", "alice", None, None).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        notify(
            &mut *tx,
            NotifType::PostReported,
            &user.id,
            "Post reported",
            None,
            None,
            None,
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let inbox = db.list_notifications(&user.id).await.unwrap();
        assert!(inbox.is_empty());
    }
}
