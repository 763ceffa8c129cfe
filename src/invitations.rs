// =============================================================================
// Burrow Backend - Role Invitations
// =============================================================================
// Time-boxed offers of a role grant. An invitation is created PENDING and
// transitions exactly once to ACCEPTED or REJECTED; acceptance creates the
// RoleGrant. Expiry is lazy: nothing sweeps old invitations, an expired one
// is only rejected when its grantee tries to accept it.
// =============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::auth::AuthUser;
use crate::db::{Database, Thread, User};
use crate::error::ApiError;
use crate::notifications::{notify, NotifType};
use crate::roles::{self, require_admin, require_admin_or_moderator, RoleType};
use crate::AppState;

/// Invitation lifecycle states. ACCEPTED and REJECTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A time-boxed offer of a role grant.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: String,
    pub granter_id: String,
    pub grantee_id: String,
    pub role_type: RoleType,
    pub thread_id: Option<String>,
    pub status: InviteStatus,
    pub invited_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Database {
    /// Find an invitation by ID.
    pub async fn find_invitation_by_id(&self, id: &str) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }

    /// Find a PENDING invitation for (grantee, role, scope).
    pub async fn find_pending_invitation(
        &self,
        grantee_id: &str,
        role_type: RoleType,
        thread_id: Option<&str>,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE grantee_id = ? AND role_type = ? AND COALESCE(thread_id, '') = COALESCE(?, '')
              AND status = 'PENDING'
            "#,
        )
        .bind(grantee_id)
        .bind(role_type)
        .bind(thread_id)
        .fetch_optional(self.pool())
        .await
    }

    /// List a user's received invitations, newest first.
    pub async fn list_invitations_for(&self, grantee_id: &str) -> Result<Vec<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE grantee_id = ? ORDER BY invited_at DESC",
        )
        .bind(grantee_id)
        .fetch_all(self.pool())
        .await
    }
}

/// Close an invitation inside the caller's transaction. The update is
/// guarded on PENDING so concurrent accept/reject calls cannot both
/// transition it; returns whether this call performed the close.
async fn close_invitation(
    conn: &mut SqliteConnection,
    id: &str,
    status: InviteStatus,
    closed_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE invitations SET status = ?, closed_at = ? WHERE id = ? AND status = 'PENDING'",
    )
    .bind(status)
    .bind(closed_at.to_rfc3339())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

// -----------------------------------------------------------------------------
// Operations
// -----------------------------------------------------------------------------

/// Create a PENDING invitation and notify the grantee.
///
/// Authorization is the caller's responsibility: the handlers gate moderator
/// invitations behind admin-or-moderator and admin invitations behind admin
/// before calling this.
pub async fn create_invitation(
    db: &Database,
    granter: &User,
    grantee: &User,
    role_type: RoleType,
    thread: Option<&Thread>,
) -> Result<Invitation, ApiError> {
    match role_type {
        RoleType::Moderator => {
            if thread.is_none() {
                return Err(ApiError::BadRequest(
                    "Moderator invitation requires a thread".into(),
                ));
            }
        }
        RoleType::Admin => {
            if thread.is_some() {
                return Err(ApiError::BadRequest(
                    "Admin invitation cannot be scoped to a thread".into(),
                ));
            }
        }
        RoleType::Owner => {
            return Err(ApiError::BadRequest(
                "Owner role cannot be granted by invitation".into(),
            ));
        }
    }

    let thread_id = thread.map(|t| t.id.as_str());
    if db.find_grant(&grantee.id, role_type, thread_id).await?.is_some() {
        let msg = match role_type {
            RoleType::Moderator => "User already moderator",
            _ => "User already admin",
        };
        return Err(ApiError::BadRequest(msg.into()));
    }
    if db
        .find_pending_invitation(&grantee.id, role_type, thread_id)
        .await?
        .is_some()
    {
        return Err(ApiError::BadRequest("Invitation already pending".into()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let (notif_type, title) = match role_type {
        RoleType::Moderator => (
            NotifType::ModeratorInvited,
            format!(
                "{} invited you to moderate {}",
                granter.username,
                thread.map(|t| t.name.as_str()).unwrap_or_default()
            ),
        ),
        _ => (
            NotifType::AdminInvited,
            format!("{} invited you to become a site admin", granter.username),
        ),
    };

    let mut tx = db.pool().begin().await?;
    sqlx::query(
        r#"
        INSERT INTO invitations (id, granter_id, grantee_id, role_type, thread_id, status, invited_at)
        VALUES (?, ?, ?, ?, ?, 'PENDING', ?)
        "#,
    )
    .bind(&id)
    .bind(&granter.id)
    .bind(&grantee.id)
    .bind(role_type)
    .bind(thread_id)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;
    notify(&mut *tx, notif_type, &grantee.id, &title, None, None, Some(&id)).await?;
    tx.commit().await?;

    db.find_invitation_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::Internal("Invitation vanished after insert".into()))
}

/// Accept an invitation: within the expiry window this creates the role
/// grant and closes the invitation ACCEPTED. Past the window, the invitation
/// is closed REJECTED with distinct "expired" notification copy and the
/// request still fails — that mutation deliberately survives the error.
pub async fn accept_invitation(
    db: &Database,
    inv_id: &str,
    actor: &User,
    expiry_hours: i64,
) -> Result<Invitation, ApiError> {
    let invitation = db
        .find_invitation_by_id(inv_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Invitation {} not found", inv_id)))?;

    if invitation.grantee_id != actor.id {
        return Err(ApiError::Forbidden("Not your invitation".into()));
    }
    match invitation.status {
        InviteStatus::Pending => {}
        InviteStatus::Accepted | InviteStatus::Rejected => {
            return Err(ApiError::BadRequest("Invitation already closed".into()));
        }
    }

    let now = Utc::now();
    if now - invitation.invited_at > Duration::hours(expiry_hours) {
        let notif_type = match invitation.role_type {
            RoleType::Moderator => NotifType::ModeratorInviteExpired,
            RoleType::Admin | RoleType::Owner => NotifType::AdminInviteExpired,
        };
        let mut tx = db.pool().begin().await?;
        if !close_invitation(&mut *tx, &invitation.id, InviteStatus::Rejected, now).await? {
            return Err(ApiError::BadRequest("Invitation already closed".into()));
        }
        notify(
            &mut *tx,
            notif_type,
            &invitation.granter_id,
            &format!("Your invitation to {} expired", actor.username),
            None,
            None,
            Some(&invitation.id),
        )
        .await?;
        tx.commit().await?;
        return Err(ApiError::Forbidden("Invitation expired".into()));
    }

    let notif_type = match invitation.role_type {
        RoleType::Moderator => NotifType::ModeratorInviteAccepted,
        RoleType::Admin | RoleType::Owner => NotifType::AdminInviteAccepted,
    };

    let mut tx = db.pool().begin().await?;
    if !close_invitation(&mut *tx, &invitation.id, InviteStatus::Accepted, now).await? {
        return Err(ApiError::BadRequest("Invitation already closed".into()));
    }
    roles::insert_grant(
        &mut *tx,
        &invitation.granter_id,
        &invitation.grantee_id,
        invitation.role_type,
        invitation.thread_id.as_deref(),
    )
    .await
    .map_err(|e| ApiError::on_unique(e, "Role grant already exists"))?;
    notify(
        &mut *tx,
        notif_type,
        &invitation.granter_id,
        &format!("{} accepted your invitation", actor.username),
        None,
        None,
        Some(&invitation.id),
    )
    .await?;
    tx.commit().await?;

    db.find_invitation_by_id(&invitation.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Invitation vanished after update".into()))
}

/// Reject an invitation. Always valid while PENDING; no expiry check needed.
pub async fn reject_invitation(
    db: &Database,
    inv_id: &str,
    actor: &User,
) -> Result<Invitation, ApiError> {
    let invitation = db
        .find_invitation_by_id(inv_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Invitation {} not found", inv_id)))?;

    if invitation.grantee_id != actor.id {
        return Err(ApiError::Forbidden("Not your invitation".into()));
    }
    match invitation.status {
        InviteStatus::Pending => {}
        InviteStatus::Accepted | InviteStatus::Rejected => {
            return Err(ApiError::BadRequest("Invitation already closed".into()));
        }
    }

    let notif_type = match invitation.role_type {
        RoleType::Moderator => NotifType::ModeratorInviteRejected,
        RoleType::Admin | RoleType::Owner => NotifType::AdminInviteRejected,
    };

    let mut tx = db.pool().begin().await?;
    if !close_invitation(&mut *tx, &invitation.id, InviteStatus::Rejected, Utc::now()).await? {
        return Err(ApiError::BadRequest("Invitation already closed".into()));
    }
    notify(
        &mut *tx,
        notif_type,
        &invitation.granter_id,
        &format!("{} declined your invitation", actor.username),
        None,
        None,
        Some(&invitation.id),
    )
    .await?;
    tx.commit().await?;

    db.find_invitation_by_id(&invitation.id)
        .await?
        .ok_or_else(|| ApiError::Internal("Invitation vanished after update".into()))
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// Invite a user to moderate a thread.
pub async fn invite_moderator(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((thread_id, username)): Path<(String, String)>,
) -> Result<Json<Invitation>, ApiError> {
    let thread = state
        .db
        .find_thread_by_id(&thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {} not found", thread_id)))?;
    let grantee = state
        .db
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))?;

    require_admin_or_moderator(&state.db, &auth.user_id, &thread.id).await?;
    let granter = auth.load(&state.db).await?;

    let invitation =
        create_invitation(&state.db, &granter, &grantee, RoleType::Moderator, Some(&thread)).await?;
    Ok(Json(invitation))
}

/// Invite a user to become a site admin.
pub async fn invite_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Invitation>, ApiError> {
    let grantee = state
        .db
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))?;

    require_admin(&state.db, &auth.user_id).await?;
    let granter = auth.load(&state.db).await?;

    let invitation = create_invitation(&state.db, &granter, &grantee, RoleType::Admin, None).await?;
    Ok(Json(invitation))
}

/// Accept an invitation addressed to the caller.
pub async fn accept_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(inv_id): Path<String>,
) -> Result<Json<Invitation>, ApiError> {
    let actor = auth.load(&state.db).await?;
    let invitation =
        accept_invitation(&state.db, &inv_id, &actor, state.config.invite_expiry_hours).await?;
    Ok(Json(invitation))
}

/// Reject an invitation addressed to the caller.
pub async fn reject_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(inv_id): Path<String>,
) -> Result<Json<Invitation>, ApiError> {
    let actor = auth.load(&state.db).await?;
    let invitation = reject_invitation(&state.db, &inv_id, &actor).await?;
    Ok(Json(invitation))
}

/// List the caller's received invitations.
pub async fn get_my_invites(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    let invitations = state.db.list_invitations_for(&auth.user_id).await?;
    Ok(Json(invitations))
}
