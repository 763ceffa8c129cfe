// =============================================================================
// Burrow Backend - Authentication Handlers
// =============================================================================

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::User;
use crate::error::ApiError;
use crate::AppState;

// -----------------------------------------------------------------------------
// JWT Claims
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub exp: i64,    // Expiry timestamp
    pub iat: i64,    // Issued at
}

// -----------------------------------------------------------------------------
// Auth Extractor
// -----------------------------------------------------------------------------

/// Authenticated principal extracted from the JWT bearer token.
///
/// Every workflow operation takes this explicitly; there is no ambient
/// "current user" anywhere in the service.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Get Authorization header
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        // Extract Bearer token
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid authorization format"))?;

        // Get JWT secret from environment (fallback for extractor)
        let secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| "default-dev-secret".to_string());

        // Validate token
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.claims.sub,
        })
    }
}

impl AuthUser {
    /// Load the full user row for this principal.
    pub async fn load(&self, db: &crate::db::Database) -> Result<User, ApiError> {
        db.find_user_by_id(&self.user_id)
            .await?
            .ok_or(ApiError::Unauthorized)
    }
}

// -----------------------------------------------------------------------------
// Request/Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

// -----------------------------------------------------------------------------
// Helper Functions
// -----------------------------------------------------------------------------

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| ApiError::Internal(format!("Bad hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a JWT token for a user.
pub fn generate_token(user_id: &str, secret: &str, expiry_hours: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("Token generation failed: {}", e)))
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// Register a new user.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if state.db.find_user_by_email(&req.email).await?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }
    if state.db.find_user_by_username(&req.username).await?.is_some() {
        return Err(ApiError::Conflict("Username already taken".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = uuid::Uuid::new_v4().to_string();
    let user = state
        .db
        .create_user(&user_id, &req.username, Some(&req.email), Some(&password_hash))
        .await?;

    let token = generate_token(&user.id, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;

    Ok(Json(AuthResponse { token, user }))
}

/// Login with email and password.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .db
        .find_user_by_email(&req.email)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let password_hash = user.password_hash.as_ref().ok_or(ApiError::Unauthorized)?;
    if !verify_password(&req.password, password_hash)? {
        return Err(ApiError::Unauthorized);
    }

    let token = generate_token(&user.id, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;

    Ok(Json(AuthResponse { token, user }))
}

/// Get current user from token.
pub async fn get_current_user(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<User>, ApiError> {
    let user = auth.load(&state.db).await?;
    Ok(Json(user))
}
