// =============================================================================
// Burrow Backend - Database Layer
// =============================================================================
// Connection pool, schema migrations, and the content entities (users,
// threads, posts, comments). The moderation tables are created here too, but
// their queries live with their feature modules.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

/// User model.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Thread model - the community scoping unit that owns moderators,
/// report types, and the content being moderated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thread {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Post model. Only the moderation fields (`is_locked`, `is_removed`,
/// `reports_disabled`, `report_count`) are mutated by this service's
/// workflow; the rest is identity and content.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub thread_id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub is_locked: bool,
    pub is_removed: bool,
    pub reports_disabled: bool,
    pub report_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Comment model. Carries the same moderation fields as a post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub is_locked: bool,
    pub is_removed: bool,
    pub reports_disabled: bool,
    pub report_count: i64,
    pub created_at: DateTime<Utc>,
}

/// User response (without sensitive fields).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserLink {
    pub id: String,
    pub username: String,
}

impl From<User> for UserLink {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(url: &str) -> Result<Self, sqlx::Error> {
        // Add create_if_missing option for SQLite
        let url_with_options = if url.starts_with("sqlite:") && !url.contains("?") {
            format!("{}?mode=rwc", url)
        } else if url.starts_with("sqlite:") && !url.contains("mode=") {
            format!("{}&mode=rwc", url)
        } else {
            url.to_string()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url_with_options)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        // Users table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                password_hash TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Threads table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_by TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Posts table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                author_id TEXT NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                is_locked INTEGER NOT NULL DEFAULT 0,
                is_removed INTEGER NOT NULL DEFAULT 0,
                reports_disabled INTEGER NOT NULL DEFAULT 0,
                report_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Comments table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL REFERENCES posts(id),
                author_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                is_locked INTEGER NOT NULL DEFAULT 0,
                is_removed INTEGER NOT NULL DEFAULT 0,
                reports_disabled INTEGER NOT NULL DEFAULT 0,
                report_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Role grants table. A moderator grant is scoped to a thread;
        // admin/owner grants are global. The unique index uses COALESCE
        // because SQLite treats NULLs as distinct in unique indexes.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_grants (
                id TEXT PRIMARY KEY,
                granter_id TEXT NOT NULL REFERENCES users(id),
                grantee_id TEXT NOT NULL REFERENCES users(id),
                role_type TEXT NOT NULL CHECK (role_type IN ('OWNER', 'ADMIN', 'MODERATOR')),
                thread_id TEXT REFERENCES threads(id),
                granted_at TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK ((role_type = 'MODERATOR') = (thread_id IS NOT NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_role_grants_unique
            ON role_grants(grantee_id, role_type, COALESCE(thread_id, ''))
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Invitations table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS invitations (
                id TEXT PRIMARY KEY,
                granter_id TEXT NOT NULL REFERENCES users(id),
                grantee_id TEXT NOT NULL REFERENCES users(id),
                role_type TEXT NOT NULL CHECK (role_type IN ('OWNER', 'ADMIN', 'MODERATOR')),
                thread_id TEXT REFERENCES threads(id),
                status TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'ACCEPTED', 'REJECTED')),
                invited_at TEXT NOT NULL DEFAULT (datetime('now')),
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Report types table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_types (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                name TEXT NOT NULL,
                description TEXT,
                UNIQUE(thread_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Reports table. The partial unique index enforces "one open report
        // per (reporter, post, comment)" in storage; resolved history never
        // blocks a new report on the same target. report_type_id carries no
        // foreign key: deleting a report type leaves resolved history with a
        // dangling label rather than blocking the delete.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                reporter_id TEXT NOT NULL REFERENCES users(id),
                post_id TEXT NOT NULL REFERENCES posts(id),
                comment_id TEXT REFERENCES comments(id),
                reporter_comment TEXT,
                report_type_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'RESOLVED', 'REJECTED')),
                action TEXT
                    CHECK (action IS NULL OR action IN ('LOCKED', 'UNLOCKED', 'REMOVED', 'SKIPPED')),
                mod_comment TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_open_unique
            ON reports(reporter_id, post_id, COALESCE(comment_id, ''))
            WHERE status = 'PENDING'
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Notifications table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                notif_type TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                sub_title TEXT,
                content TEXT,
                res_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                seen_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the hot lookups
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_role_grants_grantee ON role_grants(grantee_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_role_grants_thread ON role_grants(thread_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_invitations_grantee ON invitations(grantee_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_report_types_thread ON report_types(thread_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_post ON reports(post_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)")
            .execute(&self.pool)
            .await;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // =========================================================================
    // User Methods
    // =========================================================================

    /// Find user by ID.
    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find user by username.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find user by email.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// Create a new user.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        email: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_user_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    // =========================================================================
    // Thread / Post / Comment Methods
    // =========================================================================

    /// Find thread by ID.
    pub async fn find_thread_by_id(&self, id: &str) -> Result<Option<Thread>, sqlx::Error> {
        sqlx::query_as::<_, Thread>("SELECT * FROM threads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List all threads, newest first.
    pub async fn list_threads(&self) -> Result<Vec<Thread>, sqlx::Error> {
        sqlx::query_as::<_, Thread>("SELECT * FROM threads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    /// Create a new thread.
    pub async fn create_thread(&self, name: &str, created_by: &str) -> Result<Thread, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO threads (id, name, created_by, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_thread_by_id(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find post by ID.
    pub async fn find_post_by_id(&self, id: &str) -> Result<Option<Post>, sqlx::Error> {
        sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Create a new post.
    pub async fn create_post(
        &self,
        thread_id: &str,
        author_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Post, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO posts (id, thread_id, author_id, title, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(thread_id)
        .bind(author_id)
        .bind(title)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_post_by_id(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find comment by ID.
    pub async fn find_comment_by_id(&self, id: &str) -> Result<Option<Comment>, sqlx::Error> {
        sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Create a new comment.
    pub async fn create_comment(
        &self,
        post_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<Comment, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, author_id, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(post_id)
        .bind(author_id)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_comment_by_id(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}
