use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::users::repo_types::{User, UserRow, UserStatus};

const USER_COLUMNS: &str =
    "uid, name, email, password_hash, status, created_at, confirmed_at, sign_up_req";

#[derive(Debug, Error)]
pub enum UserRepoError {
    /// The unique email index rejected the insert.
    #[error("user with this email already exists")]
    Duplicate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for [`User`] documents.
///
/// Lookups return `Ok(None)` when nothing matches so callers can tell a
/// missing record apart from a storage failure.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_uid(&self, uid: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_sign_up_req_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: &User) -> Result<(), UserRepoError>;
    /// Flips a pending user to confirmed and drops its sign-up request in one
    /// conditional update. `Ok(false)` means nothing was pending.
    async fn confirm_and_delete_sign_up_req(&self, uid: Uuid) -> anyhow::Result<bool>;
    async fn find_all_not_notified_sign_up_requests(&self) -> anyhow::Result<Vec<User>>;
    async fn save_notified_sign_up_req_time(
        &self,
        uid: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Removes pending users created before `cutoff`, returning how many went.
    async fn delete_all_pending_older_than(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, filter: &str, value: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(User::from))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.find_one("email", email).await.context("find user by email")
    }

    async fn find_by_uid(&self, uid: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE uid = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(uid)
            .fetch_optional(&self.db)
            .await
            .context("find user by uid")?;
        Ok(row.map(User::from))
    }

    async fn find_by_sign_up_req_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.find_one("sign_up_req ->> 'token'", token)
            .await
            .context("find user by sign-up token")
    }

    async fn create(&self, user: &User) -> Result<(), UserRepoError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (uid, name, email, password_hash, status, created_at, confirmed_at, sign_up_req)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.uid)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.status)
        .bind(user.created_at)
        .bind(user.confirmed_at)
        .bind(user.sign_up_req.clone().map(Json))
        .execute(&self.db)
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    async fn confirm_and_delete_sign_up_req(&self, uid: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
            SET status = $2, confirmed_at = now(), sign_up_req = NULL
            WHERE uid = $1 AND status = $3
            "#,
        )
        .bind(uid)
        .bind(UserStatus::Confirmed)
        .bind(UserStatus::Pending)
        .execute(&self.db)
        .await
        .context("confirm user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_all_not_notified_sign_up_requests(&self) -> anyhow::Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE status = $1 AND sign_up_req IS NOT NULL \
             AND sign_up_req ->> 'notified_at' IS NULL"
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(UserStatus::Pending)
            .fetch_all(&self.db)
            .await
            .context("find not notified sign-up requests")?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn save_notified_sign_up_req_time(
        &self,
        uid: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let at = at.format(&Rfc3339).context("format notification time")?;
        sqlx::query(
            r#"
            UPDATE users
            SET sign_up_req = jsonb_set(sign_up_req, '{notified_at}', to_jsonb($2::text))
            WHERE uid = $1 AND sign_up_req IS NOT NULL
            "#,
        )
        .bind(uid)
        .bind(at)
        .execute(&self.db)
        .await
        .context("save sign-up notification time")?;
        Ok(())
    }

    async fn delete_all_pending_older_than(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM users WHERE status = $1 AND created_at < $2")
            .bind(UserStatus::Pending)
            .bind(cutoff)
            .execute(&self.db)
            .await
            .context("delete obsolete pending users")?;
        Ok(res.rows_affected())
    }
}

fn map_insert_error(err: sqlx::Error) -> UserRepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && db_err.constraint() == Some("uniq_email") {
            return UserRepoError::Duplicate;
        }
    }
    UserRepoError::Other(anyhow::Error::new(err).context("insert user"))
}
