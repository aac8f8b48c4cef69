use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Account lifecycle. Transitions only go `Pending -> Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Confirmed,
}

/// Outstanding confirmation attached to a pending user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub token: String, // confirmation-link key
    pub code: String,  // numeric PIN sent by email
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub notified_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub created_at: OffsetDateTime,
    pub confirmed_at: Option<OffsetDateTime>,
    pub sign_up_req: Option<SignUpRequest>,
}

impl User {
    /// A freshly signed-up account awaiting confirmation.
    pub fn pending(
        name: &str,
        email: &str,
        password_hash: String,
        sign_up_req: SignUpRequest,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            status: UserStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            confirmed_at: None,
            sign_up_req: Some(sign_up_req),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == UserStatus::Confirmed
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub created_at: OffsetDateTime,
    pub confirmed_at: Option<OffsetDateTime>,
    pub sign_up_req: Option<Json<SignUpRequest>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            uid: row.uid,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            status: row.status,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
            sign_up_req: row.sign_up_req.map(|Json(req)| req),
        }
    }
}
