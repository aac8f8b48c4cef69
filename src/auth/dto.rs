use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::{User, UserStatus};

/// Request body for sign-up.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Returned after sign-up; `token` keys the confirmation link.
#[derive(Debug, Serialize)]
pub struct SignUpOutput {
    pub token: String,
}

/// Request body for sign-up confirmation.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmSignUpInput {
    pub token: String,
    pub code: String,
}

/// Request body for sign-in.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

/// Request body for exchanging a token pair.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshAuthTokenInput {
    pub user_id: Uuid,
    pub auth_token: String,
    pub refresh_token: String,
}

/// Issued session returned by sign-in and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    pub user_id: Uuid,
    pub token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: UserStatus,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.uid,
            name: user.name,
            email: user.email,
            status: user.status,
        }
    }
}
