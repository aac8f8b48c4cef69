//! Typed failures returned by the auth services. Storage and mail failures
//! ride along opaquely in `Internal`.

use thiserror::Error;

use crate::auth::token_store::TokenStoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found")]
    UserNotFound,
    #[error("user is not confirmed")]
    UserNotConfirmed,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("token does not exist")]
    TokenDoesNotExist,
    #[error("token was modified concurrently")]
    Conflict,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<TokenStoreError> for AuthError {
    fn from(err: TokenStoreError) -> Self {
        match err {
            TokenStoreError::Conflict(_) => AuthError::Conflict,
            TokenStoreError::Backend(e) => AuthError::Internal(e),
            other => AuthError::Internal(anyhow::Error::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignUpError {
    #[error("email is already occupied")]
    EmailOccupied,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("user not found")]
    UserNotFound,
    #[error("confirmation code mismatched")]
    CodeMismatch,
    #[error("could not confirm this user")]
    CouldNotConfirm,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
