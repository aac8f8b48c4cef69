use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    dto::{ConfirmSignUpInput, SignUpInput, SignUpOutput},
    errors::{ConfirmError, SignUpError},
    password::hash_password,
    token::{random_code, random_string, TOKEN_LEN},
};
use crate::users::{SignUpRequest, User, UserRepoError, UserRepository};

pub struct SignUpService {
    users: Arc<dyn UserRepository>,
}

impl SignUpService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Creates a pending user with a fresh confirmation token and code.
    /// Email uniqueness is left to the repository's unique index.
    pub async fn sign_up(&self, input: SignUpInput) -> Result<SignUpOutput, SignUpError> {
        let password_hash = hash_password(&input.password)?;
        let sign_up_req = SignUpRequest {
            token: random_string(TOKEN_LEN),
            code: random_code(),
            notified_at: None,
        };
        let token = sign_up_req.token.clone();
        let user = User::pending(&input.name, &input.email, password_hash, sign_up_req);

        match self.users.create(&user).await {
            Ok(()) => {
                info!(user_id = %user.uid, email = %user.email, "user signed up");
                Ok(SignUpOutput { token })
            }
            Err(UserRepoError::Duplicate) => {
                warn!(email = %user.email, "email already registered");
                Err(SignUpError::EmailOccupied)
            }
            Err(UserRepoError::Other(e)) => Err(SignUpError::Internal(e)),
        }
    }
}

pub struct ConfirmSignUpService {
    users: Arc<dyn UserRepository>,
}

impl ConfirmSignUpService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn confirm(&self, input: ConfirmSignUpInput) -> Result<(), ConfirmError> {
        let user = self
            .users
            .find_by_sign_up_req_token(&input.token)
            .await?
            .ok_or(ConfirmError::UserNotFound)?;

        let code_matches = user
            .sign_up_req
            .as_ref()
            .is_some_and(|req| req.code == input.code);
        if !code_matches {
            warn!(user_id = %user.uid, "confirmation code mismatch");
            return Err(ConfirmError::CodeMismatch);
        }

        if !self.users.confirm_and_delete_sign_up_req(user.uid).await? {
            warn!(user_id = %user.uid, "user was not pending, nothing confirmed");
            return Err(ConfirmError::CouldNotConfirm);
        }
        info!(user_id = %user.uid, "user confirmed");
        Ok(())
    }
}
