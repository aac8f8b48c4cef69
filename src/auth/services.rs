use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    dto::{AuthToken, RefreshAuthTokenInput, SignInInput},
    errors::AuthError,
    password::check_password_hash,
    token::Token,
    token_store::TokenStore,
};
use crate::config::TokenConfig;
use crate::users::{User, UserRepository};

/// Sign-in, bearer verification, refresh rotation and sign-out.
pub struct AuthenticationService {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserRepository>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

enum RefreshMiss {
    NoPair,
    Expired,
}

impl AuthenticationService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserRepository>,
        config: &TokenConfig,
    ) -> Self {
        Self {
            tokens,
            users,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
        }
    }

    fn auth_token(&self, token: &Token) -> AuthToken {
        AuthToken {
            user_id: token.user_uid,
            token: token.hash.clone(),
            refresh_token: token.refreshing_hash.clone(),
            expires_at: token.expires_at(self.access_ttl),
        }
    }

    pub async fn sign_in(&self, input: SignInInput) -> Result<AuthToken, AuthError> {
        let user = self
            .users
            .find_by_email(&input.email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !user.is_confirmed() {
            warn!(user_id = %user.uid, "sign-in attempt by unconfirmed user");
            return Err(AuthError::UserNotConfirmed);
        }
        if !check_password_hash(&input.password, &user.password_hash)? {
            warn!(user_id = %user.uid, "sign-in with invalid password");
            return Err(AuthError::InvalidPassword);
        }

        let token = Token::issue(user.uid);
        self.tokens.create(&token, self.refresh_ttl).await?;
        info!(user_id = %user.uid, "user signed in");
        Ok(self.auth_token(&token))
    }

    /// Resolves a bearer hash to its live token.
    pub async fn authenticate(&self, hash: &str) -> Result<Token, AuthError> {
        let token = self
            .tokens
            .find_by_hash(hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if token.is_expired(self.access_ttl, OffsetDateTime::now_utc()) {
            debug!(user_id = %token.user_uid, "bearer token expired");
            return Err(AuthError::TokenExpired);
        }
        Ok(token)
    }

    /// Exchanges a matching `(auth, refresh)` pair for a new one. Of several
    /// concurrent calls with the same pair exactly one wins; the others find
    /// the pair gone and get [`AuthError::TokenDoesNotExist`].
    pub async fn refresh_token(
        &self,
        input: RefreshAuthTokenInput,
    ) -> Result<AuthToken, AuthError> {
        let now = OffsetDateTime::now_utc();
        let refresh_ttl = self.refresh_ttl;
        let mut miss = RefreshMiss::NoPair;

        let mut rotate = |tokens: &[Token]| {
            miss = RefreshMiss::NoPair;
            let index = tokens.iter().position(|t| {
                t.hash == input.auth_token && t.refreshing_hash == input.refresh_token
            })?;
            if tokens[index].is_expired(refresh_ttl, now) {
                miss = RefreshMiss::Expired;
                return None;
            }
            Some((index, Token::issue(input.user_id)))
        };
        let rotated = self
            .tokens
            .find_for_update(input.user_id, refresh_ttl, &mut rotate)
            .await?;

        match (rotated, miss) {
            (Some(token), _) => {
                info!(user_id = %input.user_id, "token refreshed");
                Ok(self.auth_token(&token))
            }
            (None, RefreshMiss::Expired) => Err(AuthError::TokenExpired),
            (None, RefreshMiss::NoPair) => Err(AuthError::TokenDoesNotExist),
        }
    }

    pub async fn sign_out(&self, hash: &str) -> Result<(), AuthError> {
        self.tokens.delete_by_hash(hash).await?;
        Ok(())
    }

    pub async fn me(&self, uid: Uuid) -> Result<User, AuthError> {
        self.users.find_by_uid(uid).await?.ok_or(AuthError::UserNotFound)
    }
}
