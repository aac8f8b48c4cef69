use std::sync::Arc;

use anyhow::Context;

use crate::auth::services::AuthenticationService;
use crate::auth::signup::{ConfirmSignUpService, SignUpService};
use crate::auth::token_store::{RedisTokenStore, TokenStore};
use crate::config::AppConfig;
use crate::db;
use crate::mail::{Mailer, SesMailer};
use crate::users::{PgUserRepository, UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub mailer: Arc<dyn Mailer>,
    pub auth: Arc<AuthenticationService>,
    pub sign_up: Arc<SignUpService>,
    pub confirm_sign_up: Arc<ConfirmSignUpService>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db = db::connect(&config.database_url).await?;
        let users = Arc::new(PgUserRepository::new(db)) as Arc<dyn UserRepository>;

        let tokens = Arc::new(
            RedisTokenStore::connect(&config.redis_url, config.redis_timeout())
                .await
                .context("connect to redis")?,
        ) as Arc<dyn TokenStore>;

        let mailer = Arc::new(SesMailer::new(&config.mail).await?) as Arc<dyn Mailer>;

        Ok(Self::from_parts(config, users, tokens, mailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let auth = Arc::new(AuthenticationService::new(
            tokens,
            users.clone(),
            &config.token,
        ));
        Self {
            sign_up: Arc::new(SignUpService::new(users.clone())),
            confirm_sign_up: Arc::new(ConfirmSignUpService::new(users.clone())),
            auth,
            config,
            users,
            mailer,
        }
    }
}
