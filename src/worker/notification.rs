use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::mail::{Letter, Mailer};
use crate::users::{User, UserRepository};
use crate::worker::scheduler::Worker;

/// Mails the confirmation code for one pending sign-up and stamps it as
/// notified.
pub struct NotificationHandler {
    mailer: Arc<dyn Mailer>,
    users: Arc<dyn UserRepository>,
}

impl NotificationHandler {
    pub fn new(mailer: Arc<dyn Mailer>, users: Arc<dyn UserRepository>) -> Self {
        Self { mailer, users }
    }

    pub async fn handle(&self, user: &User) -> anyhow::Result<()> {
        let req = user
            .sign_up_req
            .as_ref()
            .with_context(|| format!("user {} has no sign-up request", user.uid))?;

        let letter = Letter {
            to: vec![user.email.clone()],
            subject: "Confirm your registration".into(),
            body: format!(
                "Hello dear {}!\nHere's your confirmation code: {}\nConfirmation token: {}",
                user.name, req.code, req.token
            ),
        };
        self.mailer.send(&letter).await.context("send confirmation letter")?;

        self.users
            .save_notified_sign_up_req_time(user.uid, OffsetDateTime::now_utc())
            .await
            .context("stamp notified_at")?;
        Ok(())
    }
}

pub struct NotificationWorker {
    users: Arc<dyn UserRepository>,
    handler: NotificationHandler,
    item_timeout: Duration,
}

impl NotificationWorker {
    pub fn new(
        users: Arc<dyn UserRepository>,
        handler: NotificationHandler,
        item_timeout: Duration,
    ) -> Self {
        Self {
            users,
            handler,
            item_timeout,
        }
    }
}

#[async_trait]
impl Worker for NotificationWorker {
    fn name(&self) -> &'static str {
        "sign_up_notification"
    }

    /// Any failed item aborts the rest of the batch; unstamped users are
    /// picked up again on the next run.
    async fn process(&self) -> anyhow::Result<()> {
        let users = self.users.find_all_not_notified_sign_up_requests().await?;

        for user in &users {
            info!(email = %user.email, "sending sign-up notification");
            tokio::time::timeout(self.item_timeout, self.handler.handle(user))
                .await
                .with_context(|| format!("notification for {} timed out", user.uid))??;
        }
        Ok(())
    }
}
