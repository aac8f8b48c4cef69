use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::users::UserRepository;
use crate::worker::scheduler::Worker;

/// Deletes pending users whose sign-up request outlived `expiration`.
pub struct ObsoleteRequestWorker {
    users: Arc<dyn UserRepository>,
    expiration: Duration,
}

impl ObsoleteRequestWorker {
    pub fn new(users: Arc<dyn UserRepository>, expiration: Duration) -> Self {
        Self { users, expiration }
    }
}

#[async_trait]
impl Worker for ObsoleteRequestWorker {
    fn name(&self) -> &'static str {
        "obsolete_sign_up_requests"
    }

    async fn process(&self) -> anyhow::Result<()> {
        let cutoff = OffsetDateTime::now_utc() - self.expiration;
        let deleted = self.users.delete_all_pending_older_than(cutoff).await?;
        info!(deleted, %cutoff, "removed obsolete sign-up requests");
        Ok(())
    }
}
