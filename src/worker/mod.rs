use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

pub mod notification;
pub mod obsolete;
pub mod scheduler;

use notification::{NotificationHandler, NotificationWorker};
use obsolete::ObsoleteRequestWorker;
use scheduler::Scheduler;

/// Registers the sign-up notification and cleanup workers.
pub fn build_scheduler(state: &AppState) -> Scheduler {
    let cfg = &state.config.worker;
    let initial_delay = Duration::from_secs(cfg.initial_delay_secs);

    let mut scheduler = Scheduler::new();
    scheduler.register(
        Arc::new(NotificationWorker::new(
            state.users.clone(),
            NotificationHandler::new(state.mailer.clone(), state.users.clone()),
            Duration::from_secs(cfg.notification_item_timeout_secs),
        )),
        Duration::from_secs(cfg.notification_interval_secs),
        initial_delay,
    );
    scheduler.register(
        Arc::new(ObsoleteRequestWorker::new(
            state.users.clone(),
            state.config.sign_up_request_ttl(),
        )),
        Duration::from_secs(cfg.obsolete_interval_secs),
        initial_delay,
    );
    scheduler
}
