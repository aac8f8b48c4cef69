use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A unit of periodic background work.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self) -> anyhow::Result<()>;
}

struct Registration {
    worker: Arc<dyn Worker>,
    interval: Duration,
    initial_delay: Duration,
}

/// Runs every registered worker on its own loop: wait `initial_delay`, then
/// process, sleep `interval`, repeat. A slow run pushes the next one out, so
/// runs of the same worker never overlap.
#[derive(Default)]
pub struct Scheduler {
    registrations: Vec<Registration>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        worker: Arc<dyn Worker>,
        interval: Duration,
        initial_delay: Duration,
    ) {
        self.registrations.push(Registration {
            worker,
            interval,
            initial_delay,
        });
    }

    /// Spawns one task per worker. Cancellation is observed between runs;
    /// a run already in flight completes.
    pub fn start(self, shutdown: CancellationToken) -> SchedulerHandle {
        let mut tasks = JoinSet::new();
        for reg in self.registrations {
            tasks.spawn(run_loop(reg, shutdown.clone()));
        }
        SchedulerHandle { tasks }
    }
}

async fn run_loop(reg: Registration, shutdown: CancellationToken) {
    let name = reg.worker.name();
    info!(worker = name, interval = ?reg.interval, "worker loop started");

    tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            info!(worker = name, "worker loop stopped");
            return;
        }
        () = tokio::time::sleep(reg.initial_delay) => {}
    }

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        debug!(worker = name, "processing");
        if let Err(e) = reg.worker.process().await {
            error!(worker = name, error = ?e, "worker run failed");
        }

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(reg.interval) => {}
        }
    }
    info!(worker = name, "worker loop stopped");
}

pub struct SchedulerHandle {
    tasks: JoinSet<()>,
}

impl SchedulerHandle {
    /// Waits for every worker loop to exit.
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}
