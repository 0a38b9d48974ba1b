//! Supervised background proxy refresh.
//!
//! Runs one refresh immediately and then one per interval. A panicking
//! refresh restarts the loop after a short delay; shutdown goes through a
//! watch channel and waits for the task to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};

use super::proxy::{ProxyPoolManager, RefreshReport};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Anything the supervisor can refresh on a schedule.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    async fn refresh_cycle(&self) -> RefreshReport;
}

#[async_trait]
impl RefreshTarget for ProxyPoolManager {
    async fn refresh_cycle(&self) -> RefreshReport {
        self.refresh_default().await
    }
}

pub struct RefreshSupervisor {
    target: Arc<dyn RefreshTarget>,
    interval: Duration,
    restart_delay: Duration,
}

impl RefreshSupervisor {
    pub fn new(target: Arc<dyn RefreshTarget>) -> Self {
        Self {
            target,
            interval: DEFAULT_REFRESH_INTERVAL,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Spawn the supervisor on the current tokio runtime.
    pub fn spawn(self) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            self.target,
            self.interval,
            self.restart_delay,
            shutdown_rx,
        ));
        RefreshHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running supervisor. Dropping it without calling
/// [`RefreshHandle::shutdown`] also stops the loop.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            log::warn!("proxy refresh supervisor ended abnormally: {err}");
        }
    }
}

async fn supervise(
    target: Arc<dyn RefreshTarget>,
    period: Duration,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut worker = tokio::spawn(refresh_loop(target.clone(), period));

        tokio::select! {
            joined = &mut worker => match joined {
                Ok(()) => return,
                Err(err) if err.is_panic() => {
                    log::error!(
                        "proxy refresh panicked, restarting in {:.1}s",
                        restart_delay.as_secs_f64()
                    );
                }
                Err(err) => {
                    log::warn!("proxy refresh task cancelled: {err}");
                    return;
                }
            },
            _ = shutdown.changed() => {
                worker.abort();
                let _ = worker.await;
                log::info!("proxy refresh supervisor stopped");
                return;
            }
        }

        tokio::select! {
            _ = sleep(restart_delay) => {}
            _ = shutdown.changed() => {
                log::info!("proxy refresh supervisor stopped");
                return;
            }
        }
    }
}

async fn refresh_loop(target: Arc<dyn RefreshTarget>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = target.refresh_cycle().await;
        log::debug!(
            "scheduled proxy refresh finished with {} working proxies",
            report.working
        );
    }
}
