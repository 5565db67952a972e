use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{RecordingService, RetentionSweeper};
use crate::domain::ports::{Clock, SystemClock};

/// Background loop: retention sweeps and the midnight recording rollover
pub struct MaintenanceService {
    sweeper: Arc<RetentionSweeper>,
    recordings: Arc<RecordingService>,
    clock: Arc<dyn Clock>,
    day_check_interval: Duration,
}

impl MaintenanceService {
    pub fn new(sweeper: RetentionSweeper, recordings: Arc<RecordingService>) -> Self {
        Self {
            sweeper: Arc::new(sweeper),
            recordings,
            clock: Arc::new(SystemClock),
            day_check_interval: Duration::from_secs(60),
        }
    }

    pub fn with_day_check_interval(mut self, interval: Duration) -> Self {
        self.day_check_interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// The first sweep happens one check interval after start so a boot
    /// does not race the recorders it just launched.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let check_interval = self.sweeper.policy().check_interval();
        let mut disk_ticker = interval_at(Instant::now() + check_interval, check_interval);
        disk_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut day_ticker = interval_at(
            Instant::now() + self.day_check_interval,
            self.day_check_interval,
        );
        day_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_day = self.clock.today();
        info!(?check_interval, "Maintenance loop started");

        loop {
            tokio::select! {
                _ = disk_ticker.tick() => self.sweep().await,
                _ = day_ticker.tick() => {
                    let today = self.clock.today();
                    if today != last_day {
                        last_day = today;
                        let restarted = self.recordings.restart_all().await;
                        info!(%today, restarted, "Day changed, recordings rolled over");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Maintenance loop stopped");
    }

    /// Directory walks and deletes run on the blocking pool
    async fn sweep(&self) {
        let sweeper = Arc::clone(&self.sweeper);
        let today = self.clock.today();
        match tokio::task::spawn_blocking(move || sweeper.sweep(today)).await {
            Ok(Ok(report)) => debug!(?report, "Retention sweep finished"),
            Ok(Err(e)) => error!(error = %e, "Retention sweep failed"),
            Err(e) => error!(error = %e, "Retention sweep task panicked"),
        }
    }
}
