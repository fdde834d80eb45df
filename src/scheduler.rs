use crate::engine::{SweepKind, UpdateEngine};
use crate::error::ScanError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct Schedule {
    /// Front-page sweep cadence. Sources with a longer interval of their own
    /// are skipped until it elapses.
    pub primary: Duration,
    pub backup: Duration,
    pub backup_delay: Duration,
}

impl Schedule {
    pub fn from_config(config: &crate::config::SchedulerConfig, engine: &UpdateEngine) -> Self {
        let configured = Duration::from_secs(config.update_interval_mins * 60);
        Self {
            primary: engine.tick_interval().min(configured).max(Duration::from_secs(60)),
            backup: Duration::from_secs(config.backup_interval_hours.max(1) * 3600),
            backup_delay: Duration::from_secs(config.backup_startup_delay_secs),
        }
    }
}

/// Start both sweep loops. Dropping the handles does not stop them; call
/// `abort` on shutdown.
pub fn spawn(engine: Arc<UpdateEngine>, schedule: Schedule) -> Vec<JoinHandle<()>> {
    log::info!(
        "Scheduling front-page sweeps every {}s and full sweeps every {}s (first in {}s)",
        schedule.primary.as_secs(),
        schedule.backup.as_secs(),
        schedule.backup_delay.as_secs()
    );
    vec![
        spawn_loop(engine.clone(), SweepKind::FrontPage, Duration::ZERO, schedule.primary),
        spawn_loop(engine, SweepKind::Full, schedule.backup_delay, schedule.backup),
    ]
}

fn spawn_loop(engine: Arc<UpdateEngine>, kind: SweepKind, delay: Duration, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            run_once(&engine, kind).await;
        }
    })
}

pub async fn run_once(engine: &UpdateEngine, kind: SweepKind) {
    match engine.run_sweep(kind).await {
        Ok(report) => {
            for source in report.sources.iter().filter(|s| s.aborted.is_some()) {
                log::warn!(
                    "[{}] Sweep cut short, {} series skipped: {}",
                    source.source,
                    source.skipped,
                    source.aborted.as_deref().unwrap_or_default()
                );
            }
        }
        Err(ScanError::SweepInProgress) => {
            log::info!("Skipping {:?} sweep, the previous one is still running", kind);
        }
        Err(e) => log::error!("{:?} sweep failed: {}", kind, e),
    }
}
