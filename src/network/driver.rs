//! Round Driver
//!
//! Background task that ticks the shared scheduler at the configured period.
//! Each tick takes the write lock for the whole transition, so cancelling the
//! task between ticks never leaves a round half-advanced.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::engine::scheduler::RoundScheduler;

/// Scheduler shared between the driver and every connection.
pub type SharedScheduler = Arc<RwLock<RoundScheduler>>;

/// Ticks the scheduler until shutdown.
pub struct RoundDriver {
    scheduler: SharedScheduler,
    tick_period: Duration,
}

impl RoundDriver {
    /// Create a driver for `scheduler`.
    pub fn new(scheduler: SharedScheduler, tick_period: Duration) -> Self {
        Self {
            scheduler,
            tick_period: tick_period.max(Duration::from_millis(1)),
        }
    }

    /// Run on a background task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.tick_period);
        // A late tick is caught up by the scheduler itself; bursts add nothing.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Round driver started ({:?} ticks)", self.tick_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut scheduler = self.scheduler.write().await;
                    let _phase = scheduler.advance(Instant::now());

                    #[cfg(feature = "debug-tracing")]
                    trace!(
                        round = %scheduler.round().id,
                        phase = ?_phase,
                        multiplier = scheduler.round().multiplier,
                        "tick"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Round driver stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::crash_point::testing::ScriptedGenerator;
    use crate::engine::events::EngineEvent;
    use crate::engine::state::Phase;

    fn fast_scheduler(crash_point: f64) -> SharedScheduler {
        let config = EngineConfig {
            waiting_duration: Duration::from_millis(30),
            cooldown_duration: Duration::from_millis(30),
            tick_period: Duration::from_millis(5),
            ..Default::default()
        };
        let generator = Box::new(ScriptedGenerator::constant(crash_point));
        Arc::new(RwLock::new(RoundScheduler::new(config, generator, Instant::now())))
    }

    #[tokio::test]
    async fn test_driver_runs_rounds() {
        let scheduler = fast_scheduler(1.01);
        let mut events = scheduler.read().await.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = RoundDriver::new(scheduler.clone(), Duration::from_millis(5)).spawn(shutdown_rx);

        let mut seen = Vec::new();
        let wait = tokio::time::timeout(Duration::from_secs(5), async {
            while let Ok(event) = events.recv().await {
                match event {
                    EngineEvent::RoundStarted { .. } => seen.push("started"),
                    EngineEvent::MultiplierUpdate { value, .. } => {
                        assert!(value >= 1.0 && value < 1.01);
                    }
                    EngineEvent::RoundCrashed { crash_point, .. } => {
                        assert_eq!(crash_point, 1.01);
                        seen.push("crashed");
                    }
                    EngineEvent::RoundWaiting { .. } => {
                        seen.push("waiting");
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await;

        assert!(wait.is_ok(), "round did not complete in time");
        assert_eq!(seen, vec!["started", "crashed", "waiting"]);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_driver_stops_on_shutdown() {
        let scheduler = fast_scheduler(50.0);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = RoundDriver::new(scheduler.clone(), Duration::from_millis(5)).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver did not stop")
            .unwrap();

        // Stopped mid-round; state is still coherent
        let s = scheduler.read().await;
        assert_eq!(s.round().phase, Phase::Running);
        assert!(s.round().multiplier >= 1.0);
    }
}
