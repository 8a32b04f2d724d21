use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Single-worker periodic runner.
///
/// Ticks start `period` apart, measured start to start. A tick that outlives
/// the period delays the next one until it finishes; missed ticks are not
/// replayed and two ticks never overlap.
pub struct Scheduler {
    period: Duration,
    grace: Duration,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(period: Duration, grace: Duration) -> Self {
        Self {
            period,
            grace,
            state: AtomicU8::new(SchedulerState::Idle as u8),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Runs `tick` until `shutdown` is cancelled. The first tick starts
    /// immediately.
    ///
    /// On shutdown no further tick is admitted; an in-flight tick gets up to
    /// the grace period to finish and is abandoned after that.
    pub async fn run<F, Fut>(&self, mut tick: F, shutdown: CancellationToken)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.set_state(SchedulerState::Running);
        tracing::info!(
            period_secs = self.period.as_secs_f64(),
            grace_secs = self.grace.as_secs_f64(),
            "Scheduler started"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut in_flight = tokio::spawn(tick());
            tokio::select! {
                biased;
                result = &mut in_flight => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Tick task failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        grace_secs = self.grace.as_secs_f64(),
                        "Shutdown requested, waiting for in-flight tick"
                    );
                    match timeout(self.grace, &mut in_flight).await {
                        Ok(_) => tracing::info!("In-flight tick finished"),
                        Err(_) => {
                            tracing::warn!("Grace period elapsed, abandoning in-flight tick");
                            in_flight.abort();
                        }
                    }
                    break;
                }
            }
        }

        self.set_state(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");
    }
}
