use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant};

/// One duration tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    pub elapsed: Duration,
    pub limit_reached: bool,
}

/// Periodic elapsed-time tracker for one recording
///
/// The tick task is an owned resource: it stops on `cancel`, on drop, or when
/// the tick callback returns `ControlFlow::Break`.
pub struct DurationClock {
    started_at: Instant,
    limit: Duration,
    tick: Option<AbortHandle>,
}

impl DurationClock {
    /// Start ticking every `period`, first tick one period after now
    pub fn start<F>(limit: Duration, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(ClockTick) -> ControlFlow<()> + Send + 'static,
    {
        let started_at = Instant::now();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(started_at + period, period);

            loop {
                interval.tick().await;

                let elapsed = started_at.elapsed();
                let tick = ClockTick {
                    elapsed,
                    limit_reached: elapsed >= limit,
                };

                if on_tick(tick).is_break() {
                    break;
                }
            }
        });

        Self {
            started_at,
            limit,
            tick: Some(task.abort_handle()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn is_armed(&self) -> bool {
        self.tick.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(tick) = self.tick.take() {
            tick.abort();
        }
    }
}

impl Drop for DurationClock {
    fn drop(&mut self) {
        self.cancel();
    }
}
