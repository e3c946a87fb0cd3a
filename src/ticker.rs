//! A fixed-interval (50 ms / 20 Hz) per-connection scheduler for keep-alives and other periodic
//! work (§4.5).
//!
//! Scheduled tasks run by tick count rather than wall-clock delay, with a `max_lag` collapse so a
//! stalled loop catches up by running its callback once instead of once per missed tick, and
//! panicking callbacks are caught and logged rather than taking the ticker down.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

const BASE_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_MAX_LAG: u64 = 40;

enum Kind {
    Loop { interval: u64 },
    Delay { target: u64 },
}

struct Task {
    id: u64,
    kind: Kind,
    callback: Box<dyn FnMut() + Send>,
    active: bool,
}

/// A handle to a scheduled task. Dropping it does not cancel the task — call [`Ticker::stop`]
/// explicitly, the way the source's `task.stop()` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(u64);

pub struct Ticker {
    tick: u64,
    interval: Duration,
    max_lag: u64,
    tasks: Vec<Task>,
    next_id: u64,
    last: Instant,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    pub fn new() -> Self {
        Self {
            tick: 0,
            interval: BASE_INTERVAL,
            max_lag: DEFAULT_MAX_LAG,
            tasks: Vec::new(),
            next_id: 0,
            last: Instant::now(),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Runs `callback` every `interval_ticks` ticks.
    pub fn add_loop(
        &mut self,
        interval_ticks: u64,
        callback: impl FnMut() + Send + 'static,
    ) -> TaskHandle {
        self.push(
            Kind::Loop {
                interval: interval_ticks.max(1),
            },
            callback,
        )
    }

    /// Runs `callback` once, `delay_ticks` ticks from now, unless stopped or restarted first.
    pub fn add_delay(
        &mut self,
        delay_ticks: u64,
        callback: impl FnMut() + Send + 'static,
    ) -> TaskHandle {
        self.push(
            Kind::Delay {
                target: self.tick + delay_ticks,
            },
            callback,
        )
    }

    fn push(&mut self, kind: Kind, callback: impl FnMut() + Send + 'static) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            kind,
            callback: Box::new(callback),
            active: true,
        });
        TaskHandle(id)
    }

    /// Cancels a scheduled task. A no-op if it has already fired (delay tasks) or was stopped.
    pub fn stop(&mut self, handle: TaskHandle) {
        self.tasks.retain(|t| t.id != handle.0);
    }

    /// Resets a delay task's countdown to `delay_ticks` from now. A no-op if the handle refers to
    /// a loop task or no longer exists.
    pub fn restart(&mut self, handle: TaskHandle, delay_ticks: u64) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == handle.0) {
            if let Kind::Delay { target } = &mut task.kind {
                *target = self.tick + delay_ticks;
            }
        }
    }

    /// Removes every scheduled task.
    pub fn remove_all(&mut self) {
        self.tasks.clear();
    }

    /// Blocks until the next base tick boundary (or boundaries, if we've fallen behind), then
    /// runs every elapsed tick. Intended to be raced inside a connection's `tokio::select!` loop.
    pub async fn tick(&mut self) {
        let target = self.last + self.interval;
        tokio::time::sleep_until(target).await;

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last);
        let mut count = (elapsed.as_secs_f64() / self.interval.as_secs_f64()).floor() as u64;
        if count == 0 {
            count = 1;
        }
        self.last += self.interval * count as u32;
        self.run(count);
    }

    fn run(&mut self, mut count: u64) {
        if count >= self.max_lag {
            warn!(skipped = count - 1, "ticker can't keep up, skipping ticks");
            count = 1;
        }

        for _ in 0..count {
            for task in &mut self.tasks {
                if !task.active {
                    continue;
                }
                let due = match &task.kind {
                    Kind::Loop { interval } => self.tick % interval == 0,
                    Kind::Delay { target } => self.tick >= *target,
                };
                if !due {
                    continue;
                }
                if catch_unwind(AssertUnwindSafe(|| (task.callback)())).is_err() {
                    warn!(task_id = task.id, "ticker task panicked, ignoring");
                }
                if matches!(task.kind, Kind::Delay { .. }) {
                    task.active = false;
                }
            }
            self.tasks.retain(|t| t.active);
            self.tick += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn add_loop_invokes_exactly_k_times_over_k_n_ticks() {
        let mut ticker = Ticker::new();
        let count = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&count);
        ticker.add_loop(5, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..(5 * 3) {
            ticker.tick().await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn add_delay_fires_once() {
        let mut ticker = Ticker::new();
        let count = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&count);
        ticker.add_delay(3, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..10 {
            ticker.tick().await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_postpones_delay_task() {
        let mut ticker = Ticker::new();
        let count = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&count);
        let handle = ticker.add_delay(2, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        ticker.tick().await;
        ticker.restart(handle, 5);
        for _ in 0..3 {
            ticker.tick().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for _ in 0..5 {
            ticker.tick().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_is_swallowed() {
        let mut ticker = Ticker::new();
        ticker.add_loop(1, || panic!("boom"));
        ticker.tick().await;
        ticker.tick().await;
    }
}
