//! Single-shot idle window.
//!
//! The window fires once a full period passes without activity. Activity is
//! reported through cloneable [`IdleHandle`]s over a watch channel, so any
//! number of tasks may reset the window while it is being awaited.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Resets the idle window it was created with.
#[derive(Debug, Clone)]
pub struct IdleHandle {
    last_activity: Arc<watch::Sender<Instant>>,
}

impl IdleHandle {
    /// Record activity now, pushing the window out by a full period.
    pub fn touch(&self) {
        self.last_activity.send_replace(Instant::now());
    }
}

/// Quiet-period timer.
#[derive(Debug)]
pub struct IdleWindow {
    period: Duration,
    last_activity: watch::Receiver<Instant>,
}

impl IdleWindow {
    /// Start a window of `period`, counting from now.
    pub fn start(period: Duration) -> (Self, IdleHandle) {
        let (tx, rx) = watch::channel(Instant::now());
        (
            Self {
                period,
                last_activity: rx,
            },
            IdleHandle {
                last_activity: Arc::new(tx),
            },
        )
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Wait until a full period passes with no activity; returns the instant it fired.
    ///
    /// Once every handle is dropped no further resets can arrive and the
    /// window simply runs out.
    pub async fn elapsed(mut self) -> Instant {
        loop {
            let deadline = *self.last_activity.borrow_and_update() + self.period;

            tokio::select! {
                () = sleep_until(deadline) => {
                    // A touch can land between reading the deadline and the sleep firing.
                    if !self.last_activity.has_changed().unwrap_or(false) {
                        return deadline;
                    }
                }
                changed = self.last_activity.changed() => {
                    if changed.is_err() {
                        sleep_until(deadline).await;
                        return deadline;
                    }
                }
            }
        }
    }
}
