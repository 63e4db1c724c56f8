//! Idle-windowed closure consumer.
//!
//! One [`ClosureConsumer::run`] is one batch pass:
//!
//! 1. **Receiving**: pull closure requests, resolve the due ones into
//!    [`ResultEvent`](closure_events::ResultEvent)s, buffer the rest. Every
//!    received message resets the idle window.
//! 2. **Draining**: the window elapsed; consumption is cancelled and every
//!    buffered request is republished unchanged onto the request topic.
//! 3. **Done**: every publish started in the pass has resolved.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use closure_core::{Clock, Error, ResultExt, SystemClock};
use closure_events::{ClosureRequest, Delivery, EventPublisher, Subscription, Topic, decode};

use super::idle::{IdleHandle, IdleWindow};

/// When a delivery is acknowledged relative to its processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Ack on receipt, before decoding. At-most-once: a crash mid-processing loses the message.
    #[default]
    BeforeProcessing,
    /// Ack once the result or requeue publish succeeded, nack at the end of the
    /// pass if it failed. At-least-once: redeliveries may produce duplicate results.
    AfterProcessing,
}

impl AckMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeProcessing => "before-processing",
            Self::AfterProcessing => "after-processing",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "before-processing" | "before" | "at-most-once" => Ok(Self::BeforeProcessing),
            "after-processing" | "after" | "at-least-once" => Ok(Self::AfterProcessing),
            other => Err(Error::configuration(
                "ack mode",
                format!("must be before-processing or after-processing (got '{other}')"),
            )),
        }
    }
}

/// Phase of a consumer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Receiving,
    Draining,
    Done,
}

/// Configuration for the closure consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Quiet period after which the pass stops receiving.
    pub idle_window: Duration,
    /// Maximum messages handled at once.
    pub concurrency: usize,
    pub ack_mode: AckMode,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(10),
            concurrency: 16,
            ack_mode: AckMode::default(),
        }
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub received: usize,
    pub due: usize,
    pub not_due: usize,
    pub decode_failed: usize,
    pub results_published: usize,
    pub requeues_published: usize,
    pub publish_failed: usize,
    pub ack_failed: usize,
    /// Repeat deliveries of a message already taken by the pass.
    pub redelivered: usize,
}

#[derive(Debug, Default)]
struct ConsumerStats {
    received: AtomicUsize,
    due: AtomicUsize,
    not_due: AtomicUsize,
    decode_failed: AtomicUsize,
    results_published: AtomicUsize,
    requeues_published: AtomicUsize,
    publish_failed: AtomicUsize,
    ack_failed: AtomicUsize,
    redelivered: AtomicUsize,
}

impl ConsumerStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn report(&self) -> ConsumerReport {
        ConsumerReport {
            received: self.received.load(Ordering::SeqCst),
            due: self.due.load(Ordering::SeqCst),
            not_due: self.not_due.load(Ordering::SeqCst),
            decode_failed: self.decode_failed.load(Ordering::SeqCst),
            results_published: self.results_published.load(Ordering::SeqCst),
            requeues_published: self.requeues_published.load(Ordering::SeqCst),
            publish_failed: self.publish_failed.load(Ordering::SeqCst),
            ack_failed: self.ack_failed.load(Ordering::SeqCst),
            redelivered: self.redelivered.load(Ordering::SeqCst),
        }
    }
}

/// State shared by the message handlers and publish tasks of one pass.
#[derive(Clone)]
struct Pass {
    ack_mode: AckMode,
    results: EventPublisher,
    requests: Arc<dyn Topic>,
    stats: Arc<ConsumerStats>,
    not_due: Arc<Mutex<Vec<Delivery>>>,
    failed: Arc<Mutex<Vec<Delivery>>>,
    publishes: TaskTracker,
}

impl Pass {
    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            ConsumerStats::bump(&self.stats.ack_failed);
            warn!(message_id = %delivery.id(), error = %e, "Failed to acknowledge message");
        }
    }

    /// Settle a processed delivery in after-processing mode.
    ///
    /// Failed deliveries are only nacked once the pass is over, otherwise the
    /// redelivery would reset the idle window in the same pass.
    async fn settle(&self, delivery: Delivery, success: bool) {
        if self.ack_mode != AckMode::AfterProcessing {
            return;
        }
        if success {
            self.ack(&delivery).await;
        } else {
            self.failed.lock().await.push(delivery);
        }
    }

    async fn nack_failed(&self) {
        let failed = std::mem::take(&mut *self.failed.lock().await);
        for delivery in failed {
            if delivery
                .nack()
                .await
                .into_option_logged("Failed to nack message")
                .is_none()
            {
                ConsumerStats::bump(&self.stats.ack_failed);
            }
        }
    }

    async fn handle(&self, delivery: Delivery, received_at: DateTime<Utc>) {
        if self.ack_mode == AckMode::BeforeProcessing {
            self.ack(&delivery).await;
        }

        let request = match decode::<ClosureRequest>(delivery.data()) {
            Ok(request) => request,
            Err(e) => {
                ConsumerStats::bump(&self.stats.decode_failed);
                error!(message_id = %delivery.id(), error = %e, "Dropping undecodable closure request");
                // Redelivery cannot fix a bad payload.
                self.settle(delivery, true).await;
                return;
            }
        };

        if request.is_due(received_at) {
            ConsumerStats::bump(&self.stats.due);
            debug!(
                delivery_execution_id = %request.delivery_execution_id,
                close_at = request.close_at,
                "Closure request due"
            );
            let pass = self.clone();
            self.publishes
                .spawn(async move { pass.publish_result(&request, delivery).await });
        } else {
            ConsumerStats::bump(&self.stats.not_due);
            debug!(
                delivery_execution_id = %request.delivery_execution_id,
                close_at = request.close_at,
                "Closure request not due, buffering"
            );
            self.not_due.lock().await.push(delivery);
        }
    }

    async fn publish_result(&self, request: &ClosureRequest, delivery: Delivery) {
        let published = self.results.publish_logged(&request.resolve()).await.is_some();
        if published {
            ConsumerStats::bump(&self.stats.results_published);
        } else {
            ConsumerStats::bump(&self.stats.publish_failed);
        }
        self.settle(delivery, published).await;
    }

    async fn requeue(&self, delivery: Delivery) {
        match self.requests.publish(delivery.data().to_vec()).await {
            Ok(message_id) => {
                ConsumerStats::bump(&self.stats.requeues_published);
                debug!(topic = %self.requests.name(), message_id = %message_id, "Closure request requeued");
                self.settle(delivery, true).await;
            }
            Err(e) => {
                ConsumerStats::bump(&self.stats.publish_failed);
                error!(topic = %self.requests.name(), error = %e, "Failed to requeue closure request");
                self.settle(delivery, false).await;
            }
        }
    }
}

/// Consumes closure requests for one idle-windowed pass.
pub struct ClosureConsumer {
    config: ConsumerConfig,
    results: EventPublisher,
    requests: Arc<dyn Topic>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ConsumerState>,
}

impl ClosureConsumer {
    /// Create a consumer publishing results through `results` and requeueing
    /// not-due requests onto `requests`.
    pub fn new(config: ConsumerConfig, results: EventPublisher, requests: Arc<dyn Topic>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Receiving);
        Self {
            config,
            results,
            requests,
            clock: Arc::new(SystemClock),
            state,
        }
    }

    /// Use `clock` for due/not-due decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current phase.
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Observe phase changes, including after [`Self::run`] took the consumer.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run one pass over `subscription` and return once every publish resolved.
    pub async fn run(self, subscription: Box<dyn Subscription>) -> ConsumerReport {
        let pass = Pass {
            ack_mode: self.config.ack_mode,
            results: self.results.clone(),
            requests: self.requests.clone(),
            stats: Arc::new(ConsumerStats::default()),
            not_due: Arc::new(Mutex::new(Vec::new())),
            failed: Arc::new(Mutex::new(Vec::new())),
            publishes: TaskTracker::new(),
        };
        let handlers = TaskTracker::new();
        let cancel = CancellationToken::new();
        let (window, idle) = IdleWindow::start(self.config.idle_window);

        info!(
            subscription = %subscription.name(),
            idle_window_ms = u64::try_from(window.period().as_millis()).unwrap_or(u64::MAX),
            concurrency = self.config.concurrency,
            ack_mode = %self.config.ack_mode,
            "Closure consumer receiving"
        );

        let stop = async {
            window.elapsed().await;
            cancel.cancel();
        };
        tokio::join!(
            stop,
            self.receive(subscription, idle, &pass, &handlers, &cancel)
        );

        // Handlers still running may buffer more requests; let them finish first.
        handlers.close();
        handlers.wait().await;

        self.state.send_replace(ConsumerState::Draining);
        let buffered = std::mem::take(&mut *pass.not_due.lock().await);
        info!(buffered = buffered.len(), "Idle window elapsed, requeueing not-due requests");
        for delivery in buffered {
            let requeue = pass.clone();
            pass.publishes
                .spawn(async move { requeue.requeue(delivery).await });
        }

        pass.publishes.close();
        pass.publishes.wait().await;
        pass.nack_failed().await;
        self.state.send_replace(ConsumerState::Done);

        let report = pass.stats.report();
        info!(
            received = report.received,
            due = report.due,
            not_due = report.not_due,
            decode_failed = report.decode_failed,
            results_published = report.results_published,
            requeues_published = report.requeues_published,
            publish_failed = report.publish_failed,
            ack_failed = report.ack_failed,
            redelivered = report.redelivered,
            "Closure consumer finished"
        );
        report
    }

    async fn receive(
        &self,
        mut subscription: Box<dyn Subscription>,
        idle: IdleHandle,
        pass: &Pass,
        handlers: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut seen = HashSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) if !seen.insert(delivery.id().clone()) => {
                    // An unsettled delivery whose lease ran out. The first copy is
                    // still owned by this pass, so the repeat neither counts as
                    // activity nor gets processed again.
                    ConsumerStats::bump(&pass.stats.redelivered);
                    debug!(message_id = %delivery.id(), "Ignoring redelivery within the pass");
                    drop(permit);
                }
                Ok(Some(delivery)) => {
                    idle.touch();
                    let received_at = self.clock.now();
                    ConsumerStats::bump(&pass.stats.received);

                    let pass = pass.clone();
                    handlers.spawn(async move {
                        pass.handle(delivery, received_at).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    info!(subscription = %subscription.name(), "Subscription closed");
                    break;
                }
                Err(e) => {
                    error!(subscription = %subscription.name(), error = %e, "Subscription failed, no longer receiving");
                    break;
                }
            }
        }

        debug!(subscription = %subscription.name(), "Receive loop stopped");
    }
}
