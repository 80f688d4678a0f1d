//! Generic stage runner: couples an input channel to an output channel
//! through a pluggable processor, with rate limiting and cancellation.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use discovery_sdk::events::ErrorEvent;

use crate::retry::BackoffPolicy;

/// Per-event context handed to processors: the pipeline's cancellation
/// token (to be honored by blocking I/O) and the runner's backoff policy
/// for processors that run their own retries.
#[derive(Clone)]
pub struct StageContext {
    pub cancel: CancellationToken,
    pub backoff: Option<BackoffPolicy>,
}

/// A single processing step of the pipeline.
///
/// `Ok(None)` means the event was intentionally dropped and nothing is
/// published. `Ok(Some(outputs))` publishes each element non-blockingly.
/// Errors are turned into [`ErrorEvent`]s by the runner; the worker then
/// continues with the next input.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stage name used in logs and error events.
    const NAME: &'static str;

    async fn process(
        &self,
        cx: &StageContext,
        event: Self::Input,
    ) -> anyhow::Result<Option<Vec<Self::Output>>>;
}

/// Minimum interval between two processed events, with an initial burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub interval: Duration,
    pub burst: u32,
}

impl RateLimit {
    fn limiter(&self) -> Option<DefaultDirectRateLimiter> {
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(self.interval)?.allow_burst(burst);
        Some(RateLimiter::direct(quota))
    }
}

/// Runner options.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    pub rate_limit: Option<RateLimit>,
    pub backoff: Option<BackoffPolicy>,
}

/// Drives one processor with a single worker task.
pub struct StageRunner<P: Processor> {
    processor: Arc<P>,
    input: parking_lot::Mutex<Option<mpsc::Receiver<P::Input>>>,
    output: mpsc::Sender<P::Output>,
    errors: mpsc::Sender<ErrorEvent>,
    options: StageOptions,
    stop: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<P: Processor> StageRunner<P> {
    pub fn new(
        processor: P,
        input: mpsc::Receiver<P::Input>,
        output: mpsc::Sender<P::Output>,
        errors: mpsc::Sender<ErrorEvent>,
        options: StageOptions,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            input: parking_lot::Mutex::new(Some(input)),
            output,
            errors,
            options,
            stop: CancellationToken::new(),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the worker. Events are processed in input order until the
    /// given token is cancelled or [`Self::stop`] is called. Starting twice
    /// is a no-op.
    pub async fn start(&self, cancel: &CancellationToken) {
        let Some(input) = self.input.lock().take() else {
            tracing::warn!(stage = P::NAME, "stage already started");
            return;
        };

        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.processor),
            input,
            self.output.clone(),
            self.errors.clone(),
            self.options,
            cancel.clone(),
            self.stop.clone(),
        ));
        *self.worker.lock().await = Some(handle);
        tracing::debug!(stage = P::NAME, "stage started");
    }

    /// Signal the worker and wait for it to return. Idempotent; calling
    /// stop without start (or after cancellation) is a no-op.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => {
                if let Err(err) = handle.await {
                    tracing::warn!(stage = P::NAME, error = %err, "stage worker failed");
                }
                tracing::info!(stage = P::NAME, "stopped");
            }
            None => tracing::debug!(stage = P::NAME, "stop without running worker"),
        }
    }
}

async fn run_worker<P: Processor>(
    processor: Arc<P>,
    mut input: mpsc::Receiver<P::Input>,
    output: mpsc::Sender<P::Output>,
    errors: mpsc::Sender<ErrorEvent>,
    options: StageOptions,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    let limiter = options.rate_limit.as_ref().and_then(RateLimit::limiter);
    let cx = StageContext {
        cancel: cancel.clone(),
        backoff: options.backoff,
    };

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            () = stop.cancelled() => break,
            event = input.recv() => match event {
                Some(event) => event,
                None => {
                    tracing::debug!(stage = P::NAME, "input channel closed");
                    break;
                }
            },
        };

        if let Some(limiter) = &limiter {
            let interrupted = tokio::select! {
                () = cancel.cancelled() => true,
                () = stop.cancelled() => true,
                () = limiter.until_ready() => false,
            };
            if interrupted {
                try_publish(
                    &errors,
                    ErrorEvent::new("cancelled while waiting for rate limiter")
                        .with_message(format!("stage {} dropped an event", P::NAME)),
                    P::NAME,
                    "errors",
                );
                break;
            }
        }

        match processor.process(&cx, event).await {
            Ok(Some(outputs)) => {
                for out in outputs {
                    try_publish(&output, out, P::NAME, "output");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(stage = P::NAME, error = %format!("{err:#}"), "processing failed");
                try_publish(
                    &errors,
                    ErrorEvent::new(format!("{err:#}"))
                        .with_message(format!("stage {} processing failed", P::NAME)),
                    P::NAME,
                    "errors",
                );
            }
        }
    }

    tracing::debug!(stage = P::NAME, "stage worker exited");
}

/// Non-blocking publish shared by every producer in the pipeline: a full
/// or closed channel drops the value with a debug log, never suspending
/// the caller.
pub(crate) fn try_publish<T>(sender: &mpsc::Sender<T>, value: T, source: &str, channel: &str) {
    use tokio::sync::mpsc::error::TrySendError;

    match sender.try_send(value) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::debug!(source, channel, "channel full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(source, channel, "channel closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    /// Doubles every input; odd inputs fail, zero inputs are dropped.
    struct Doubler {
        processed: AtomicUsize,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                processed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Processor for Doubler {
        type Input = u64;
        type Output = u64;
        const NAME: &'static str = "doubler";

        async fn process(
            &self,
            _cx: &StageContext,
            event: u64,
        ) -> anyhow::Result<Option<Vec<u64>>> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if event == 0 {
                return Ok(None);
            }
            if event % 2 == 1 {
                anyhow::bail!("odd input {event}");
            }
            Ok(Some(vec![event * 2]))
        }
    }

    fn channels(
        capacity: usize,
    ) -> (
        mpsc::Sender<u64>,
        mpsc::Receiver<u64>,
        mpsc::Sender<u64>,
        mpsc::Receiver<u64>,
        mpsc::Sender<ErrorEvent>,
        mpsc::Receiver<ErrorEvent>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (err_tx, err_rx) = mpsc::channel(capacity);
        (in_tx, in_rx, out_tx, out_rx, err_tx, err_rx)
    }

    #[tokio::test]
    async fn processes_events_in_order() {
        let (in_tx, in_rx, out_tx, mut out_rx, err_tx, _err_rx) = channels(16);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        for n in [2u64, 4, 6] {
            in_tx.send(n).await.unwrap();
        }
        assert_eq!(out_rx.recv().await, Some(4));
        assert_eq!(out_rx.recv().await, Some(8));
        assert_eq!(out_rx.recv().await, Some(12));

        runner.stop().await;
    }

    #[tokio::test]
    async fn error_publishes_error_event_and_continues() {
        let (in_tx, in_rx, out_tx, mut out_rx, err_tx, mut err_rx) = channels(16);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        in_tx.send(3).await.unwrap();
        in_tx.send(4).await.unwrap();

        let err = err_rx.recv().await.unwrap();
        assert!(err.error.contains("odd input 3"));
        // The stage keeps going after the failure.
        assert_eq!(out_rx.recv().await, Some(8));

        runner.stop().await;
    }

    #[tokio::test]
    async fn none_output_publishes_nothing() {
        let (in_tx, in_rx, out_tx, mut out_rx, err_tx, mut err_rx) = channels(16);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        in_tx.send(0).await.unwrap();
        in_tx.send(2).await.unwrap();

        // Only the second event produces output, and no errors are raised.
        assert_eq!(out_rx.recv().await, Some(4));
        assert!(err_rx.try_recv().is_err());

        runner.stop().await;
    }

    #[tokio::test]
    async fn full_output_channel_drops_instead_of_blocking() {
        let (in_tx, in_rx) = mpsc::channel(16);
        // Output capacity 1 and nobody consuming.
        let (out_tx, mut out_rx) = mpsc::channel::<u64>(1);
        let (err_tx, _err_rx) = mpsc::channel(16);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        for n in [2u64, 4, 6] {
            in_tx.send(n).await.unwrap();
        }

        // All three inputs must be processed even though the output stalls.
        tokio::time::timeout(Duration::from_secs(2), async {
            while runner.processor.processed.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker blocked on a full output channel");

        assert_eq!(out_rx.recv().await, Some(4));
        assert!(out_rx.try_recv().is_err(), "extra events were queued");

        runner.stop().await;
    }

    #[tokio::test]
    async fn rate_limiter_spaces_events() {
        let (in_tx, in_rx, out_tx, mut out_rx, err_tx, _err_rx) = channels(16);
        let options = StageOptions {
            rate_limit: Some(RateLimit {
                interval: Duration::from_millis(500),
                burst: 1,
            }),
            backoff: None,
        };
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, options);

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        let started = Instant::now();
        for n in [2u64, 4, 6] {
            in_tx.send(n).await.unwrap();
        }
        for _ in 0..3 {
            out_rx.recv().await.unwrap();
        }
        assert!(
            started.elapsed() >= Duration::from_secs(1),
            "three events with a 500ms interval completed in {:?}",
            started.elapsed()
        );

        runner.stop().await;
    }

    #[tokio::test]
    async fn cancellation_during_rate_limit_wait_reports_error() {
        let (in_tx, in_rx, out_tx, mut out_rx, err_tx, mut err_rx) = channels(16);
        let options = StageOptions {
            rate_limit: Some(RateLimit {
                interval: Duration::from_secs(3600),
                burst: 1,
            }),
            backoff: None,
        };
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, options);

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        in_tx.send(2).await.unwrap();
        in_tx.send(4).await.unwrap();

        // First event passes on the burst token; the second waits an hour.
        assert_eq!(out_rx.recv().await, Some(4));
        // Let the worker reach the rate-limiter wait before cancelling.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = err_rx.recv().await.unwrap();
        assert!(err.error.contains("rate limiter"));

        runner.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_in_tx, in_rx, out_tx, _out_rx, err_tx, _err_rx) = channels(4);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;

        runner.stop().await;
        runner.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let (_in_tx, in_rx, out_tx, _out_rx, err_tx, _err_rx) = channels(4);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());
        runner.stop().await;
    }

    #[tokio::test]
    async fn stop_after_cancellation_is_safe() {
        let (_in_tx, in_rx, out_tx, _out_rx, err_tx, _err_rx) = channels(4);
        let runner = StageRunner::new(Doubler::new(), in_rx, out_tx, err_tx, StageOptions::default());

        let cancel = CancellationToken::new();
        runner.start(&cancel).await;
        cancel.cancel();
        runner.stop().await;
    }
}
