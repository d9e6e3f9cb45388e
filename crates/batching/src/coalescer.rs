//! Timer-driven request coalescing.
//!
//! [`BatchCoalescer`] parks every enqueued call in a [`PendingLedger`] and, on
//! each tick of its [`PeriodicScheduler`], sends the whole window as one
//! composite request. The composite response is split back into items and
//! handed to the parked calls **by position**; a count mismatch fails the
//! whole window with [`PipelineError::CorrelationMismatch`].
//!
//! # Drain protocol
//!
//! ```text
//!   enqueue (any thread)          flush (timer task)
//!   ───────────────────           ──────────────────
//!   lock ─ push ─ unlock          lock ─ swap ledger for empty ─ unlock
//!                                 encode composite
//!                                 spawn send, record abort handle
//!                                 await ─ fan out by position
//! ```
//!
//! The ledger lock is held only for the push or the swap, never across
//! encoding or network I/O, so a call enqueued mid-flush lands in the next
//! window. Flushes are serialised, so at most one composite call is in flight.
//!
//! The fan-out runs in its own task that owns the drained calls. Cancelling
//! the timer never strands a window; aborting the in-flight send fails the
//! window with [`PipelineError::Cancelled`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use pipeline::{
    Headers, InboundResponse, OutboundRequest, PayloadCodec, PipelineError, RequestId,
    TransportError, TransportRequest, TransportResponse, TransportSender,
};
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, instrument, warn};

use crate::{
    BatchError, CallCompletion, JobFuture, PendingCall, PendingLedger, PeriodicScheduler,
    ScheduledJob,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the [`BatchCoalescer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush period in milliseconds. Default: 10.
    pub interval_ms: u64,
    /// Maximum calls per physical request; larger windows are split into
    /// consecutive requests. `None` sends each window whole. Default: 10.
    pub max_batch_size: Option<usize>,
    /// Headers added to every composite request.
    pub headers: Headers,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10,
            max_batch_size: Some(10),
            headers: Headers::new(),
        }
    }
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Coalescer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shared {
    running: bool,
    ledger: PendingLedger,
    in_flight: Option<AbortHandle>,
}

struct CoalescerInner {
    config: BatchConfig,
    sender: Arc<dyn TransportSender>,
    codec: Arc<dyn PayloadCodec>,
    shared: Mutex<Shared>,
    scheduler: PeriodicScheduler,
    flush_gate: tokio::sync::Mutex<()>,
}

/// Cloneable handle to one coalescer; every clone shares the same ledger.
#[derive(Clone)]
pub struct BatchCoalescer {
    inner: Arc<CoalescerInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchCoalescer {
    pub fn new(
        config: BatchConfig,
        sender: Arc<dyn TransportSender>,
        codec: Arc<dyn PayloadCodec>,
    ) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                config,
                sender,
                codec,
                shared: Mutex::new(Shared::default()),
                scheduler: PeriodicScheduler::new(),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Starts the flush timer. Starting a running coalescer is a no-op.
    pub fn start(&self) -> Result<(), BatchError> {
        if lock(&self.inner.shared).running {
            return Ok(());
        }
        let weak: Weak<CoalescerInner> = Arc::downgrade(&self.inner);
        let job: ScheduledJob = Arc::new(move || {
            let weak = weak.clone();
            let run: JobFuture = Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.flush().await;
                }
            });
            run
        });
        self.inner.scheduler.schedule(self.inner.config.interval(), job)?;
        lock(&self.inner.shared).running = true;
        info!(
            interval_ms = self.inner.config.interval_ms,
            max_batch_size = ?self.inner.config.max_batch_size,
            "batch coalescer started"
        );
        Ok(())
    }

    /// Stops the flush timer and fails every call still queued with
    /// [`PipelineError::Stopped`].
    ///
    /// Call [`BatchCoalescer::flush`] first to send queued calls instead.
    /// A composite call already in flight is not aborted.
    pub fn stop(&self) {
        self.inner.scheduler.cancel();
        let stranded = {
            let mut shared = lock(&self.inner.shared);
            shared.running = false;
            shared.ledger.take()
        };
        info!(stranded = stranded.len(), "batch coalescer stopped");
        for call in stranded {
            call.complete(Err(PipelineError::Stopped));
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.shared).running
    }

    /// Number of calls waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.shared).ledger.len()
    }

    /// Parks `request` until the next flush.
    ///
    /// While stopped, the completion receives [`PipelineError::NotStarted`] and
    /// the call is not queued.
    pub fn enqueue(&self, request: OutboundRequest, completion: CallCompletion) {
        let call = PendingCall::new(request, completion);
        let rejected = {
            let mut shared = lock(&self.inner.shared);
            if shared.running {
                shared.ledger.push(call);
                None
            } else {
                Some(call)
            }
        };
        match rejected {
            Some(call) => {
                warn!(
                    request_id = %call.request().request_id(),
                    "enqueue on a stopped coalescer"
                );
                call.complete(Err(PipelineError::NotStarted));
            }
            None => debug!("call parked for next flush"),
        }
    }

    /// Removes a call that has not been flushed yet and fails it with
    /// [`PipelineError::Cancelled`]. Returns `false` if it was already sent.
    pub fn withdraw(&self, request_id: RequestId) -> bool {
        let withdrawn = lock(&self.inner.shared).ledger.withdraw(request_id);
        match withdrawn {
            Some(call) => {
                debug!(request_id = %request_id, "call withdrawn before flush");
                call.complete(Err(PipelineError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Aborts the composite call currently in flight, failing its window with
    /// [`PipelineError::Cancelled`]. Returns `false` if nothing was in flight.
    pub fn abort_in_flight(&self) -> bool {
        match lock(&self.inner.shared).in_flight.take() {
            Some(handle) => {
                handle.abort();
                info!("in-flight batch aborted");
                true
            }
            None => false,
        }
    }

    /// Sends everything queued now, without waiting for the timer.
    ///
    /// Returns the number of calls drained.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }
}

impl std::fmt::Debug for BatchCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoalescer")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl CoalescerInner {
    #[instrument(skip(self), fields(batch_len = tracing::field::Empty))]
    async fn flush(self: &Arc<Self>) -> usize {
        let _gate = self.flush_gate.lock().await;
        let taken = lock(&self.shared).ledger.take();
        if taken.is_empty() {
            return 0;
        }
        let drained = taken.len();
        tracing::Span::current().record("batch_len", drained);

        let mut remaining = taken;
        while !remaining.is_empty() {
            let rest = match self.config.max_batch_size {
                Some(max) if max > 0 && remaining.len() > max => remaining.split_off(max),
                _ => Vec::new(),
            };
            self.send_window(remaining).await;
            remaining = rest;
        }
        drained
    }

    async fn send_window(self: &Arc<Self>, calls: Vec<PendingCall>) {
        let (ready, unencoded): (Vec<_>, Vec<_>) =
            calls.into_iter().partition(|call| call.request().body.is_some());
        for call in unencoded {
            call.complete(Err(PipelineError::MissingBody));
        }
        if ready.is_empty() {
            return;
        }

        let encoded = {
            let bodies: Vec<&[u8]> = ready
                .iter()
                .filter_map(|call| call.request().body.as_deref())
                .collect();
            self.codec.encode_sequence(&bodies)
        };
        let payload = match encoded {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "composite payload could not be encoded");
                fail_all(ready, err.into());
                return;
            }
        };
        let mut headers = self.config.headers.clone();
        headers.insert("content-type".to_string(), self.codec.content_type().to_string());
        let request = TransportRequest {
            headers,
            body: payload,
        };

        info!(items = ready.len(), "sending composite request");
        let inner = Arc::clone(self);
        let window = tokio::spawn(async move {
            let sender = Arc::clone(&inner.sender);
            let send = tokio::spawn(async move { sender.send(request).await });
            lock(&inner.shared).in_flight = Some(send.abort_handle());
            let outcome = send.await;
            lock(&inner.shared).in_flight = None;
            fan_out(ready, outcome, inner.codec.as_ref());
        });
        if let Err(err) = window.await {
            warn!(error = %err, "batch fan-out task did not finish");
        }
    }
}

fn fail_all(calls: Vec<PendingCall>, error: PipelineError) {
    for call in calls {
        call.complete(Err(error.clone()));
    }
}

/// Hands item `i` of the composite response to call `i`.
///
/// A non-2xx composite response is handed whole to every call so the
/// response-validation stages of each chain report it.
fn fan_out(
    calls: Vec<PendingCall>,
    outcome: Result<Result<TransportResponse, TransportError>, JoinError>,
    codec: &dyn PayloadCodec,
) {
    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            warn!(error = %err, items = calls.len(), "composite request failed");
            return fail_all(calls, err.into());
        }
        Err(join) if join.is_cancelled() => return fail_all(calls, PipelineError::Cancelled),
        Err(join) => {
            return fail_all(
                calls,
                TransportError::Other {
                    message: join.to_string(),
                }
                .into(),
            )
        }
    };

    if !(200..300).contains(&response.status) {
        warn!(status = response.status, "composite request returned an error status");
        for call in calls {
            call.complete(Ok(InboundResponse::from_transport(response.clone())));
        }
        return;
    }

    let items = match codec.decode_sequence(&response.body) {
        Ok(items) => items,
        Err(err) => {
            warn!(error = %err, "composite response could not be split");
            return fail_all(calls, err.into());
        }
    };
    if items.len() != calls.len() {
        warn!(
            expected = calls.len(),
            received = items.len(),
            "composite response does not line up with the pending calls"
        );
        let error = PipelineError::CorrelationMismatch {
            expected: calls.len(),
            received: items.len(),
        };
        return fail_all(calls, error);
    }

    for (call, body) in calls.into_iter().zip(items) {
        call.complete(Ok(InboundResponse::from_transport(TransportResponse {
            status: response.status,
            headers: response.headers.clone(),
            body,
        })));
    }
}
