//! Pending-call bookkeeping for the coalescer.
//!
//! A [`PendingCall`] pairs a request with the completion that must receive its
//! result. The completion fires exactly once: [`PendingCall::complete`]
//! consumes the call, and a call dropped without completing fails its
//! completion with [`PipelineError::Cancelled`].

use std::time::{Duration, Instant};

use pipeline::{InboundResponse, OutboundRequest, PipelineError, RequestId};
use tracing::warn;

/// Receives the per-call slice of a composite response.
pub type CallCompletion = Box<dyn FnOnce(Result<InboundResponse, PipelineError>) + Send + 'static>;

/// One request parked until the next flush.
pub struct PendingCall {
    request: OutboundRequest,
    completion: Option<CallCompletion>,
    enqueued_at: Instant,
}

impl PendingCall {
    pub fn new(request: OutboundRequest, completion: CallCompletion) -> Self {
        Self {
            request,
            completion: Some(completion),
            enqueued_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    /// Time spent waiting since enqueue.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Fires the completion and consumes the call.
    pub fn complete(mut self, result: Result<InboundResponse, PipelineError>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            warn!(
                request_id = %self.request.request_id(),
                "pending call dropped without a result; failing it"
            );
            completion(Err(PipelineError::Cancelled));
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("request_id", &self.request.request_id())
            .field("operation", &self.request.operation().name())
            .field("age", &self.age())
            .finish()
    }
}

/// Insertion-ordered queue of pending calls for the current window.
#[derive(Debug, Default)]
pub struct PendingLedger {
    calls: Vec<PendingCall>,
}

impl PendingLedger {
    pub fn push(&mut self, call: PendingCall) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Takes every queued call, leaving the ledger empty for the next window.
    pub fn take(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.calls)
    }

    /// Removes the call for `request_id`, if it is still queued.
    pub fn withdraw(&mut self, request_id: RequestId) -> Option<PendingCall> {
        let position = self
            .calls
            .iter()
            .position(|call| call.request.request_id() == request_id)?;
        Some(self.calls.remove(position))
    }
}
