//! The interceptor chain: a resumable state machine driving one operation
//! through pre-transport stages, one transport stage and post-transport stages.
//!
//! ```text
//!  kickoff ─▶ pre[0] ─proceed─▶ pre[1] ─proceed─▶ … ─▶ transport
//!                                                          │
//!                                        proceed_with_response
//!                                                          ▼
//!  completion ◀─ parsed? ◀─ … ◀─proceed_with_response─ post[0]
//! ```
//!
//! Exactly one stage is in flight at a time. A stage hands control back by
//! calling into its [`InterceptorChain`] handle, possibly from another thread
//! after asynchronous work. The cursors are owned by the chain and mutated
//! under a short-held lock that is never held while a stage runs. The
//! cancellation flag is the only state read without that lock.
//!
//! The completion callback is stored in the chain at `kickoff` and taken out
//! on first delivery, so it can fire at most once. Cancellation drops it
//! without calling it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::{
    CallbackContext, Escalation, InboundResponse, InlineContext, OutboundRequest, ParsedValue,
    PipelineError, StageSet,
};

/// Receives the final outcome of an operation.
pub type Completion = Box<dyn FnOnce(Result<ParsedValue, PipelineError>) + Send + 'static>;

/// Position of a chain within its stage lists.
///
/// Both counters hold the number of stages already entered in the current
/// attempt. `pre` is one past the pre-transport list length once the transport
/// stage has been dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub pre: usize,
    pub post: usize,
}

/// Cloneable handle to one interceptor chain.
///
/// All clones share the same cursors, flag and completion.
#[derive(Clone)]
pub struct InterceptorChain {
    inner: Arc<ChainInner>,
}

struct ChainInner {
    stages: StageSet,
    context: Arc<dyn CallbackContext>,
    cursor: Mutex<Cursor>,
    started: AtomicBool,
    cancelled: AtomicBool,
    completion: Mutex<Option<Completion>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InterceptorChain {
    /// Builds a chain that delivers its result on the calling thread.
    pub fn new(stages: StageSet) -> Self {
        Self::with_context(stages, Arc::new(InlineContext))
    }

    /// Builds a chain that delivers its result through `context`.
    pub fn with_context(stages: StageSet, context: Arc<dyn CallbackContext>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                stages,
                context,
                cursor: Mutex::new(Cursor::default()),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                completion: Mutex::new(None),
            }),
        }
    }

    /// Starts the chain.
    ///
    /// A chain can be kicked off once; a second call fails its own completion
    /// with [`PipelineError::AlreadyStarted`]. An empty pre-transport list
    /// fails with [`PipelineError::NoStages`] through the normal error path, so
    /// an escalation hook still sees it.
    pub fn kickoff(&self, request: OutboundRequest, completion: Completion) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!(
                operation = %request.operation().name(),
                "kickoff called on a chain that was already started"
            );
            self.inner
                .context
                .execute(Box::new(move || completion(Err(PipelineError::AlreadyStarted))));
            return;
        }
        *lock(&self.inner.completion) = Some(completion);
        self.start(request);
    }

    fn start(&self, request: OutboundRequest) {
        if self.is_cancelled() {
            trace!("start ignored: chain cancelled");
            return;
        }
        let Some(first) = self.inner.stages.pre.first().cloned() else {
            self.report_error(PipelineError::NoStages, request, None);
            return;
        };
        lock(&self.inner.cursor).pre = 1;
        debug!(
            operation = %request.operation().name(),
            request_id = %request.request_id(),
            attempt = request.attempt(),
            stage = first.name(),
            "entering pre-transport stage"
        );
        first.intercept(request, self.clone());
    }

    /// Advances to the next pre-transport stage, or to the transport stage
    /// once the list is exhausted. Does nothing once cancelled.
    pub fn proceed(&self, request: OutboundRequest) {
        if self.is_cancelled() {
            trace!("proceed ignored: chain cancelled");
            return;
        }
        let len = self.inner.stages.pre.len();
        let index = {
            let mut cursor = lock(&self.inner.cursor);
            let index = cursor.pre;
            if index <= len {
                cursor.pre += 1;
            }
            index
        };

        if index < len {
            let stage = Arc::clone(&self.inner.stages.pre[index]);
            debug!(
                request_id = %request.request_id(),
                stage = stage.name(),
                index,
                "entering pre-transport stage"
            );
            stage.intercept(request, self.clone());
        } else if index == len {
            let transport = Arc::clone(&self.inner.stages.transport);
            debug!(
                request_id = %request.request_id(),
                stage = transport.name(),
                "dispatching to transport stage"
            );
            transport.dispatch(request, self.clone());
        } else {
            warn!(
                request_id = %request.request_id(),
                "proceed called after the transport stage was dispatched; ignoring"
            );
        }
    }

    /// Advances to the next post-transport stage. Once the list is exhausted
    /// the response must carry a parsed result; otherwise the chain fails
    /// with [`PipelineError::IncompleteChain`]. Does nothing once cancelled.
    pub fn proceed_with_response(&self, request: OutboundRequest, mut response: InboundResponse) {
        if self.is_cancelled() {
            trace!("proceed_with_response ignored: chain cancelled");
            return;
        }
        let len = self.inner.stages.post.len();
        let index = {
            let mut cursor = lock(&self.inner.cursor);
            let index = cursor.post;
            if index < len {
                cursor.post += 1;
            }
            index
        };

        if index < len {
            let stage = Arc::clone(&self.inner.stages.post[index]);
            debug!(
                request_id = %request.request_id(),
                stage = stage.name(),
                index,
                "entering post-transport stage"
            );
            stage.intercept(request, response, self.clone());
            return;
        }

        match response.parsed.take() {
            Some(value) => self.report_success(&request, value),
            None => self.report_error(
                PipelineError::IncompleteChain { post_stages: len },
                request,
                Some(response),
            ),
        }
    }

    /// Cancels the chain.
    ///
    /// The first call flips the flag and asks every stage to cancel, each
    /// exactly once; later calls do nothing. The completion is dropped without
    /// being called.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            trace!("cancel ignored: chain already cancelled");
            return;
        }
        debug!("cancelling interceptor chain");
        let stages = &self.inner.stages;
        for stage in &stages.pre {
            stage.cancel();
        }
        stages.transport.cancel();
        for stage in &stages.post {
            stage.cancel();
        }
        let abandoned = lock(&self.inner.completion).take();
        drop(abandoned);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn is_not_cancelled(&self) -> bool {
        !self.is_cancelled()
    }

    /// Restarts the chain from its first pre-transport stage with a fresh
    /// attempt derived from `request`.
    ///
    /// Ignored once cancelled or after the completion has been delivered.
    pub fn retry(&self, request: OutboundRequest) {
        if self.is_cancelled() {
            trace!("retry ignored: chain cancelled");
            return;
        }
        if lock(&self.inner.completion).is_none() {
            warn!(
                request_id = %request.request_id(),
                "retry requested after the result was delivered; ignoring"
            );
            return;
        }
        *lock(&self.inner.cursor) = Cursor::default();
        let next = request.next_attempt();
        info!(
            operation = %next.operation().name(),
            request_id = %next.request_id(),
            attempt = next.attempt(),
            "retrying operation"
        );
        self.start(next);
    }

    /// Routes an error through the escalation hook, if any, then to the
    /// caller. Does nothing once cancelled.
    pub fn report_error(
        &self,
        error: PipelineError,
        request: OutboundRequest,
        response: Option<InboundResponse>,
    ) {
        if self.is_cancelled() {
            trace!("report_error ignored: chain cancelled");
            return;
        }
        debug!(
            operation = %request.operation().name(),
            request_id = %request.request_id(),
            error = %error,
            "operation failed"
        );
        let Some(hook) = self.inner.stages.escalation.clone() else {
            self.deliver(Err(error));
            return;
        };
        match hook.escalate(error, request, response, self) {
            Escalation::Resolve(result) => self.deliver(result),
            Escalation::Retry(request) => self.retry(request),
            Escalation::Deferred => {}
        }
    }

    /// Delivers a successful result. Does nothing once cancelled.
    pub fn report_success(&self, request: &OutboundRequest, value: ParsedValue) {
        if self.is_cancelled() {
            trace!("report_success ignored: chain cancelled");
            return;
        }
        debug!(
            operation = %request.operation().name(),
            request_id = %request.request_id(),
            "operation succeeded"
        );
        self.deliver(Ok(value));
    }

    /// Hands `result` to the completion on the callback context, bypassing
    /// the escalation hook.
    ///
    /// Used by deferred escalation hooks to finish the chain. A second
    /// delivery is dropped with a warning.
    pub fn deliver(&self, result: Result<ParsedValue, PipelineError>) {
        if self.is_cancelled() {
            trace!("deliver ignored: chain cancelled");
            return;
        }
        let Some(completion) = lock(&self.inner.completion).take() else {
            warn!("completion already delivered; dropping result");
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.context.execute(Box::new(move || {
            if inner.cancelled.load(Ordering::Acquire) {
                trace!("completion suppressed: chain cancelled before delivery");
                return;
            }
            completion(result);
        }));
    }

    /// Current cursor position.
    pub fn cursor(&self) -> Cursor {
        *lock(&self.inner.cursor)
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("stages", &self.inner.stages)
            .field("cursor", &self.cursor())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
