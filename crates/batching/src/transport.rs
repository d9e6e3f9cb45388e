//! Transport stage that routes a chain's request through a shared
//! [`BatchCoalescer`].

use std::sync::{Mutex, PoisonError};

use pipeline::{InterceptorChain, OutboundRequest, RequestId, TransportStage};
use tracing::debug;

use crate::BatchCoalescer;

/// Per-chain transport stage backed by a coalescer shared between chains.
///
/// Cancelling withdraws the call if it is still waiting for a flush. A call
/// already sent stays in its composite request; the cancelled chain drops its
/// result.
#[derive(Debug)]
pub struct BatchingTransport {
    coalescer: BatchCoalescer,
    dispatched: Mutex<Option<RequestId>>,
}

impl BatchingTransport {
    pub fn new(coalescer: BatchCoalescer) -> Self {
        Self {
            coalescer,
            dispatched: Mutex::new(None),
        }
    }
}

impl TransportStage for BatchingTransport {
    fn name(&self) -> &'static str {
        "batching-transport"
    }

    fn dispatch(&self, request: OutboundRequest, chain: InterceptorChain) {
        *self.dispatched.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(request.request_id());
        let original = request.clone();
        self.coalescer.enqueue(
            request,
            Box::new(move |result| match result {
                Ok(response) => chain.proceed_with_response(original, response),
                Err(error) => chain.report_error(error, original, None),
            }),
        );
    }

    fn cancel(&self) {
        let dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(request_id) = dispatched {
            let withdrawn = self.coalescer.withdraw(request_id);
            debug!(request_id = %request_id, withdrawn, "batched call cancelled");
        }
    }
}
