//! Async entry point: builds a chain per request and awaits its completion.

use std::sync::Arc;

use pipeline::{
    CallbackContext, InlineContext, InterceptorChain, InterceptorProvider, OutboundRequest,
    ParsedValue, PipelineError,
};
use tokio::sync::oneshot;
use tracing::{info_span, Instrument};

/// Runs operations through chains built by an [`InterceptorProvider`].
#[derive(Clone)]
pub struct QueryClient {
    provider: Arc<dyn InterceptorProvider>,
    context: Arc<dyn CallbackContext>,
}

/// A submitted operation.
///
/// Dropping it without awaiting leaves the chain running; call
/// [`PendingResult::cancel`] to stop it.
pub struct PendingResult {
    chain: InterceptorChain,
    receiver: oneshot::Receiver<Result<ParsedValue, PipelineError>>,
}

impl QueryClient {
    pub fn new(provider: Arc<dyn InterceptorProvider>) -> Self {
        Self {
            provider,
            context: Arc::new(InlineContext),
        }
    }

    /// Delivers completions through `context`.
    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn CallbackContext>) -> Self {
        self.context = context;
        self
    }

    /// Builds a chain for `request` and kicks it off.
    pub fn submit(&self, request: OutboundRequest) -> PendingResult {
        let stages = self.provider.stages_for(request.operation());
        let chain = InterceptorChain::with_context(stages, Arc::clone(&self.context));
        let (tx, receiver) = oneshot::channel();
        chain.kickoff(
            request,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        PendingResult { chain, receiver }
    }

    /// Runs `request` to completion.
    pub async fn execute(&self, request: OutboundRequest) -> Result<ParsedValue, PipelineError> {
        let span = info_span!(
            "execute",
            operation = %request.operation().name(),
            request_id = %request.request_id(),
        );
        self.submit(request).wait().instrument(span).await
    }
}

impl PendingResult {
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    pub fn cancel(&self) {
        self.chain.cancel();
    }

    /// Waits for the result. A cancelled chain yields
    /// [`PipelineError::Cancelled`].
    pub async fn wait(self) -> Result<ParsedValue, PipelineError> {
        self.receiver.await.unwrap_or(Err(PipelineError::Cancelled))
    }
}
