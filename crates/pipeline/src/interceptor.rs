//! Stage capability traits.
//!
//! A chain is assembled from three kinds of stage:
//!
//! | Phase | Trait | Hands control back with |
//! |-------|-------|-------------------------|
//! | pre-transport | [`RequestInterceptor`] | [`InterceptorChain::proceed`] |
//! | transport (exactly one) | [`TransportStage`] | [`InterceptorChain::proceed_with_response`] |
//! | post-transport | [`ResponseInterceptor`] | [`InterceptorChain::proceed_with_response`] |
//!
//! Any stage may instead short-circuit with
//! [`InterceptorChain::report_success`] or [`InterceptorChain::report_error`].
//! Stages never see the chain's cursors; they only receive a handle that knows
//! how to continue.
//!
//! A stage may call back synchronously or from another thread after async
//! work. It must call back at most once per invocation.

use std::sync::Arc;

use crate::{InboundResponse, InterceptorChain, OutboundRequest, ParsedValue, PipelineError};

/// Shapes or short-circuits a request before it reaches the transport.
pub trait RequestInterceptor: Send + Sync {
    /// Short label used in log events.
    fn name(&self) -> &'static str;

    fn intercept(&self, request: OutboundRequest, chain: InterceptorChain);

    /// Stops any work started by `intercept`. Called at most once per chain.
    fn cancel(&self) {}
}

/// Turns a request into a response. Exactly one per chain.
pub trait TransportStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn dispatch(&self, request: OutboundRequest, chain: InterceptorChain);

    /// Aborts the in-flight call, if any. Called at most once per chain.
    fn cancel(&self) {}
}

/// Validates, parses or records a response after the transport.
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn intercept(
        &self,
        request: OutboundRequest,
        response: InboundResponse,
        chain: InterceptorChain,
    );

    fn cancel(&self) {}
}

/// What an [`ErrorEscalation`] hook decided to do with an error.
#[derive(Debug)]
pub enum Escalation {
    /// Deliver this result to the caller.
    Resolve(Result<ParsedValue, PipelineError>),
    /// Start the chain over with a fresh attempt derived from this request.
    Retry(OutboundRequest),
    /// The hook has taken over and will call [`InterceptorChain::retry`] or
    /// [`InterceptorChain::deliver`] itself later.
    Deferred,
}

/// Last-chance hook that sees every error before the caller does.
pub trait ErrorEscalation: Send + Sync {
    fn escalate(
        &self,
        error: PipelineError,
        request: OutboundRequest,
        response: Option<InboundResponse>,
        chain: &InterceptorChain,
    ) -> Escalation;
}

/// The ordered stages one chain is constructed from.
#[derive(Clone)]
pub struct StageSet {
    pub pre: Vec<Arc<dyn RequestInterceptor>>,
    pub transport: Arc<dyn TransportStage>,
    pub post: Vec<Arc<dyn ResponseInterceptor>>,
    pub escalation: Option<Arc<dyn ErrorEscalation>>,
}

impl StageSet {
    /// Starts a stage set around its transport stage.
    pub fn new(transport: Arc<dyn TransportStage>) -> Self {
        Self {
            pre: Vec::new(),
            transport,
            post: Vec::new(),
            escalation: None,
        }
    }

    #[must_use]
    pub fn with_pre(mut self, stage: Arc<dyn RequestInterceptor>) -> Self {
        self.pre.push(stage);
        self
    }

    #[must_use]
    pub fn with_post(mut self, stage: Arc<dyn ResponseInterceptor>) -> Self {
        self.post.push(stage);
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, hook: Arc<dyn ErrorEscalation>) -> Self {
        self.escalation = Some(hook);
        self
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSet")
            .field("pre", &self.pre.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("transport", &self.transport.name())
            .field("post", &self.post.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("escalation", &self.escalation.is_some())
            .finish()
    }
}
