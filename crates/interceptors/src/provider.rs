//! Default assembly of stages for an operation.

use std::sync::Arc;

use batching::{BatchCoalescer, BatchingTransport};
use pipeline::{
    Headers, InterceptorProvider, ObjectCache, Operation, PayloadCodec, StageSet, TransportSender,
    TransportStage,
};
use tracing::trace;

use crate::{
    CacheReadInterceptor, CacheWriteInterceptor, HeaderInterceptor, InMemoryCache,
    JsonParseInterceptor, MaxRetryInterceptor, NetworkTransport, RequestEncodingInterceptor,
    ResponseCodeInterceptor, RetryConfig, RetryOnErrorEscalation,
};

/// Builds the standard chain:
///
/// ```text
/// pre:       max-retry → headers → cache-read → request-encoding
/// transport: batching-transport (batchable + coalescer) | network-transport
/// post:      response-code → json-parse → cache-write
/// escalation: retry-on-error
/// ```
///
/// Every call to [`InterceptorProvider::stages_for`] returns fresh stage
/// instances; only the cache, the sender and the coalescer are shared.
pub struct DefaultInterceptorProvider {
    sender: Arc<dyn TransportSender>,
    codec: Arc<dyn PayloadCodec>,
    cache: Arc<dyn ObjectCache>,
    coalescer: Option<BatchCoalescer>,
    headers: Headers,
    retry: RetryConfig,
}

impl DefaultInterceptorProvider {
    pub fn new(sender: Arc<dyn TransportSender>, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            sender,
            codec,
            cache: Arc::new(InMemoryCache::new()),
            coalescer: None,
            headers: Headers::new(),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Routes batchable operations through `coalescer`.
    #[must_use]
    pub fn with_batching(mut self, coalescer: BatchCoalescer) -> Self {
        self.coalescer = Some(coalescer);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<dyn ObjectCache> {
        &self.cache
    }

    fn transport_for(&self, operation: &Operation) -> Arc<dyn TransportStage> {
        match &self.coalescer {
            Some(coalescer) if operation.is_batchable() => {
                Arc::new(BatchingTransport::new(coalescer.clone()))
            }
            _ => Arc::new(NetworkTransport::new(Arc::clone(&self.sender))),
        }
    }
}

impl InterceptorProvider for DefaultInterceptorProvider {
    fn stages_for(&self, operation: &Operation) -> StageSet {
        let transport = self.transport_for(operation);
        trace!(
            operation = %operation.name(),
            transport = transport.name(),
            "assembling stages"
        );
        StageSet::new(transport)
            .with_pre(Arc::new(MaxRetryInterceptor::new(self.retry.max_attempts)))
            .with_pre(Arc::new(HeaderInterceptor::new(self.headers.clone())))
            .with_pre(Arc::new(CacheReadInterceptor::new(Arc::clone(&self.cache))))
            .with_pre(Arc::new(RequestEncodingInterceptor::new(Arc::clone(
                &self.codec,
            ))))
            .with_post(Arc::new(ResponseCodeInterceptor))
            .with_post(Arc::new(JsonParseInterceptor::new(Arc::clone(&self.codec))))
            .with_post(Arc::new(CacheWriteInterceptor::new(Arc::clone(&self.cache))))
            .with_escalation(Arc::new(RetryOnErrorEscalation::new(self.retry)))
    }
}
