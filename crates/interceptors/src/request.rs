//! Pre-transport stages that shape the outbound request.

use std::sync::Arc;

use pipeline::{
    Headers, InterceptorChain, OutboundRequest, PayloadCodec, PipelineError, RequestInterceptor,
};
use tracing::{debug, warn};

/// Fails the chain once an operation has been attempted `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct MaxRetryInterceptor {
    max_attempts: u32,
}

impl MaxRetryInterceptor {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl RequestInterceptor for MaxRetryInterceptor {
    fn name(&self) -> &'static str {
        "max-retry"
    }

    fn intercept(&self, request: OutboundRequest, chain: InterceptorChain) {
        if request.attempt() > self.max_attempts {
            warn!(
                operation = %request.operation().name(),
                attempts = self.max_attempts,
                "attempt limit reached"
            );
            chain.report_error(
                PipelineError::RetriesExhausted {
                    attempts: self.max_attempts,
                },
                request,
                None,
            );
            return;
        }
        chain.proceed(request);
    }
}

/// Adds a fixed set of headers to every attempt.
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: Headers,
}

impl HeaderInterceptor {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn intercept(&self, mut request: OutboundRequest, chain: InterceptorChain) {
        request
            .headers
            .extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        chain.proceed(request);
    }
}

/// Encodes the operation into the request body.
pub struct RequestEncodingInterceptor {
    codec: Arc<dyn PayloadCodec>,
}

impl RequestEncodingInterceptor {
    pub fn new(codec: Arc<dyn PayloadCodec>) -> Self {
        Self { codec }
    }
}

impl RequestInterceptor for RequestEncodingInterceptor {
    fn name(&self) -> &'static str {
        "request-encoding"
    }

    fn intercept(&self, mut request: OutboundRequest, chain: InterceptorChain) {
        match self.codec.encode_operation(request.operation()) {
            Ok(body) => {
                debug!(bytes = body.len(), "request encoded");
                request.body = Some(body);
                request
                    .headers
                    .insert("content-type".into(), self.codec.content_type().into());
                request
                    .headers
                    .insert("accept".into(), self.codec.content_type().into());
                chain.proceed(request);
            }
            Err(err) => chain.report_error(err.into(), request, None),
        }
    }
}
