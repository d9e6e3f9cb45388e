//! Escalation hook that retries transient failures with exponential back-off.

use std::time::Duration;

use pipeline::{
    ErrorEscalation, Escalation, InboundResponse, InterceptorChain, OutboundRequest,
    PipelineError, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Back-off before the attempt following `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms).saturating_mul(1 << exponent)
    }
}

/// Retries errors whose [`RetryPolicy`] allows it until `max_attempts` is
/// reached; everything else is resolved as a failure.
///
/// With a non-zero delay the retry runs on a Tokio timer and the hook answers
/// [`Escalation::Deferred`]. Cancelling the chain in the meantime turns the
/// pending retry into a no-op.
#[derive(Debug, Clone, Default)]
pub struct RetryOnErrorEscalation {
    config: RetryConfig,
}

impl RetryOnErrorEscalation {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl ErrorEscalation for RetryOnErrorEscalation {
    fn escalate(
        &self,
        error: PipelineError,
        request: OutboundRequest,
        _response: Option<InboundResponse>,
        chain: &InterceptorChain,
    ) -> Escalation {
        let after = match error.retry_policy() {
            RetryPolicy::Retryable { after } => after,
            RetryPolicy::NonRetryable => return Escalation::Resolve(Err(error)),
        };
        if request.attempt() >= self.config.max_attempts {
            warn!(
                operation = %request.operation().name(),
                attempts = request.attempt(),
                error = %error,
                "giving up after retryable failure"
            );
            return Escalation::Resolve(Err(error));
        }

        let delay = after.unwrap_or_else(|| self.config.delay_after(request.attempt()));
        info!(
            operation = %request.operation().name(),
            attempt = request.attempt() + 1,
            delay = ?delay,
            error = %error,
            "scheduling retry"
        );
        if delay.is_zero() {
            return Escalation::Retry(request);
        }
        match Handle::try_current() {
            Ok(runtime) => {
                let chain = chain.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    chain.retry(request);
                });
                Escalation::Deferred
            }
            Err(_) => Escalation::Retry(request),
        }
    }
}
