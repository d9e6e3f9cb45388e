//! Error and retry-policy types shared by every stage of the pipeline.
//!
//! [`PipelineError`] is the single error type delivered to a completion
//! callback. Collaborator failures ([`TransportError`], [`CodecError`],
//! [`CacheError`]) are defined separately and converted with `?`.
//!
//! Every error is `Clone`: the batching coalescer hands one transport failure
//! to every caller parked in the same flush window.
//!
//! [`RetryPolicy`] is the cross-cutting retry signal: the retry escalation hook
//! never inspects variants directly, it asks [`PipelineError::retry_policy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: connection failures, timeouts, HTTP 429 and 5xx.
/// - `NonRetryable` errors: configuration errors (`NoStages`,
///   `IncompleteChain`, `NotStarted`), correlation and codec failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::TransportSender`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TransportError {
    /// The remote endpoint could not be reached.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description from the underlying client.
        message: String,
    },

    /// The exchange did not complete within the sender's deadline.
    #[error("Transport request timed out")]
    Timeout,

    /// The request could not be constructed (bad header value, bad URL).
    #[error("Invalid transport request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// The in-flight call was aborted before it produced a response.
    #[error("Transport call aborted")]
    Aborted,

    /// Any other failure while sending or reading the response.
    #[error("Transport failure: {message}")]
    Other {
        /// Description from the underlying client.
        message: String,
    },
}

/// Failure reported by a [`crate::PayloadCodec`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CodecError {
    /// The value could not be serialised.
    #[error("Encoding failed: {message}")]
    Encode {
        /// Description from the serialiser.
        message: String,
    },

    /// The bytes could not be parsed.
    #[error("Decoding failed: {message}")]
    Decode {
        /// Description from the parser.
        message: String,
    },
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Decode {
                message: err.to_string(),
            }
        } else {
            Self::Encode {
                message: err.to_string(),
            }
        }
    }
}

/// Failure reported by an [`crate::ObjectCache`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CacheError {
    /// The cache store rejected the operation.
    #[error("Cache store failure: {message}")]
    Store {
        /// Description from the store.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Every failure a completion callback can receive.
///
/// Configuration errors (`NoStages`, `IncompleteChain`, `NotStarted`,
/// `AlreadyStarted`) indicate misuse and are never retried. Collaborator errors
/// are carried opaquely.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The chain was kicked off with an empty pre-transport stage list.
    #[error("Interceptor chain has no pre-transport stages")]
    NoStages,

    /// The post-transport stages ran out without producing a parsed result.
    #[error("Interceptor chain finished {post_stages} post-transport stage(s) without a parsed result")]
    IncompleteChain {
        /// Number of post-transport stages the chain was built with.
        post_stages: usize,
    },

    /// `kickoff` was called on a chain that already owns a completion.
    #[error("Interceptor chain was already kicked off")]
    AlreadyStarted,

    /// A call was enqueued on a batching coalescer that is not running.
    #[error("Batching coalescer is not started")]
    NotStarted,

    /// The batching coalescer was stopped while the call was still queued.
    #[error("Batching coalescer stopped before the call was flushed")]
    Stopped,

    /// The in-flight composite call was aborted.
    #[error("Operation cancelled")]
    Cancelled,

    /// A composite response did not carry one item per pending call.
    #[error("Batched response carried {received} item(s) for {expected} pending call(s)")]
    CorrelationMismatch {
        /// Number of calls drained in the flush.
        expected: usize,
        /// Number of items decoded from the response.
        received: usize,
    },

    /// The request reached a stage that needs an encoded body, but none was set.
    #[error("Outbound request has no encoded body")]
    MissingBody,

    /// The configured attempt limit was reached.
    #[error("Gave up after {attempts} attempt(s)")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The server answered with a non-success status code.
    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        /// Status code received.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The server answered with errors and no data.
    #[error("Server returned errors: {}", .messages.join("; "))]
    GraphErrors {
        /// Error messages in response order.
        messages: Vec<String>,
    },

    /// A cache-only operation found nothing under its key.
    #[error("No cached result for key '{key}'")]
    CacheMiss {
        /// The key that was looked up.
        key: String,
    },

    /// A custom stage failed.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Description of the failure.
        message: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PipelineError {
    /// Classifies this error for retry decisions.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transport(TransportError::Connection { .. } | TransportError::Timeout) => {
                RetryPolicy::Retryable { after: None }
            }
            Self::HttpStatus { status, .. } if *status == 429 || *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` for errors that indicate misconfiguration of the
    /// pipeline rather than a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NoStages | Self::IncompleteChain { .. } | Self::NotStarted | Self::AlreadyStarted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(PipelineError::from(TransportError::Timeout)
            .retry_policy()
            .is_retryable());
        assert!(PipelineError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .retry_policy()
        .is_retryable());
    }

    #[test]
    fn configuration_errors_are_never_retryable() {
        for err in [
            PipelineError::NoStages,
            PipelineError::IncompleteChain { post_stages: 2 },
            PipelineError::NotStarted,
        ] {
            assert!(err.is_configuration_error());
            assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = PipelineError::HttpStatus {
            status: 400,
            body: "bad".into(),
        };
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    }
}
