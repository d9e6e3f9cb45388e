//! Core execution domain for QueryChain.
//!
//! This crate holds the interceptor chain, the stage traits it is assembled
//! from, the value types that flow through it, and the port traits for the
//! collaborators it consumes (transport sender, payload codec, object cache,
//! interceptor provider). Infrastructure crates implement the ports; they never
//! add rules to the chain.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies
//! and no async runtime. It defines *what* is needed; infrastructure crates
//! define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`OperationId`, `RequestId`, `CacheKey`, ...) |
//! | [`types`] | `Operation`, `OutboundRequest`, `InboundResponse`, transport values |
//! | [`errors`] | `PipelineError`, collaborator errors, `RetryPolicy` |
//! | [`interceptor`] | Stage traits, `Escalation`, `StageSet` |
//! | [`chain`] | `InterceptorChain` state machine |
//! | [`context`] | Callback contexts |
//! | [`ports`] | Collaborator traits |
//! | [`codec`] | `JsonCodec` |

pub mod chain;
pub mod codec;
pub mod context;
pub mod errors;
pub mod identifiers;
pub mod interceptor;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use chain::{Completion, Cursor, InterceptorChain};
pub use codec::JsonCodec;
pub use context::{CallbackContext, InlineContext, Job};
pub use errors::{CacheError, CodecError, PipelineError, RetryPolicy, TransportError};
pub use identifiers::{CacheKey, OperationId, OperationName, RequestId};
pub use interceptor::{
    ErrorEscalation, Escalation, RequestInterceptor, ResponseInterceptor, StageSet,
    TransportStage,
};
pub use ports::{InterceptorProvider, ObjectCache, PayloadCodec, TransportSender};
pub use types::{
    CachePolicy, Headers, InboundResponse, Operation, OperationKind, OutboundRequest,
    ParsedValue, Timestamp, TransportMetadata, TransportRequest, TransportResponse,
};
