//! Value types that flow through an interceptor chain.
//!
//! An [`Operation`] is created once and shared read-only (`Arc<Operation>`)
//! across every attempt. Each attempt gets its own [`OutboundRequest`], which
//! pre-transport stages enrich with headers and an encoded body. The transport
//! stage turns the request into an [`InboundResponse`], which post-transport
//! stages move along by value until one of them fills in the parsed result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CacheKey, OperationId, OperationName, RequestId};

/// Fully parsed result of an operation, as delivered to the caller.
pub type ParsedValue = Value;

/// Header map with case-preserved names, ordered for deterministic encoding.
pub type Headers = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Whether an operation reads or writes remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Read-only request; eligible for caching.
    Query,
    /// State-changing request; never served from cache.
    Mutation,
}

/// Immutable description of one remote query or mutation.
///
/// Built with the consuming `with_*` methods, then frozen behind an `Arc` for
/// the lifetime of its chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    name: OperationName,
    kind: OperationKind,
    document: String,
    variables: Map<String, Value>,
    batchable: bool,
}

impl Operation {
    /// Creates an operation with no variables that is not eligible for batching.
    pub fn new(name: OperationName, kind: OperationKind, document: impl Into<String>) -> Self {
        Self {
            id: OperationId::new_random(),
            name,
            kind,
            document: document.into(),
            variables: Map::new(),
            batchable: false,
        }
    }

    /// Replaces the variable map.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Marks the operation as eligible (or not) for request coalescing.
    #[must_use]
    pub fn with_batching(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &OperationName {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn is_batchable(&self) -> bool {
        self.batchable
    }

    /// Derives the cache key for this operation.
    ///
    /// `serde_json::Map` is ordered by key, so equal variable sets always
    /// serialise identically.
    pub fn cache_key(&self) -> CacheKey {
        let vars = Value::Object(self.variables.clone()).to_string();
        CacheKey::derived(format!("{}:{}", self.name, vars))
    }
}

// ---------------------------------------------------------------------------
// Cache policy
// ---------------------------------------------------------------------------

/// How the cache stages treat a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Always go to the network; never read or write the cache.
    #[default]
    NetworkOnly,
    /// Serve from cache when present, otherwise fetch and store.
    CacheFirst,
    /// Serve from cache or fail with a cache miss; never fetch.
    CacheOnly,
    /// Always fetch and store the result; the cache is only written.
    NetworkFirst,
}

impl CachePolicy {
    /// Returns `true` if the read stage should consult the cache.
    pub fn reads_cache(self) -> bool {
        matches!(self, Self::CacheFirst | Self::CacheOnly)
    }

    /// Returns `true` if the write stage should store fetched results.
    pub fn writes_cache(self) -> bool {
        matches!(self, Self::CacheFirst | Self::NetworkFirst)
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// Per-attempt wrapper around an [`Operation`].
///
/// Owned by exactly one chain for the duration of one attempt. A retry calls
/// [`OutboundRequest::next_attempt`], which starts from a clean encoding.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    operation: Arc<Operation>,
    request_id: RequestId,
    attempt: u32,
    /// Transport headers accumulated by pre-transport stages.
    pub headers: Headers,
    /// Encoded request body; `None` until an encoding stage has run.
    pub body: Option<Vec<u8>>,
    /// Cache behaviour for this request.
    pub cache_policy: CachePolicy,
}

impl OutboundRequest {
    /// Creates the first attempt for `operation`.
    pub fn new(operation: Arc<Operation>) -> Self {
        Self {
            operation,
            request_id: RequestId::new_random(),
            attempt: 1,
            headers: Headers::new(),
            body: None,
            cache_policy: CachePolicy::default(),
        }
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Derives the request for the following attempt of the same operation.
    ///
    /// Headers and body are dropped; the cache policy is carried over.
    pub fn next_attempt(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            request_id: RequestId::new_random(),
            attempt: self.attempt + 1,
            headers: Headers::new(),
            body: None,
            cache_policy: self.cache_policy,
        }
    }

    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// One-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// What a pre-transport pipeline hands to a [`crate::TransportSender`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// What a [`crate::TransportSender`] returns for one physical call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Transport-level facts about a response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMetadata {
    pub status: u16,
    pub headers: Headers,
    pub received_at: Timestamp,
}

/// Response travelling through the post-transport stages.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundResponse {
    /// Raw response bytes.
    pub body: Vec<u8>,
    pub metadata: TransportMetadata,
    /// Parsed result; `None` until a parsing stage has run.
    pub parsed: Option<ParsedValue>,
}

impl InboundResponse {
    /// Wraps a raw transport response, stamping the receipt time.
    pub fn from_transport(response: TransportResponse) -> Self {
        Self {
            body: response.body,
            metadata: TransportMetadata {
                status: response.status,
                headers: response.headers,
                received_at: Timestamp::now(),
            },
            parsed: None,
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.metadata.status)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
