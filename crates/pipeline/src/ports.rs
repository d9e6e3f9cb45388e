//! Port traits for the collaborators the pipeline consumes.
//!
//! Infrastructure crates implement these; this crate never performs I/O.

use async_trait::async_trait;

use crate::{
    CacheError, CacheKey, CodecError, Operation, ParsedValue, StageSet, TransportError,
    TransportRequest, TransportResponse,
};

/// Sends one physical request and returns its raw response.
///
/// Cancellation is done by dropping or aborting the future.
#[async_trait]
pub trait TransportSender: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Encodes operations and composite bodies, decodes responses.
pub trait PayloadCodec: Send + Sync {
    /// MIME type written to the `content-type` header.
    fn content_type(&self) -> &'static str;

    fn encode_operation(&self, operation: &Operation) -> Result<Vec<u8>, CodecError>;

    /// Wraps individually encoded items into one ordered sequence.
    fn encode_sequence(&self, items: &[&[u8]]) -> Result<Vec<u8>, CodecError>;

    /// Splits a sequence body back into its items, preserving order.
    fn decode_sequence(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<ParsedValue, CodecError>;
}

/// Key-value store for parsed results.
///
/// Normalisation and key derivation rules belong to the implementation.
pub trait ObjectCache: Send + Sync {
    fn read(&self, key: &CacheKey) -> Result<Option<ParsedValue>, CacheError>;

    fn merge(&self, key: CacheKey, value: ParsedValue) -> Result<(), CacheError>;

    /// Removes one entry, returning whether it existed.
    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    fn clear(&self) -> Result<(), CacheError>;
}

/// Chooses the stages a chain for `operation` is built from.
pub trait InterceptorProvider: Send + Sync {
    fn stages_for(&self, operation: &Operation) -> StageSet;
}
