//! Standard QueryChain stages and the client that drives them.
//!
//! This crate provides the default pre-transport stages (retry guard, headers,
//! cache read, request encoding), the direct network transport, the default
//! post-transport stages (status check, parsing, cache write), the retrying
//! escalation hook, and [`DefaultInterceptorProvider`], which assembles them
//! into a [`pipeline::StageSet`] per operation. [`QueryClient`] turns a chain
//! into an `async fn`.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Stages sequence calls between the chain in the
//! [`pipeline`] crate and infrastructure ports (transport sender, codec,
//! cache). Batchable operations are handed to the [`batching`] crate.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`request`] | `MaxRetryInterceptor`, `HeaderInterceptor`, `RequestEncodingInterceptor` |
//! | [`cache`] | `InMemoryCache`, `CacheReadInterceptor`, `CacheWriteInterceptor` |
//! | [`network`] | `NetworkTransport` |
//! | [`context`] | `TokioCallbackContext` |
//! | [`response`] | `ResponseCodeInterceptor`, `JsonParseInterceptor` |
//! | [`retry`] | `RetryConfig`, `RetryOnErrorEscalation` |
//! | [`provider`] | `DefaultInterceptorProvider` |
//! | [`client`] | `QueryClient`, `PendingResult` |

pub mod cache;
pub mod client;
pub mod context;
pub mod network;
pub mod provider;
pub mod request;
pub mod response;
pub mod retry;

#[cfg(test)]
mod testing;

pub use cache::{CacheReadInterceptor, CacheWriteInterceptor, InMemoryCache};
pub use client::{PendingResult, QueryClient};
pub use context::TokioCallbackContext;
pub use network::NetworkTransport;
pub use provider::DefaultInterceptorProvider;
pub use request::{HeaderInterceptor, MaxRetryInterceptor, RequestEncodingInterceptor};
pub use response::{JsonParseInterceptor, ResponseCodeInterceptor};
pub use retry::{RetryConfig, RetryOnErrorEscalation};
