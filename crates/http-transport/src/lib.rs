//! QueryChain transport sender over HTTP.
//!
//! Implements [`pipeline::TransportSender`] with a pooled `reqwest` client:
//! every request is a `POST` of the encoded body to one configured endpoint.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** URL parsing, header validation, timeouts and the mapping
//! of client failures onto [`pipeline::TransportError`] live here. The chain
//! and the coalescer see only [`pipeline::TransportSender`].

pub mod config;
pub mod errors;
pub mod sender;

pub use config::HttpTransportConfig;
pub use errors::HttpTransportError;
pub use sender::HttpTransportSender;
