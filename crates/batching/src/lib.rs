//! Request coalescing for QueryChain.
//!
//! A [`BatchCoalescer`] collects calls from many interceptor chains and sends
//! them as one composite request on a fixed timer. Each chain reaches it
//! through its own [`BatchingTransport`] stage.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Timers and task spawning need a Tokio runtime; the
//! [`pipeline`] crate sees only [`pipeline::TransportStage`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`scheduler`] | `PeriodicScheduler` fixed-interval timer |
//! | [`ledger`] | `PendingCall`, `PendingLedger` |
//! | [`coalescer`] | `BatchCoalescer`, `BatchConfig` |
//! | [`transport`] | `BatchingTransport` stage |

pub mod coalescer;
pub mod errors;
pub mod ledger;
pub mod scheduler;
pub mod transport;

pub use coalescer::{BatchCoalescer, BatchConfig};
pub use errors::BatchError;
pub use ledger::{CallCompletion, PendingCall, PendingLedger};
pub use scheduler::{JobFuture, PeriodicScheduler, ScheduledJob};
pub use transport::BatchingTransport;
