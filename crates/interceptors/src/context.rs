//! Callback context that runs completions on a Tokio runtime.

use pipeline::{CallbackContext, Job};
use tokio::runtime::Handle;

/// Delivers completions on a Tokio runtime instead of the thread that
/// finished the chain.
#[derive(Debug, Clone)]
pub struct TokioCallbackContext {
    handle: Handle,
}

impl TokioCallbackContext {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling task, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl CallbackContext for TokioCallbackContext {
    fn execute(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}
