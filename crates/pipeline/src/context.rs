//! Where completion callbacks run.
//!
//! The chain never calls a completion directly; it hands a job to the
//! [`CallbackContext`] it was built with. [`InlineContext`] runs the job on
//! the calling thread. Runtime-backed contexts live in infrastructure crates.

/// A unit of work scheduled on a [`CallbackContext`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes completion callbacks on a caller-chosen thread or runtime.
pub trait CallbackContext: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs every job immediately on the thread that delivers the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

impl CallbackContext for InlineContext {
    fn execute(&self, job: Job) {
        job();
    }
}
