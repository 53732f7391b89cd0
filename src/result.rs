//! The value channel shared by the engine and its subscribers.
//!
//! Every computed output is delivered as an [`OutputResult`]: a reference
//! counted `Result` which is either the produced value or the
//! [`PipelineError`] explaining why there is none. Errors travel through the
//! same channel as values, so a failing output is just another state that
//! subscribers observe and branch on.
//!
//! The `Arc` is load-bearing. Two deliveries are considered the same if they
//! point at the same allocation, which is what the default notification
//! dedup compares.

use std::any::Any;
use std::sync::Arc;

use crate::error::PipelineError;

/// A type-erased, thread-safe value produced by a source node.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// The shared outcome of computing one output.
pub type OutputResult = Arc<Result<Dynamic, PipelineError>>;

/// Wraps a successfully computed value.
pub fn success(value: Dynamic) -> OutputResult {
    Arc::new(Ok(value))
}

/// Wraps an error.
pub fn error(err: PipelineError) -> OutputResult {
    Arc::new(Err(err))
}

/// Erases a concrete value into a [`Dynamic`].
pub fn dynamic<T>(value: T) -> Dynamic
where
    T: Send + Sync + 'static,
{
    Arc::new(value)
}

/// Borrows the success payload as `T`.
///
/// Returns `None` for an error result, or when the payload has another type.
pub fn downcast<T>(result: &OutputResult) -> Option<&T>
where
    T: 'static,
{
    match result.as_ref() {
        Ok(value) => value.downcast_ref::<T>(),
        Err(_) => None,
    }
}
