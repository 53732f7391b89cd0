use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::engine::{Callback, Pipeline};
use crate::error::PipelineError;

/// Capability returned by [`Pipeline::register_source_node`], bound to the id
/// of the registered node.
#[derive(Clone)]
pub struct SourceHandle {
    pub(crate) pipeline: Pipeline,
    pub(crate) node_id: Arc<str>,
}

impl SourceHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Drops the cached values of `keys` (every declared output when `None`),
    /// recomputes them and notifies current subscribers.
    pub async fn invalidate(&self, keys: Option<&[&str]>) -> Result<(), PipelineError> {
        self.pipeline.invalidate_output(&self.node_id, keys).await
    }
}

/// Initial delivery of a subscription.
pub(crate) enum Delivery {
    /// Running on the tokio runtime `subscribe` was called from.
    Spawned(JoinHandle<()>),
    /// No runtime was around, runs when awaited.
    Deferred(BoxFuture<'static, ()>),
}

/// A live subscription created by [`Pipeline::subscribe`].
///
/// Dropping the subscription does not unsubscribe, call
/// [`unsubscribe`](Self::unsubscribe) for that.
pub struct Subscription {
    pub(crate) pipeline: Pipeline,
    pub(crate) node_id: Arc<str>,
    pub(crate) output_id: Arc<str>,
    pub(crate) callback: Callback,
    pub(crate) done: Option<Delivery>,
}

impl Subscription {
    /// Removes the callback this subscription was created with.
    pub fn unsubscribe(&self) {
        self.pipeline
            .unsubscribe(&self.node_id, &self.output_id, &self.callback);
    }

    /// Waits for the initial delivery triggered by subscribing.
    ///
    /// Once this returns the callback has seen the value that was current at
    /// that point, or a newer one. When the subscription was created outside
    /// a tokio runtime, the delivery itself happens here.
    ///
    /// # Panics
    /// Resumes the panic of a subscriber callback raised during the initial
    /// delivery.
    pub async fn done(&mut self) {
        match self.done.take() {
            Some(Delivery::Spawned(handle)) => {
                if let Err(err) = handle.await
                    && err.is_panic()
                {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
            Some(Delivery::Deferred(emit)) => emit.await,
            None => {}
        }
    }
}
