//! The dataflow engine.
//!
//! A [`Pipeline`] owns every registered source node together with three
//! pieces of bookkeeping:
//!
//! * the output cache, `node -> output -> OutputResult`, filled lazily and
//!   cleared by invalidation,
//! * the subscriptions, `node -> output -> [callback]`, kept in registration
//!   order which is also the notification order,
//! * the last result delivered to each callback, used to skip redundant
//!   notifications.
//!
//! ## Slot lifecycle
//!
//! Each `(node, output)` slot is either uncached or cached. Asking for an
//! uncached slot starts a computation, and concurrent askers share it through
//! the in-flight table instead of calling the node again. Invalidation clears
//! both the cached result and any in-flight computation, then emits again. A
//! computation which was cleared while running still hands its result to the
//! callers that awaited it, but it never writes the cache, so an old value
//! cannot overwrite a newer one.
//!
//! ## Locking
//!
//! All state lives behind a single mutex. It is never held across an
//! `.await`, nor while a subscriber callback runs, so callbacks are free to
//! subscribe, unsubscribe or invalidate.
//!
//! Delivery of one slot goes through an async gate. An emit reads the cached
//! result and the subscribers to call only after taking the gate, and calls
//! them before releasing it, so subscribers always end on the newest result.

mod equality;
mod handle;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tokio::sync::Mutex as AsyncMutex;
use tracing::Level;

use crate::cache::ObjectCache;
use crate::error::{ComputeError, PipelineError};
use crate::node::PipelineSource;
use crate::result::{OutputResult, error, success};
use crate::schema::Schema;

pub use crate::engine::equality::Equality;
pub use crate::engine::handle::{SourceHandle, Subscription};

use crate::engine::handle::Delivery;

/// Subscriber callback. Identity is the `Arc` allocation, so pass clones of the
/// same `Arc` to refer to the same subscriber.
pub type Callback = Arc<dyn Fn(OutputResult) + Send + Sync>;

/// Wraps a closure into a [`Callback`].
pub fn callback<F>(func: F) -> Callback
where
    F: Fn(OutputResult) + Send + Sync + 'static,
{
    Arc::new(func)
}

type Flight = Shared<BoxFuture<'static, OutputResult>>;

struct InFlight {
    ticket: u64,
    future: Flight,
}

/// Last delivery made to one callback.
struct Emitted {
    /// Keeps the callback allocation alive, so its address can't be reused by
    /// another callback while this entry exists.
    _callback: Weak<dyn Fn(OutputResult) + Send + Sync>,
    result: Option<OutputResult>,
    registrations: usize,
}

#[derive(Default)]
struct State {
    nodes: HashMap<Arc<str>, Arc<dyn PipelineSource>>,
    outputs: ObjectCache<OutputResult>,
    subscriptions: ObjectCache<Vec<Callback>>,
    emitted: HashMap<usize, Emitted>,
    flights: ObjectCache<InFlight>,
    /// Serializes deliveries per slot, present while an emit is running.
    deliveries: ObjectCache<Arc<AsyncMutex<()>>>,
    /// Bumped whenever cached outputs are dropped.
    clears: u64,
}

impl State {
    fn node(&self, node_id: &str) -> Result<Arc<dyn PipelineSource>, PipelineError> {
        self.nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| PipelineError::NodeNotFound(node_id.into()))
    }

    fn schema(
        &self,
        node_id: &str,
        output_id: &str,
    ) -> Result<(Arc<dyn PipelineSource>, Arc<dyn Schema>), PipelineError> {
        let node = self.node(node_id)?;
        let schema = node
            .outputs()
            .get(output_id)
            .cloned()
            .ok_or_else(|| PipelineError::OutputNotFound {
                node: node_id.into(),
                output: output_id.into(),
            })?;

        Ok((node, schema))
    }

    fn clear(&mut self, node_id: &str, output_id: &str) {
        self.outputs.delete(node_id, output_id);
        self.flights.delete(node_id, output_id);
        self.clears += 1;
    }
}

fn identity(callback: &Callback) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

/// Engine configuration, see [`Pipeline::config`].
#[derive(Debug, Clone)]
pub struct Config {
    name: Arc<str>,
    equality: Equality,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "pipeline".into(),
            equality: Equality::default(),
        }
    }
}

impl Config {
    /// Label attached to the engine's tracing events.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Policy used to skip notifying a subscriber about a result it already
    /// received.
    pub fn equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn finish(self) -> Pipeline {
        Pipeline {
            inner: Arc::new(Inner {
                name: self.name,
                equality: self.equality,
                tickets: AtomicU64::new(0),
                state: Mutex::new(State::default()),
            }),
        }
    }
}

struct Inner {
    name: Arc<str>,
    equality: Equality,
    tickets: AtomicU64,
    state: Mutex<State>,
}

/// A reactive, cached graph of source node outputs.
///
/// `Pipeline` is a handle, cloning it is cheap and every clone drives the same
/// engine.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("equality", &self.inner.equality)
            .field("nodes", &state.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Config::default().finish()
    }

    pub fn config() -> Config {
        Config::default()
    }

    /// Registers a node under its id and returns a handle for invalidating it.
    ///
    /// Registering over an existing id replaces that node. Every cached output
    /// of the id is dropped, computations still running for the old node are
    /// orphaned, and subscribed outputs are emitted again from the new node.
    /// Those emits are spawned onto the current tokio runtime. Without one,
    /// subscribers see the new node on the next invalidation.
    pub fn register_source_node<S>(&self, node: S) -> SourceHandle
    where
        S: PipelineSource + 'static,
    {
        self.register_shared(Arc::new(node))
    }

    /// Same as [`register_source_node`](Self::register_source_node), for a
    /// node that is already shared.
    pub fn register_shared(&self, node: Arc<dyn PipelineSource>) -> SourceHandle {
        let node_id: Arc<str> = node.id().into();

        let subscribed: Vec<Arc<str>> = {
            let mut state = self.inner.state.lock().unwrap();

            if state.nodes.insert(node_id.clone(), node).is_some() {
                tracing::warn!(
                    pipeline = %self.inner.name,
                    node = %node_id,
                    "node re-registered, dropping its cached outputs"
                );
                state.outputs.delete_all(&node_id);
                state.flights.delete_all(&node_id);
                state.clears += 1;

                state
                    .subscriptions
                    .entries(&node_id)
                    .into_iter()
                    .map(|(output_id, _)| Arc::from(output_id))
                    .collect()
            } else {
                tracing::debug!(pipeline = %self.inner.name, node = %node_id, "node registered");
                Vec::new()
            }
        };

        if !subscribed.is_empty() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    for output_id in subscribed {
                        runtime.spawn(self.emit_task(node_id.clone(), output_id));
                    }
                }
                Err(_) => tracing::debug!(
                    pipeline = %self.inner.name,
                    node = %node_id,
                    "no tokio runtime, subscribers refresh on the next invalidation"
                ),
            }
        }

        SourceHandle {
            pipeline: self.clone(),
            node_id,
        }
    }

    /// Removes a node with its cached outputs. Subscriptions are kept and will
    /// observe [`PipelineError::NodeNotFound`] on their next emit.
    pub fn unregister_source_node(&self, node_id: &str) -> Option<Arc<dyn PipelineSource>> {
        let mut state = self.inner.state.lock().unwrap();
        let node = state.nodes.remove(node_id)?;

        state.outputs.delete_all(node_id);
        state.flights.delete_all(node_id);
        state.clears += 1;

        tracing::debug!(pipeline = %self.inner.name, node = node_id, "node unregistered");
        Some(node)
    }

    pub fn get_source_node(&self, node_id: &str) -> Result<Arc<dyn PipelineSource>, PipelineError> {
        self.inner.state.lock().unwrap().node(node_id)
    }

    pub fn get_output_schema(
        &self,
        node_id: &str,
        output_id: &str,
    ) -> Result<Arc<dyn Schema>, PipelineError> {
        let node = self.get_source_node(node_id)?;

        node.outputs()
            .get(output_id)
            .cloned()
            .ok_or_else(|| PipelineError::OutputNotFound {
                node: node_id.into(),
                output: output_id.into(),
            })
    }

    /// Computes and validates one output, bypassing the cache entirely.
    pub async fn compute_output(&self, node_id: &str, output_id: &str) -> OutputResult {
        let node = match self.get_source_node(node_id) {
            Ok(node) => node,
            Err(err) => return error(err),
        };
        let schema = match self.get_output_schema(node_id, output_id) {
            Ok(schema) => schema,
            Err(err) => return error(err),
        };

        evaluate(node, schema, node_id.into(), output_id.into()).await
    }

    /// Returns the cached result without computing anything.
    pub fn cached(&self, node_id: &str, output_id: &str) -> Option<OutputResult> {
        let state = self.inner.state.lock().unwrap();
        state.outputs.get(node_id, output_id).cloned()
    }

    /// Returns the cached result, computing and caching it on a miss.
    pub async fn output(&self, node_id: &str, output_id: &str) -> OutputResult {
        match self.cached(node_id, output_id) {
            Some(result) => result,
            None => self.update_cache(node_id, output_id).await,
        }
    }

    /// Computes the output and stores the result, errors included.
    ///
    /// Concurrent callers for the same slot share a single computation. The
    /// result is cached only if the slot wasn't cleared while computing.
    async fn update_cache(&self, node_id: &str, output_id: &str) -> OutputResult {
        let flight = {
            let mut state = self.inner.state.lock().unwrap();

            match state.flights.get(node_id, output_id) {
                Some(in_flight) => in_flight.future.clone(),
                None => {
                    let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed);
                    let future = self.flight(&state, node_id, output_id, ticket);

                    state.flights.set(
                        node_id,
                        output_id,
                        InFlight {
                            ticket,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        flight.await
    }

    fn flight(&self, state: &State, node_id: &str, output_id: &str, ticket: u64) -> Flight {
        let node_id: Arc<str> = node_id.into();
        let output_id: Arc<str> = output_id.into();
        let resolved = state.schema(&node_id, &output_id);
        let inner = Arc::downgrade(&self.inner);

        async move {
            let result = match resolved {
                Ok((node, schema)) => {
                    evaluate(node, schema, node_id.clone(), output_id.clone()).await
                }
                Err(err) => error(err),
            };

            if let Some(inner) = inner.upgrade() {
                let mut state = inner.state.lock().unwrap();

                let current = state
                    .flights
                    .get(&node_id, &output_id)
                    .is_some_and(|in_flight| in_flight.ticket == ticket);

                if current {
                    state.flights.delete(&node_id, &output_id);
                    state.outputs.set(&node_id, &output_id, result.clone());
                    tracing::trace!(
                        pipeline = %inner.name,
                        node = %node_id,
                        output = %output_id,
                        ok = result.is_ok(),
                        "output cached"
                    );
                } else {
                    tracing::trace!(
                        pipeline = %inner.name,
                        node = %node_id,
                        output = %output_id,
                        "output cleared while computing, result not cached"
                    );
                }
            }

            result
        }
        .boxed()
        .shared()
    }

    /// Makes sure the slot holds a result and notifies every subscriber that
    /// hasn't seen it yet.
    ///
    /// Deliveries for one slot are serialized. Each emit reads the cache and
    /// picks its subscribers only once it holds the slot's delivery gate, so
    /// a later emit can never be overtaken by an earlier one still calling
    /// back.
    ///
    /// # Panics
    /// If the slot is empty right after it was filled while nothing cleared
    /// any output in between. Emitting again would only recompute forever.
    async fn emit(&self, node_id: &str, output_id: &str) {
        let gate = {
            let mut state = self.inner.state.lock().unwrap();
            match state.deliveries.get(node_id, output_id) {
                Some(gate) => gate.clone(),
                None => {
                    let gate = Arc::new(AsyncMutex::new(()));
                    state.deliveries.set(node_id, output_id, gate.clone());
                    gate
                }
            }
        };

        loop {
            let (cached, clears) = {
                let state = self.inner.state.lock().unwrap();
                (state.outputs.get(node_id, output_id).is_some(), state.clears)
            };

            if !cached {
                self.update_cache(node_id, output_id).await;
            }

            let _delivery = gate.lock().await;

            let ready = {
                let mut state = self.inner.state.lock().unwrap();
                let current = state.outputs.get(node_id, output_id).cloned();

                match current {
                    Some(current) => {
                        let pending = self.pending(&mut state, node_id, output_id, &current);
                        Some((current, pending))
                    }
                    None if state.clears != clears => None,
                    None => {
                        drop(state);
                        panic!(
                            "Output '{output_id}' of node '{node_id}' is not cached right after \
                             being computed. Aborting pipeline to avoid infinite loop."
                        );
                    }
                }
            };

            // Cleared while computing, by an invalidation or a node being
            // replaced or removed. Compute again against the new state.
            let Some((current, pending)) = ready else {
                tracing::trace!(
                    pipeline = %self.inner.name,
                    node = node_id,
                    output = output_id,
                    "output cleared before delivery, retrying"
                );
                continue;
            };

            let span = tracing::span!(
                Level::DEBUG,
                "emit",
                pipeline = %self.inner.name,
                node = node_id,
                output = output_id
            );
            span.in_scope(|| {
                tracing::debug!(subscribers = pending.len(), "notifying");
                for callback in pending {
                    callback(current.clone());
                }
            });
            break;
        }

        let mut state = self.inner.state.lock().unwrap();
        let idle = state
            .deliveries
            .get(node_id, output_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &gate) && Arc::strong_count(&gate) == 2);
        if idle {
            state.deliveries.delete(node_id, output_id);
        }
    }

    /// Subscribers of the slot that haven't received `current` yet, marked as
    /// having received it.
    fn pending(
        &self,
        state: &mut State,
        node_id: &str,
        output_id: &str,
        current: &OutputResult,
    ) -> Vec<Callback> {
        let State {
            subscriptions,
            emitted,
            ..
        } = state;

        let callbacks = subscriptions
            .get(node_id, output_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut pending = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            let Some(entry) = emitted.get_mut(&identity(callback)) else {
                continue;
            };

            if let Some(last) = &entry.result
                && self.inner.equality.same(last, current)
            {
                continue;
            }

            entry.result = Some(current.clone());
            pending.push(callback.clone());
        }
        pending
    }

    /// Emit as an owned future, for spawning.
    fn emit_task(&self, node_id: Arc<str>, output_id: Arc<str>) -> BoxFuture<'static, ()> {
        let pipeline = self.clone();
        async move { pipeline.emit(&node_id, &output_id).await }.boxed()
    }

    /// Registers `callback` for one output and starts delivering the current
    /// value right away.
    ///
    /// Inside a tokio runtime the initial delivery is spawned onto it. Without
    /// one it runs when [`Subscription::done`] is awaited.
    pub fn subscribe(&self, node_id: &str, output_id: &str, callback: Callback) -> Subscription {
        {
            let mut state = self.inner.state.lock().unwrap();

            match state.subscriptions.get_mut(node_id, output_id) {
                Some(callbacks) => callbacks.push(callback.clone()),
                None => state
                    .subscriptions
                    .set(node_id, output_id, vec![callback.clone()]),
            }

            state
                .emitted
                .entry(identity(&callback))
                .or_insert_with(|| Emitted {
                    _callback: Arc::downgrade(&callback),
                    result: None,
                    registrations: 0,
                })
                .registrations += 1;
        }

        let node_id: Arc<str> = node_id.into();
        let output_id: Arc<str> = output_id.into();

        let emit = self.emit_task(node_id.clone(), output_id.clone());
        let done = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Delivery::Spawned(runtime.spawn(emit)),
            Err(_) => Delivery::Deferred(emit),
        };

        Subscription {
            pipeline: self.clone(),
            node_id,
            output_id,
            callback,
            done: Some(done),
        }
    }

    /// Removes every registration of `callback` for this output.
    pub fn unsubscribe(&self, node_id: &str, output_id: &str, callback: &Callback) {
        let mut state = self.inner.state.lock().unwrap();

        let Some(callbacks) = state.subscriptions.get_mut(node_id, output_id) else {
            return;
        };

        let before = callbacks.len();
        callbacks.retain(|item| !Arc::ptr_eq(item, callback));
        let removed = before - callbacks.len();

        if callbacks.is_empty() {
            state.subscriptions.delete(node_id, output_id);
        }

        let key = identity(callback);
        if let Some(entry) = state.emitted.get_mut(&key) {
            entry.registrations = entry.registrations.saturating_sub(removed);
            if entry.registrations == 0 {
                state.emitted.remove(&key);
            }
        }
    }

    /// Drops cached values of `keys` (every declared output when `None`),
    /// then recomputes them and notifies current subscribers.
    ///
    /// Invalidating a node that was never registered is a usage error and is
    /// returned as [`PipelineError::NodeNotFound`].
    pub async fn invalidate_output(
        &self,
        node_id: &str,
        keys: Option<&[&str]>,
    ) -> Result<(), PipelineError> {
        let node = self.get_source_node(node_id)?;

        let keys: Vec<Arc<str>> = match keys {
            Some(keys) => keys.iter().map(|&key| Arc::from(key)).collect(),
            None => node.outputs().keys().cloned().collect(),
        };

        tracing::debug!(
            pipeline = %self.inner.name,
            node = node_id,
            keys = keys.len(),
            "invalidating"
        );

        {
            let mut state = self.inner.state.lock().unwrap();
            for key in &keys {
                state.clear(node_id, key);
            }
        }

        join_all(keys.iter().map(|key| self.emit(node_id, key))).await;

        Ok(())
    }
}

async fn evaluate(
    node: Arc<dyn PipelineSource>,
    schema: Arc<dyn Schema>,
    node_id: Arc<str>,
    output_id: Arc<str>,
) -> OutputResult {
    let value = match node.get_output(&output_id).await {
        Ok(value) => value,
        Err(err) => {
            return error(PipelineError::Compute {
                node: node_id,
                output: output_id,
                source: ComputeError::new(err),
            });
        }
    };

    match schema.validate(&value) {
        Ok(()) => success(value),
        Err(source) => error(PipelineError::Validation {
            node: node_id,
            output: output_id,
            source,
        }),
    }
}
