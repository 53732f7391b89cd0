use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::result::Dynamic;
use crate::schema::Schema;

/// Declared outputs of a node, keyed by output id.
pub type OutputSchemas = BTreeMap<Arc<str>, Arc<dyn Schema>>;

/// A producer of named, schema-checked outputs.
///
/// The engine never knows how a value is made. It asks the node for a raw
/// value with [`get_output`](Self::get_output) and validates it afterwards
/// against the schema found in [`outputs`](Self::outputs).
pub trait PipelineSource: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn outputs(&self) -> &OutputSchemas;

    /// Computes the raw value of one output.
    ///
    /// This is the only place the engine waits on userland code, the future
    /// may take as long as it needs. There is no timeout.
    fn get_output<'a>(&'a self, output_id: &'a str) -> BoxFuture<'a, anyhow::Result<Dynamic>>;
}

type ComputeFn = Arc<dyn Fn(&str) -> BoxFuture<'static, anyhow::Result<Dynamic>> + Send + Sync>;

/// A [`PipelineSource`] assembled from a closure.
///
/// ```rust
/// use noya_pipeline::{SourceNode, schema};
///
/// let node = SourceNode::new("node1", "Fill")
///     .output("color", schema::is::<String>())
///     .compute(|_| async { Ok(String::from("#FF0000")) });
/// ```
#[derive(Clone)]
pub struct SourceNode {
    id: Arc<str>,
    name: String,
    outputs: OutputSchemas,
    compute: ComputeFn,
}

impl SourceNode {
    pub fn new(id: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        let id: Arc<str> = id.into();
        let missing = id.clone();

        Self {
            id,
            name: name.into(),
            outputs: OutputSchemas::new(),
            compute: Arc::new(move |_: &str| {
                let id = missing.clone();
                async move { Err::<Dynamic, _>(anyhow::anyhow!("Node '{id}' has no compute function")) }
                    .boxed()
            }),
        }
    }

    /// Declares an output and its schema.
    pub fn output(mut self, output_id: impl Into<Arc<str>>, schema: impl Schema + 'static) -> Self {
        self.outputs.insert(output_id.into(), Arc::new(schema));
        self
    }

    /// Sets the asynchronous function which computes every output.
    pub fn compute<F, Fut, T>(mut self, func: F) -> Self
    where
        F: Fn(&str) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        self.compute = Arc::new(move |output_id: &str| {
            func(output_id)
                .map(|res| res.map(|value| Arc::new(value) as Dynamic))
                .boxed()
        });
        self
    }

    /// Same as [`compute`](Self::compute), for producers that never wait.
    pub fn compute_sync<F, T>(mut self, func: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.compute = Arc::new(move |output_id: &str| {
            let res = func(output_id).map(|value| Arc::new(value) as Dynamic);
            futures::future::ready(res).boxed()
        });
        self
    }
}

impl PipelineSource for SourceNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> &OutputSchemas {
        &self.outputs
    }

    fn get_output<'a>(&'a self, output_id: &'a str) -> BoxFuture<'a, anyhow::Result<Dynamic>> {
        (self.compute)(output_id)
    }
}

impl Debug for SourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[tokio::test]
    async fn test_compute_receives_output_id() {
        let node = SourceNode::new("node1", "Node")
            .output("a", schema::any())
            .output("b", schema::any())
            .compute(|output_id| {
                let output_id = output_id.to_uppercase();
                async move { Ok(output_id) }
            });

        let value = node.get_output("b").await.unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "B");
        assert_eq!(node.outputs().len(), 2);
        assert_eq!(node.id(), "node1");
        assert_eq!(node.name(), "Node");
    }

    #[tokio::test]
    async fn test_compute_sync() {
        let node = SourceNode::new("node1", "Node")
            .output("n", schema::is::<u32>())
            .compute_sync(|_| Ok(7u32));

        let value = node.get_output("n").await.unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
    }

    #[tokio::test]
    async fn test_missing_compute_fails() {
        let node = SourceNode::new("node1", "Node").output("n", schema::any());

        let err = node.get_output("n").await.unwrap_err();
        assert!(err.to_string().contains("node1"));
    }
}
