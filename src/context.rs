use std::sync::OnceLock;

use crate::engine::{Config, Pipeline};

/// Owns the pipeline of an application.
///
/// The pipeline is built on first access and lives as long as the context.
/// Hosts create one context at their composition root and hand out
/// [`Pipeline`] clones from it, nothing here is global.
#[derive(Debug, Default)]
pub struct PipelineContext {
    config: Config,
    pipeline: OnceLock<Pipeline>,
}

impl PipelineContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pipeline: OnceLock::new(),
        }
    }

    /// Returns the pipeline, building it the first time.
    pub fn pipeline(&self) -> &Pipeline {
        self.pipeline.get_or_init(|| {
            tracing::debug!("building pipeline");
            self.config.clone().finish()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.get().is_some()
    }
}
