#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod context;
mod engine;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
mod node;
pub mod result;
pub mod schema;

pub use crate::cache::ObjectCache;
pub use crate::context::PipelineContext;
pub use crate::engine::{
    Callback, Config, Equality, Pipeline, SourceHandle, Subscription, callback,
};
pub use crate::error::*;
pub use crate::node::{OutputSchemas, PipelineSource, SourceNode};
pub use crate::result::{Dynamic, OutputResult};
pub use crate::schema::Schema;
