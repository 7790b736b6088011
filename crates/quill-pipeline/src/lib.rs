//! # quill-pipeline
//!
//! Asynchronous multi-stage ingestion for quill.
//!
//! Knowledge items move `Summarize` → `Embedding` → `Done`. This crate
//! provides:
//! - A dispatcher with one bounded queue per stage (full queues apply
//!   backpressure to submitters)
//! - Fixed worker pools per stage behind a shared in-flight guard, so one
//!   item is never processed twice at once
//! - A recovery flusher that re-submits unfinished items on an interval
//! - An ingestion facade for creating and editing items
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use quill_pipeline::{Pipeline, PipelineConfig, PipelineDeps};
//!
//! let deps = PipelineDeps::new(store, provider, notifier);
//! let pipeline = Arc::new(Pipeline::start(deps, PipelineConfig::from_env()));
//!
//! let completion = pipeline.submit_summary(item).await?;
//! completion.wait(std::time::Duration::from_secs(120)).await?;
//!
//! pipeline.shutdown().await;
//! ```

pub mod config;
pub mod dispatcher;
pub mod flusher;
pub mod guard;
pub mod ingest;
pub mod pipeline;
pub mod request;
pub mod stage;
mod worker;

// Re-export core types
pub use quill_core::*;

pub use config::PipelineConfig;
pub use dispatcher::Dispatcher;
pub use flusher::Flusher;
pub use guard::{InFlightClaim, InFlightGuard};
pub use ingest::{IngestMode, KnowledgeIngest};
pub use pipeline::{Pipeline, PipelineDeps};
pub use request::{Completion, ProcessingRequest, StageKind};
pub use stage::StageRunner;
