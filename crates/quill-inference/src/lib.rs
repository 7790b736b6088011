//! # quill-inference
//!
//! AI provider backends for the quill knowledge pipeline.
//!
//! This crate provides:
//! - OpenAI-compatible implementation of chunking (forced function call) and
//!   document embeddings (feature `openai`, on by default)
//! - A deterministic mock backend with failure injection and per-input
//!   concurrency tracking (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use quill_inference::OpenAIBackend;
//! use quill_core::ChunkingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let result = backend.chunk("docker deployment notes").await.unwrap();
//!     println!("{}: {} chunks", result.title, result.chunks.len());
//! }
//! ```

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use quill_core::*;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCall, MockInferenceBackend, MockOp};
