//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint that speaks the OpenAI chat-completions and
//! embeddings APIs (OpenAI, Azure OpenAI, Ollama in compatibility mode, vLLM,
//! LocalAI). Chunking uses a forced function call so the result arrives as
//! structured JSON.
//!
//! # Example
//!
//! ```rust,no_run
//! use quill_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use quill_core::{ChunkingBackend, EmbeddingBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::new(OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(), // Ollama
//!         embed_model: "nomic-embed-text".to_string(),
//!         gen_model: "llama3".to_string(),
//!         embed_dimension: 768,
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let result = backend.chunk("docker deployment notes").await.unwrap();
//!     let embeddings = backend.embed_document(&result.title, &result.chunks).await.unwrap();
//!     assert_eq!(embeddings.vectors.len(), result.chunks.len());
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_BATCH_SIZE, DEFAULT_EMBED_MODEL,
    DEFAULT_GEN_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_quill_error, OpenAIErrorCode, Operation};
pub use types::*;
