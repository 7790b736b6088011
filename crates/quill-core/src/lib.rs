//! # quill-core
//!
//! Core types, traits, and abstractions for the quill knowledge pipeline.
//!
//! This crate provides the data model, the collaborator traits the pipeline
//! is written against (stores, AI provider, notifier, masker), and the
//! in-process event bus.

pub mod content;
pub mod defaults;
pub mod error;
pub mod events;
pub mod mask;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use content::to_plain_text;
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, ServerEvent, StageChanged};
pub use mask::{HiddenMarkerMasker, NoopMasker};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{is_v7, new_v7};
