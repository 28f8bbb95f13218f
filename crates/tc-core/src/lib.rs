//! tc-core: shared types, IDs, errors, presets, configuration, and events.
//!
//! This crate is the foundational dependency for all other tc-* crates,
//! providing type-safe identifiers, a unified error type, job and rendition
//! status enums, the compiled-in quality preset catalog, application
//! configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod presets;
pub mod status;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use presets::{QualityPreset, SpeedProfile};
pub use status::{JobStatus, RenditionStatus};
