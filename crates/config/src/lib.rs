//! Configuration for the legal RAG engine
//!
//! Everything is read from the environment once at startup; reload is out
//! of scope. `constants` centralizes built-in defaults so stage configs
//! and settings never drift apart.

pub mod constants;
pub mod settings;

pub use settings::{FeatureFlags, RagSettings, RouterOverride};
