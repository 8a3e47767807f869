//! Cross-cutting traits shared by the runtime and driver crates.

pub mod events;

pub use events::*;
