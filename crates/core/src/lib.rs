#![deny(unused)]
//! Error types, configuration, audit events, and logging shared by the
//! driver, runtime, and API crates of the sandbox runtime.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod traits;

pub use error::{Error, Result};
pub use events::*;
pub use traits::*;
