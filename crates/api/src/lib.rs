#![deny(unused)]
//! HTTP/WebSocket surface for the sandbox runtime.
//!
//! Translates the public client-facing contract and the agent's internal
//! observation-ingress contract onto `sandboxd-runtime`'s types. Holds no
//! runtime state of its own beyond what `AppState` borrows from the Manager,
//! Dispatcher, and Registry.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, SandboxdServer, ServerConfig};
