#![deny(unused)]
//! The Sandbox Registry, Sandbox Manager, Observation Hub, and Action
//! Dispatcher: the coupled triad that makes the sandbox runtime
//! non-trivial. This crate has no knowledge of HTTP; `sandboxd-api`
//! translates the public and agent-ingress contracts onto these types.

pub mod dispatcher;
pub mod hub;
pub mod manager;
pub mod models;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use hub::Hub;
pub use manager::SandboxManager;
pub use models::{ActionKind, ObservationFrame, Sandbox, SandboxState};
pub use registry::{Registry, SandboxExistence};
