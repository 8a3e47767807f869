#![deny(unused)]
//! Container driver for the sandbox runtime.
//!
//! This crate is the only place that knows how to talk to a concrete
//! container backend. It exposes the `ContainerDriver` trait consumed by
//! `sandboxd-runtime`'s Sandbox Manager, a `DockerDriver` implementation
//! backed by `bollard`, and a `MockDriver` for tests that don't need a real
//! daemon.

pub mod docker;
pub mod driver;
pub mod mock;

pub use docker::DockerDriver;
pub use driver::{select_address, ContainerDriver, ContainerHandle, ContainerInfo, CreateSpec};
pub use mock::MockDriver;
