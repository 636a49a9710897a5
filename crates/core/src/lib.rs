//! Backend-independent domain model for the generation job client.
//!
//! Everything in this crate is pure: request resolution and defaulting,
//! the opaque graph-template wrapper, placeholder binding, job status
//! and the audit record format. Network and filesystem access live in
//! `vidgen-comfyui` and `vidgen-pipeline`.

pub mod audit;
pub mod binder;
pub mod error;
pub mod graph;
pub mod job;
pub mod mode;
pub mod request;
pub mod types;

pub use error::CoreError;
