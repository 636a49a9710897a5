//! Generation job orchestration.
//!
//! Ties the pure domain model in `vidgen-core` to a backend: template
//! loading, image upload, submission with audit logging, completion
//! tracking and artifact retrieval. [`JobClient`] runs the whole flow;
//! the pieces are also usable on their own.

pub mod audit;
pub mod backend;
pub mod client;
pub mod clock;
pub mod error;
pub mod retriever;
pub mod submitter;
pub mod templates;
pub mod tracker;
pub mod uploader;

pub use client::{JobClient, Outcome, PreparedJob};
pub use error::{ErrorKind, GenerationError};
