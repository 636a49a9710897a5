//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper and lenient typed models for the
//! endpoints the generation job client uses: `/prompt`, `/history`,
//! `/queue`, `/upload/image` and `/view`.

pub mod api;
pub mod models;

pub use api::{ComfyUIApi, ComfyUIApiError};
