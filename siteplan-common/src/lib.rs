//! # Siteplan Common Library
//!
//! Shared code for the siteplan services including:
//! - Error and result types
//! - Configuration file discovery and TOML loading
//! - Event types (ExpansionEvent enum) and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
