//! # Embody Common Library
//!
//! Shared code for the Embody services including:
//! - Event types (ScanEvent enum) and the EventBus
//! - Common error types
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
