//! # Flora Common Library
//!
//! Shared code for Flora services:
//! - Common error type
//! - Configuration file discovery and root folder resolution
//! - Credential digests for API key authentication
//! - Timestamp helpers

pub mod auth;
pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
