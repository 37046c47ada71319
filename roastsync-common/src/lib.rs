//! # RoastSync Common Library
//!
//! Shared code for the roastsync server:
//! - Database bootstrap and row models
//! - Notification hub and SSE stream
//! - Configuration loading
//! - Clock abstraction and client timestamp parsing
//! - Identifier parsing

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
