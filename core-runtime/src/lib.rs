//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other `core-*` crate depends on this one for its logging
//! conventions, its dependency-injection config and the broadcast channel
//! that carries live sync progress to subscribers.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
