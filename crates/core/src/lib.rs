//! Core types and shared functionality for wikifetch.
//!
//! This crate provides:
//! - State database with SQLite backend
//! - Resumable key-value store with concurrent cursor scans
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod store;

pub use cache::{MediaEntry, StateDb};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use store::{ResumableStore, ScanPage};
