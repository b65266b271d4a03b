//! SQLite-backed state database and content-addressed cache keys.
//!
//! This module provides the persistent database shared by the resumable
//! store and the optimized-media cache, using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Content-addressed keys using SHA-256 hashing
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Optimized image storage keyed by scheme-less URL and ETag

pub mod connection;
pub mod hash;
pub mod media;
pub mod migrations;

pub use crate::Error;

pub use connection::StateDb;
pub use media::MediaEntry;
