//! Storage Module
//!
//! The keyspace and the background task that keeps it free of expired keys.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │        64 shards, one RwLock each, Entry { value, ttl }     │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ cleanup_expired() every 100ms
//!              ┌─────────────┴─────────────┐
//!              │          Reaper           │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//! engine.set(Bytes::from("name"), Bytes::from("embr"), None);
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("embr")));
//!
//! engine.set_with_ttl(Bytes::from("session"), Bytes::from("token"), Duration::from_secs(3600));
//! assert_eq!(engine.len(), 2);
//! ```

pub mod engine;
pub mod reaper;

pub use engine::{Entry, StorageEngine, StorageStats};
pub use reaper::{start_reaper, Reaper, ReaperConfig, DEFAULT_REAPER_INTERVAL};
