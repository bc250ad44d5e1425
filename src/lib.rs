//! # EmberKV
//!
//! A single-node, in-memory key-value server that speaks a Redis-style
//! protocol over TCP. It supports `PING`, `ECHO`, `GET`, and `SET` with
//! `EX`/`PX` expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                     ┌──────▼──────┐           ▼                         │
//! │                     │  RespCodec  │   ┌───────────────────────────┐     │
//! │                     │  (parser +  │   │      StorageEngine        │     │
//! │                     │  serialize) │   │  Entry { value, expiry }  │     │
//! │                     └─────────────┘   └───────────────────────────┘     │
//! │                                                   ▲                     │
//! │                                       ┌───────────┴───────────┐         │
//! │                                       │   Reaper (100ms tick) │         │
//! │                                       └───────────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::CommandHandler;
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::storage::{start_reaper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _reaper = start_reaper(Arc::clone(&storage));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Expiry
//!
//! Keys with a TTL disappear in two ways:
//! 1. **Lazy**: a read that finds an expired entry treats it as missing and
//!    removes it, so clients never see a stale value.
//! 2. **Active**: the [`storage::Reaper`] sweeps keys that carry an expiry
//!    every 100ms, reclaiming memory for keys nobody reads again.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::{CommandHandler, CommandTable};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespCodec, RespParser, RespValue};
pub use storage::{start_reaper, Reaper, ReaperConfig, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
