//! # hematite — Pipelined async client for Redis-compatible servers
//!
//! A single-connection, priority-scheduled query engine. Many producers
//! submit commands concurrently; hematite pipelines them over one
//! connection, always sending the highest-priority queued work next, and
//! routes each reply back to its caller by position on the wire.
//!
//! ## Features
//!
//! - **Pipelined multiplexing** — N requests, N replies, matched without
//!   correlation ids via a response-action ledger
//! - **Priority scheduling** — caller-declared priority classes, with
//!   preemption between items and per-class suppression
//! - **Fire-and-forget and awaited calls** — discard replies or await
//!   them, singly or as contiguous batches
//! - **Transparent reconnection** — fixed-interval retry, AUTH/SELECT
//!   login through the normal pipeline, on-connected hook
//! - **TCP and UNIX transports** — selected by configuration
//!
//! ## Quick Start
//!
//! ```ignore
//! use hematite::{ConnectionConfig, QueryPriority, RedisConnection};
//! use hematite::types::query;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Priority {
//!     Config,
//!     State,
//! }
//!
//! impl QueryPriority for Priority {
//!     const COUNT: usize = 2;
//!
//!     fn index(self) -> usize {
//!         self as usize
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> hematite::Result<()> {
//!     let conn: RedisConnection<Priority> =
//!         RedisConnection::new(ConnectionConfig::from_addr("127.0.0.1", 6379));
//!     conn.start();
//!
//!     conn.fire(query(&["SET", "greeting", "hello"]), Priority::State);
//!     let val = conn.execute(query(&["GET", "greeting"]), Priority::State).await?;
//!     println!("greeting = {}", val);
//!
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod resp;
pub mod types;

mod queue;
mod transport;

// ── Re-exports for ergonomic top-level usage ────────────────────────────────

pub use connection::{ConnectionConfig, RedisConnection};
pub use error::{Error, Result};
pub use types::{Query, QueryPriority, ToArg, Value};
