//! Storage Module
//!
//! This module provides the core storage functionality for Redkite: a
//! two-region key-value store with TTL support, the shared handle used by the
//! rest of the server, and the background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Db (Arc, cloneable)                 │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │                 Mutex<Store>                   │  │
//! │  │   persistent map │ volatile map │ TtlManager   │  │
//! │  └────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//!            ▲                              ▲
//!            │                              │
//!   ┌────────┴────────┐        ┌────────────┴────────────┐
//!   │  ExpirySweeper  │        │ connections / snapshots │
//!   │  (Tokio task)   │        └─────────────────────────┘
//!   └─────────────────┘
//! ```
//!
//! ## Expiration
//!
//! - **Passive**: an expired key is removed when it is accessed
//! - **Active**: the sweeper sleeps until the earliest deadline
//! - **Sampling**: random volatile keys are checked on a fixed interval, with
//!   a bounded batch cleanup once enough expired keys have been seen
//!
//! ## Example
//!
//! ```
//! use redkite::storage::Db;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let db = Db::new();
//!
//! db.set("name".to_string(), Bytes::from("kite"), None);
//! assert_eq!(db.get("name"), Some(Bytes::from("kite")));
//!
//! db.set(
//!     "session".to_string(),
//!     Bytes::from("token123"),
//!     Some(Duration::from_secs(3600)),
//! );
//! assert!(db.ttl("session") > 0);
//! ```

pub mod db;
pub mod engine;
pub mod expiry;
pub mod ttl;

// Re-export commonly used types
pub use db::Db;
pub use engine::{StorageStats, Store};
pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use ttl::{TtlManager, MAX_TTL};
