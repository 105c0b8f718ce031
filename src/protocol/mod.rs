//! RESP Protocol Implementation
//!
//! This module provides the Redis Serialization Protocol (RESP) codec.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` enum, reply serialization and request encoding
//! - `parser`: Incremental parser for incoming RESP data
//! - `pool`: Reply buffers shared between connections
//!
//! ## Example
//!
//! ```
//! use redkite::protocol::{encode_command, RespParser, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let mut parser = RespParser::new();
//! let mut commands = Vec::new();
//! parser
//!     .feed(&encode_command(&["GET", "name"]), |cmd| commands.push(cmd))
//!     .unwrap();
//! assert_eq!(commands.len(), 1);
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("kite"));
//! assert_eq!(response.serialize(), b"$4\r\nkite\r\n");
//! ```

pub mod parser;
pub mod pool;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use pool::BufferPool;
pub use types::{encode_command, RespValue};
