//! Commands
//!
//! [`CommandHandler`] turns the tokens of one request into a reply. It reads
//! and writes through the shared [`Db`](crate::storage::Db) and reaches the
//! snapshot manager for `SAVE`, `LASTSAVE` and `CONFIG GET save`.
//!
//! | Group | Commands |
//! |---|---|
//! | connection | `PING`, `ECHO`, `COMMAND` |
//! | strings | `GET`, `SET [EX\|PX]`, `DEL`, `EXISTS` |
//! | expiry | `EXPIRE`, `PEXPIRE`, `TTL`, `PTTL`, `PERSIST` |
//! | server | `DBSIZE`, `CONFIG GET`, `SAVE`, `LASTSAVE` |

pub mod handler;
pub mod pattern;

pub use handler::{CommandError, CommandHandler};
pub use pattern::GlobPattern;
