//! Command execution.
//!
//! [`CommandHandler::execute`] takes the tokens of one request, matches the
//! upper-cased name and runs the `cmd_*` method for it. Each method checks
//! its own arity and returns a `CommandResult`; errors become `-ERR` replies
//! in one place, so nothing here writes to a socket.
//!
//! | Group   | Commands                                        |
//! |---------|-------------------------------------------------|
//! | strings | `GET`, `SET [EX n \| PX n]`, `DEL`, `EXISTS`    |
//! | keys    | `EXPIRE`, `PEXPIRE`, `TTL`, `PTTL`, `PERSIST`   |
//! | server  | `PING`, `ECHO`, `DBSIZE`, `CONFIG GET`, `SAVE`, `LASTSAVE`, `COMMAND` |

use crate::commands::pattern::GlobPattern;
use crate::persistence::{format_save_rules, SnapshotError};
use crate::protocol::RespValue;
use crate::server::ServerContext;
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::trace;

/// Errors replied to the client as `-ERR ...`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR unknown subcommand '{0}'. Try CONFIG HELP.")]
    UnknownSubcommand(String),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid key")]
    InvalidKey,

    #[error("ERR {0}")]
    Save(#[from] SnapshotError),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// Configuration parameters readable with `CONFIG GET`.
const CONFIG_PARAMETERS: [&str; 5] = ["save", "dir", "dbfilename", "port", "bind"];

/// Runs requests against the shared [`ServerContext`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    ctx: ServerContext,
}

impl CommandHandler {
    /// Creates a new command handler working on `ctx`.
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    /// Runs one request (`name arg...`) and returns the reply. Never fails;
    /// errors are turned into error replies.
    pub fn execute(&self, command: &[Bytes]) -> RespValue {
        let Some((name, args)) = command.split_first() else {
            return RespValue::error("ERR empty command");
        };

        let name = String::from_utf8_lossy(name);
        let upper = name.to_ascii_uppercase();
        trace!(command = %upper, args = args.len(), "Executing command");

        self.dispatch(&upper, &name, args)
            .unwrap_or_else(RespValue::from)
    }

    fn dispatch(&self, cmd: &str, name: &str, args: &[Bytes]) -> CommandResult {
        match cmd {
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),

            "EXPIRE" => self.cmd_expire(args, "expire", 1000),
            "PEXPIRE" => self.cmd_expire(args, "pexpire", 1),
            "TTL" => self.cmd_ttl(args, "ttl", false),
            "PTTL" => self.cmd_ttl(args, "pttl", true),
            "PERSIST" => self.cmd_persist(args),

            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "CONFIG" => self.cmd_config(args),
            "SAVE" => self.cmd_save(args),
            "LASTSAVE" => self.cmd_lastsave(args),
            "COMMAND" => Ok(RespValue::array(vec![])),

            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(arity("get"));
        };

        Ok(match self.ctx.db.get(parse_key(key)?) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let [key, value, options @ ..] = args else {
            return Err(arity("set"));
        };
        let key = parse_key(key)?;

        let mut ttl: Option<Duration> = None;
        let mut options = options.iter();
        while let Some(option) = options.next() {
            let unit = if option.eq_ignore_ascii_case(b"EX") {
                1000
            } else if option.eq_ignore_ascii_case(b"PX") {
                1
            } else {
                return Err(CommandError::Syntax);
            };

            let amount = options.next().ok_or(CommandError::Syntax)?;
            if ttl.is_some() {
                return Err(CommandError::Syntax);
            }

            let amount = parse_integer(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpireTime("set"));
            }
            let millis = expire_millis(amount, unit, "set")?;
            ttl = Some(Duration::from_millis(millis.unsigned_abs()));
        }

        self.ctx.db.set(key.to_string(), value.clone(), ttl);
        Ok(RespValue::ok())
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() {
            return Err(arity("del"));
        }

        let keys = parse_keys(args)?;
        Ok(RespValue::integer(self.ctx.db.delete_many(&keys) as i64))
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() {
            return Err(arity("exists"));
        }

        let keys = parse_keys(args)?;
        let count = keys.iter().filter(|key| self.ctx.db.exists(key)).count();
        Ok(RespValue::integer(count as i64))
    }

    /// EXPIRE key seconds / PEXPIRE key milliseconds
    fn cmd_expire(&self, args: &[Bytes], cmd: &'static str, unit_ms: i64) -> CommandResult {
        let [key, amount] = args else {
            return Err(arity(cmd));
        };
        let key = parse_key(key)?;
        let millis = expire_millis(parse_integer(amount)?, unit_ms, cmd)?;

        Ok(RespValue::integer(self.ctx.db.pexpire(key, millis) as i64))
    }

    /// TTL key / PTTL key
    fn cmd_ttl(&self, args: &[Bytes], cmd: &str, millis: bool) -> CommandResult {
        let [key] = args else {
            return Err(arity(cmd));
        };
        let key = parse_key(key)?;

        let ttl = if millis {
            self.ctx.db.pttl(key)
        } else {
            self.ctx.db.ttl(key)
        };
        Ok(RespValue::integer(ttl))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(arity("persist"));
        };

        Ok(RespValue::integer(self.ctx.db.persist(parse_key(key)?) as i64))
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(arity("ping")),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        let [message] = args else {
            return Err(arity("echo"));
        };
        Ok(RespValue::bulk_string(message.clone()))
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(arity("dbsize"));
        }
        Ok(RespValue::integer(self.ctx.db.len() as i64))
    }

    /// CONFIG GET pattern
    fn cmd_config(&self, args: &[Bytes]) -> CommandResult {
        let Some((subcommand, rest)) = args.split_first() else {
            return Err(arity("config"));
        };

        if !subcommand.eq_ignore_ascii_case(b"GET") {
            return Err(CommandError::UnknownSubcommand(
                String::from_utf8_lossy(subcommand).into_owned(),
            ));
        }
        let [pattern] = rest else {
            return Err(arity("config|get"));
        };

        let pattern = GlobPattern::nocase(&String::from_utf8_lossy(pattern));
        let pairs = CONFIG_PARAMETERS
            .iter()
            .filter(|name| pattern.matches(name))
            .flat_map(|&name| {
                [
                    RespValue::bulk_string(Bytes::from_static(name.as_bytes())),
                    RespValue::bulk_string(Bytes::from(self.config_value(name))),
                ]
            })
            .collect();

        Ok(RespValue::array(pairs))
    }

    fn config_value(&self, name: &str) -> String {
        let config = &self.ctx.config;
        match name {
            "save" => format_save_rules(self.ctx.snapshots.rules()),
            "dir" => config.dir.display().to_string(),
            "dbfilename" => config.dbfilename.clone(),
            "port" => config.port.to_string(),
            "bind" => config.host.clone(),
            _ => String::new(),
        }
    }

    /// SAVE
    fn cmd_save(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(arity("save"));
        }
        self.ctx.snapshots.save_now()?;
        Ok(RespValue::ok())
    }

    /// LASTSAVE
    fn cmd_lastsave(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(arity("lastsave"));
        }
        let last_save = i64::try_from(self.ctx.snapshots.last_save_unix()).unwrap_or(i64::MAX);
        Ok(RespValue::integer(last_save))
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arity(cmd: &str) -> CommandError {
    CommandError::WrongArity(cmd.to_string())
}

fn parse_key(arg: &Bytes) -> Result<&str, CommandError> {
    std::str::from_utf8(arg).map_err(|_| CommandError::InvalidKey)
}

fn parse_keys(args: &[Bytes]) -> Result<Vec<&str>, CommandError> {
    args.iter().map(parse_key).collect()
}

/// Converts an expire argument to milliseconds. Rejects amounts whose
/// absolute deadline in unix milliseconds would overflow an `i64`.
fn expire_millis(amount: i64, unit_ms: i64, cmd: &'static str) -> Result<i64, CommandError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        .unwrap_or(0);
    amount
        .checked_mul(unit_ms)
        .filter(|millis| millis.checked_add(now).is_some())
        .ok_or(CommandError::InvalidExpireTime(cmd))
}

fn parse_integer(arg: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}
