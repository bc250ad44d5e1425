//! Command Dispatch
//!
//! A [`CommandTable`] maps an upper-cased command name to a plain function
//! that takes the argument list and the store and returns either a reply or
//! a [`CommandError`]. [`CommandHandler`] is what a connection holds: it
//! looks the name up, runs the handler, and turns errors into error replies.
//!
//! ## Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`

use crate::commands::error::CommandError;
use crate::commands::request::Request;
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Signature shared by every command implementation.
pub type CommandFn = fn(&[RespValue], &StorageEngine) -> Result<RespValue, CommandError>;

/// Name → handler lookup.
#[derive(Clone, Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, CommandFn>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl CommandTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with every built-in command registered.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register("PING", cmd_ping);
        table.register("ECHO", cmd_echo);
        table.register("SET", cmd_set);
        table.register("GET", cmd_get);
        table
    }

    /// Registers a handler under an upper-case name, replacing any previous one.
    pub fn register(&mut self, name: &'static str, handler: CommandFn) {
        debug_assert!(name.chars().all(|c| !c.is_lowercase()));
        self.commands.insert(name, handler);
    }

    pub fn lookup(&self, name: &str) -> Option<CommandFn> {
        self.commands.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Executes requests against a shared store.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    table: Arc<CommandTable>,
}

impl CommandHandler {
    /// Creates a handler with the built-in command table.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self::with_table(storage, Arc::new(CommandTable::with_builtins()))
    }

    pub fn with_table(storage: Arc<StorageEngine>, table: Arc<CommandTable>) -> Self {
        Self { storage, table }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Runs one request and returns the reply to send.
    ///
    /// Unknown commands are answered with `ERR unknown command '<NAME>'`
    /// without touching any handler.
    pub fn execute(&self, request: &Request) -> RespValue {
        let Some(handler) = self.table.lookup(&request.name) else {
            debug!(command = %request.name, "Unknown command");
            return RespValue::error(CommandError::UnknownCommand(request.name.clone()).to_string());
        };

        handler(&request.args, &self.storage).unwrap_or_else(|e| {
            debug!(command = %request.name, error = %e, "Command failed");
            RespValue::error(e.to_string())
        })
    }
}

/// Returns the payload of the bulk string at `index`.
fn bulk_arg(args: &[RespValue], index: usize) -> Result<&Bytes, CommandError> {
    args[index]
        .as_bytes()
        .ok_or(CommandError::NotBulkString(index))
}

// ============================================================================
// Server Commands
// ============================================================================

/// PING [message]
fn cmd_ping(args: &[RespValue], _storage: &StorageEngine) -> Result<RespValue, CommandError> {
    match args.len() {
        0 => Ok(RespValue::pong()),
        1 => {
            let msg = bulk_arg(args, 0)?;
            Ok(RespValue::simple_string(String::from_utf8_lossy(msg)))
        }
        _ => Err(CommandError::WrongArity("ping")),
    }
}

/// ECHO message
fn cmd_echo(args: &[RespValue], _storage: &StorageEngine) -> Result<RespValue, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("echo"));
    }

    let msg = bulk_arg(args, 0)?;
    Ok(RespValue::simple_string(String::from_utf8_lossy(msg)))
}

// ============================================================================
// String Commands
// ============================================================================

/// SET key value [EX seconds | PX milliseconds]
///
/// The expiry option is validated before the store is touched. A SET
/// without an expiry option leaves the key persistent, even if it had a TTL.
fn cmd_set(args: &[RespValue], storage: &StorageEngine) -> Result<RespValue, CommandError> {
    if args.len() < 2 {
        return Err(CommandError::WrongArity("set"));
    }

    let key = bulk_arg(args, 0)?.clone();
    let value = bulk_arg(args, 1)?.clone();
    let expires_at = parse_expiry(&args[2..], Instant::now())?;

    storage.set(key, value, expires_at);
    Ok(RespValue::ok())
}

/// GET key
fn cmd_get(args: &[RespValue], storage: &StorageEngine) -> Result<RespValue, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("get"));
    }

    let key = bulk_arg(args, 0)?;
    Ok(match storage.get(key) {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpireOption {
    Ex,
    Px,
}

impl ExpireOption {
    fn parse(token: &[u8]) -> Option<Self> {
        if token.eq_ignore_ascii_case(b"EX") {
            Some(ExpireOption::Ex)
        } else if token.eq_ignore_ascii_case(b"PX") {
            Some(ExpireOption::Px)
        } else {
            None
        }
    }

    fn ttl(self, amount: u64) -> Duration {
        match self {
            ExpireOption::Ex => Duration::from_secs(amount),
            ExpireOption::Px => Duration::from_millis(amount),
        }
    }
}

/// Finds the first `EX`/`PX` token among the SET options and turns its value
/// into an absolute expiry.
///
/// Tokens that are not an expiry option are skipped. A TTL of zero or less
/// expires the key immediately.
fn parse_expiry(options: &[RespValue], now: Instant) -> Result<Option<Instant>, CommandError> {
    let Some((pos, option)) = options
        .iter()
        .enumerate()
        .find_map(|(i, token)| Some((i, ExpireOption::parse(token.as_bytes()?)?)))
    else {
        return Ok(None);
    };

    let amount = options
        .get(pos + 1)
        .and_then(RespValue::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::InvalidExpiry)?;

    let ttl = option.ttl(u64::try_from(amount).unwrap_or(0));
    now.checked_add(ttl)
        .map(Some)
        .ok_or(CommandError::InvalidExpiry)
}
