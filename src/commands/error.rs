//! Command-level errors.
//!
//! These never close a connection. The dispatcher renders them with
//! `to_string()` and sends the text back as an error reply, so every
//! `#[error]` string below is exactly what a client sees after the `-`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Argument count outside the command's arity. Holds the lower-case
    /// command name.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// The value following `EX` or `PX` was missing, not an integer, or too
    /// large for the clock. The reply text is the same for both options.
    #[error("wrong value for argument 'EX'")]
    InvalidExpiry,

    /// An argument that should have been a bulk string was not. Frames read
    /// off a connection are already checked by `Request::from_frame`, so
    /// this only guards callers that build a `Request` by hand.
    #[error("argument {0} is not a bulk string")]
    NotBulkString(usize),

    /// The command name is not in the dispatch table. Holds the upper-cased
    /// name as received.
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

/// Reasons a top-level frame cannot be treated as a command.
///
/// Unlike [`CommandError`] these are protocol violations: the connection is
/// closed instead of answered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("expected an array of bulk strings, got {0}")]
    NotAnArray(&'static str),

    #[error("empty command")]
    Empty,

    #[error("request element {0} is not a bulk string")]
    NotBulkString(usize),
}
