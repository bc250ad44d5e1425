//! Command Layer
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RespCodec      │  (protocol module)
//! └────────┬────────┘
//!          │ RespValue
//!          ▼
//! ┌─────────────────┐
//! │ Request         │  validate shape, upper-case the name
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  table lookup → handler(args, store)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```

pub mod error;
pub mod handler;
pub mod request;

pub use error::{CommandError, RequestError};
pub use handler::{CommandFn, CommandHandler, CommandTable};
pub use request::Request;
