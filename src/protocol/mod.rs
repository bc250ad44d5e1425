//! RESP Protocol Implementation
//!
//! ## Modules
//!
//! - `types`: the `RespValue` frame model and its serialization
//! - `parser`: incremental parser for client requests
//! - `codec`: frame reader/writer over an async byte stream
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert!(value.as_array().is_some());
//!
//! let reply = RespValue::bulk_string(Bytes::from("embr"));
//! assert_eq!(reply.serialize(), b"$4\r\nembr\r\n");
//! ```

pub mod codec;
pub mod parser;
pub mod types;

pub use codec::{CodecError, RespCodec};
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
