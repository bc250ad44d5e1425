//! Turning a decoded frame into a command invocation.

use crate::commands::error::RequestError;
use crate::protocol::RespValue;

/// A validated client request: an upper-cased command name plus its
/// arguments, every one of them a bulk string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: String,
    pub args: Vec<RespValue>,
}

impl Request {
    /// Validates the shape of a top-level frame.
    ///
    /// The frame must be a non-empty array whose elements are all bulk
    /// strings. The first element is the command name and is upper-cased;
    /// the rest are passed to the handler untouched.
    pub fn from_frame(frame: RespValue) -> Result<Self, RequestError> {
        let parts = match frame {
            RespValue::Array(parts) => parts,
            other => return Err(RequestError::NotAnArray(kind_name(&other))),
        };

        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(RespValue::BulkString(name)) => String::from_utf8_lossy(&name).to_uppercase(),
            Some(_) => return Err(RequestError::NotBulkString(0)),
            None => return Err(RequestError::Empty),
        };

        let args: Vec<RespValue> = parts.collect();
        if let Some(pos) = args
            .iter()
            .position(|arg| !matches!(arg, RespValue::BulkString(_)))
        {
            return Err(RequestError::NotBulkString(pos + 1));
        }

        Ok(Self { name, args })
    }
}

fn kind_name(value: &RespValue) -> &'static str {
    match value {
        RespValue::SimpleString(_) => "simple string",
        RespValue::Error(_) => "error",
        RespValue::Integer(_) => "integer",
        RespValue::BulkString(_) => "bulk string",
        RespValue::Null => "null",
        RespValue::Array(_) => "array",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_name_is_upper_cased() {
        let req = Request::from_frame(RespValue::Array(vec![bulk("set"), bulk("k"), bulk("v")]))
            .unwrap();
        assert_eq!(req.name, "SET");
        assert_eq!(req.args, vec![bulk("k"), bulk("v")]);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert_eq!(
            Request::from_frame(bulk("PING")),
            Err(RequestError::NotAnArray("bulk string"))
        );
        assert_eq!(
            Request::from_frame(RespValue::Null),
            Err(RequestError::NotAnArray("null"))
        );
        assert_eq!(
            Request::from_frame(RespValue::Array(vec![])),
            Err(RequestError::Empty)
        );
        assert_eq!(
            Request::from_frame(RespValue::Array(vec![RespValue::Null])),
            Err(RequestError::NotBulkString(0))
        );
        assert_eq!(
            Request::from_frame(RespValue::Array(vec![
                bulk("GET"),
                RespValue::Array(vec![bulk("k")]),
            ])),
            Err(RequestError::NotBulkString(1))
        );
    }
}
