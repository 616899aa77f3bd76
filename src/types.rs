//! Value and argument types for hematite.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// One Redis command with its arguments, as raw byte strings.
pub type Query = Vec<Bytes>;

/// Represents a reply from a Redis-compatible server.
///
/// This maps to the RESP2 protocol types. Protocol-level error replies
/// (`-ERR ...`) are carried as [`Value::Error`] — they are ordinary reply
/// values, not transport failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A simple string reply (`+OK`).
    Status(String),

    /// An error reply (`-ERR unknown command`).
    Error(String),

    /// An integer reply (`:42`).
    Integer(i64),

    /// A bulk string reply (`$5\r\nhello`).
    String(Bytes),

    /// A null bulk string or null array (`$-1` / `*-1`).
    Nil,

    /// An array of replies (`*2...`).
    Array(Vec<Value>),
}

impl Value {
    /// Returns the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(b) => std::str::from_utf8(b).ok(),
            Value::Status(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the value as bytes, if it is a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Returns `true` if the value is nil/null.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns `true` if the value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Converts the value into a `String`.
    ///
    /// Returns an error if the value is not a string type; an error reply
    /// converts to [`Error::Server`].
    pub fn into_string(self) -> Result<String> {
        match self {
            Value::String(b) => String::from_utf8(b.to_vec())
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string value: {}", e))),
            Value::Status(s) => Ok(s),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "string",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Converts the value into an `i64`.
    pub fn into_integer(self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(n),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "integer",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Converts the value into a `Vec<Value>`.
    ///
    /// A nil reply converts to an empty vector.
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(arr) => Ok(arr),
            Value::Nil => Ok(vec![]),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "array",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Returns a human-readable type name for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Status(_) => "status",
            Value::Error(_) => "error",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Nil => "nil",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Status(s) => write!(f, "{}", s),
            Value::Error(e) => write!(f, "(error) {}", e),
            Value::Integer(n) => write!(f, "(integer) {}", n),
            Value::String(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "<binary {} bytes>", b.len()),
            },
            Value::Nil => write!(f, "(nil)"),
            Value::Array(arr) => {
                for (i, val) in arr.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, val)?;
                }
                Ok(())
            }
        }
    }
}

/// Priority classes for query scheduling, supplied by the embedding
/// application as a closed enumeration.
///
/// The writer always drains the highest-priority (lowest index) non-empty,
/// non-suppressed queue first. Implementations must return an index below
/// [`QueryPriority::COUNT`], with index 0 being the highest priority.
///
/// # Examples
///
/// ```
/// use hematite::QueryPriority;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// enum Priority {
///     Heartbeat,
///     Config,
///     State,
/// }
///
/// impl QueryPriority for Priority {
///     const COUNT: usize = 3;
///
///     fn index(self) -> usize {
///         self as usize
///     }
/// }
/// ```
pub trait QueryPriority: Copy + Eq + Send + 'static {
    /// Number of priority classes.
    const COUNT: usize;

    /// Position of this class in the total order; 0 is the highest.
    fn index(self) -> usize;
}

/// Trait for types that can be converted into command arguments.
pub trait ToArg {
    /// Encode this value as a RESP bulk string argument.
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for &String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for i64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for u64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for i32 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for u32 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for usize {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// Build a [`Query`] from anything argument-like.
///
/// # Examples
///
/// ```
/// use hematite::types::query;
///
/// let q = query(&["SET", "key", "value"]);
/// assert_eq!(q.len(), 3);
/// ```
pub fn query(args: &[impl ToArg]) -> Query {
    args.iter().map(|a| a.to_arg()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_is_a_value() {
        let val = Value::Error("ERR unknown command".into());
        assert!(val.is_error());
        match val.into_string() {
            Err(Error::Server(msg)) => assert_eq!(msg, "ERR unknown command"),
            other => panic!("expected Server error, got {:?}", other),
        }
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::Integer(7).into_integer().unwrap(), 7);
        assert_eq!(
            Value::String(Bytes::from("hi")).into_string().unwrap(),
            "hi"
        );
        assert_eq!(Value::Nil.into_array().unwrap(), vec![]);
        assert!(Value::Status("OK".into()).into_integer().is_err());
    }

    #[test]
    fn test_query_builder() {
        let q = query(&["GET", "key"]);
        assert_eq!(q, vec![Bytes::from("GET"), Bytes::from("key")]);
    }
}
