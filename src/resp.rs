//! RESP2 protocol encoder and decoder.
//!
//! Commands go out as arrays of bulk strings; replies come back as one of
//! the five RESP2 kinds and decode into [`Value`]. Error replies (`-ERR …`)
//! decode to [`Value::Error`] rather than failing, since they are values at
//! the protocol level. The decoder consumes exactly one reply per call and
//! leaves the buffer untouched while a reply is still incomplete.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Query, Value};

const CRLF: &[u8] = b"\r\n";

/// Encode one command as a RESP2 array of bulk strings.
///
/// # Example wire format
/// ```text
/// *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command(query: &Query, buf: &mut BytesMut) {
    put_header(b'*', query.len(), buf);
    for arg in query {
        put_header(b'$', arg.len(), buf);
        buf.put_slice(arg);
        buf.put_slice(CRLF);
    }
}

fn put_header(kind: u8, len: usize, buf: &mut BytesMut) {
    buf.put_u8(kind);
    buf.put_slice(len.to_string().as_bytes());
    buf.put_slice(CRLF);
}

/// Attempt to decode one RESP2 reply from the buffer.
///
/// Returns `Ok(Some(value))` and advances the buffer past the reply if a
/// complete one was present, `Ok(None)` if more data is needed, or `Err`
/// if the data is malformed.
pub fn decode_value(buf: &mut BytesMut) -> Result<Option<Value>> {
    let mut parser = Parser::new(&buf[..]);
    match parser.value() {
        Ok(value) => {
            let consumed = parser.pos;
            buf.advance(consumed);
            Ok(Some(value))
        }
        Err(Progress::Incomplete) => Ok(None),
        Err(Progress::Malformed(why)) => Err(Error::Protocol(why)),
    }
}

/// Why a parse attempt stopped short of a value.
enum Progress {
    /// The buffer ends before the reply does; try again with more data.
    Incomplete,
    /// The bytes cannot be RESP2.
    Malformed(String),
}

fn malformed(why: impl Into<String>) -> Progress {
    Progress::Malformed(why.into())
}

/// Single-pass parser over a byte slice. `pos` only ever moves forward and
/// is read back by [`decode_value`] to know how much to consume.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn value(&mut self) -> std::result::Result<Value, Progress> {
        match self.byte()? {
            b'+' => Ok(Value::Status(self.text()?)),
            b'-' => Ok(Value::Error(self.text()?)),
            b':' => Ok(Value::Integer(self.integer()?)),
            b'$' => match self.integer()? {
                -1 => Ok(Value::Nil),
                len if len < -1 => Err(malformed("negative bulk string length")),
                len => {
                    let data = Bytes::copy_from_slice(self.take(len as usize)?);
                    self.crlf()?;
                    Ok(Value::String(data))
                }
            },
            b'*' => match self.integer()? {
                -1 => Ok(Value::Nil),
                len if len < -1 => Err(malformed("negative array length")),
                len => {
                    let mut items = Vec::with_capacity(len as usize);
                    for _ in 0..len {
                        items.push(self.value()?);
                    }
                    Ok(Value::Array(items))
                }
            },
            other => Err(malformed(format!("unexpected type byte: 0x{:02x}", other))),
        }
    }

    fn byte(&mut self) -> std::result::Result<u8, Progress> {
        let b = *self.input.get(self.pos).ok_or(Progress::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    /// The bytes up to the next CRLF, consuming the CRLF as well.
    fn line(&mut self) -> std::result::Result<&'a [u8], Progress> {
        let input: &'a [u8] = self.input;
        let rest = &input[self.pos..];
        match rest.windows(2).position(|pair| pair == CRLF) {
            Some(at) => {
                self.pos += at + 2;
                Ok(&rest[..at])
            }
            None => Err(Progress::Incomplete),
        }
    }

    fn text(&mut self) -> std::result::Result<String, Progress> {
        let line = self.line()?;
        String::from_utf8(line.to_vec()).map_err(|_| malformed("invalid UTF-8 in reply line"))
    }

    fn integer(&mut self) -> std::result::Result<i64, Progress> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(format!("invalid integer: {:?}", String::from_utf8_lossy(line))))
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], Progress> {
        let input: &'a [u8] = self.input;
        let end = self.pos + n;
        if end > input.len() {
            return Err(Progress::Incomplete);
        }
        let data = &input[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    fn crlf(&mut self) -> std::result::Result<(), Progress> {
        if self.take(2)? != CRLF {
            return Err(malformed("missing CRLF after bulk data"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(wire: &str) -> Value {
        let mut buf = BytesMut::from(wire);
        let value = decode_value(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decode left bytes behind");
        value
    }

    #[test]
    fn test_encode_command() {
        let query = vec![Bytes::from("SET"), Bytes::from("key"), Bytes::from("value")];
        let mut buf = BytesMut::new();
        encode_command(&query, &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[test]
    fn test_encode_empty_argument() {
        let query = vec![Bytes::from("SET"), Bytes::from("key"), Bytes::new()];
        let mut buf = BytesMut::new();
        encode_command(&query, &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n");
    }

    #[test]
    fn test_decode_each_reply_kind() {
        assert_eq!(decode_one("+OK\r\n"), Value::Status("OK".into()));
        assert_eq!(
            decode_one("-ERR unknown\r\n"),
            Value::Error("ERR unknown".into())
        );
        assert_eq!(decode_one(":42\r\n"), Value::Integer(42));
        assert_eq!(decode_one(":-7\r\n"), Value::Integer(-7));
        assert_eq!(
            decode_one("$5\r\nhello\r\n"),
            Value::String(Bytes::from("hello"))
        );
        assert_eq!(decode_one("$-1\r\n"), Value::Nil);
        assert_eq!(decode_one("*-1\r\n"), Value::Nil);
    }

    #[test]
    fn test_decode_array() {
        assert_eq!(
            decode_one("*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"),
            Value::Array(vec![
                Value::String(Bytes::from("foo")),
                Value::String(Bytes::from("bar")),
            ])
        );
    }

    #[test]
    fn test_decode_nested_array() {
        assert_eq!(
            decode_one("*2\r\n*1\r\n:1\r\n+done\r\n"),
            Value::Array(vec![
                Value::Array(vec![Value::Integer(1)]),
                Value::Status("done".into()),
            ])
        );
    }

    #[test]
    fn test_incomplete_input_leaves_buffer_untouched() {
        for wire in ["", "+OK", "$5\r\nhel", "*2\r\n$3\r\nfoo", ":12"] {
            let mut buf = BytesMut::from(wire);
            assert!(
                decode_value(&mut buf).unwrap().is_none(),
                "{:?} decoded as complete",
                wire
            );
            assert_eq!(&buf[..], wire.as_bytes());
        }
    }

    #[test]
    fn test_malformed_input() {
        for wire in ["?what\r\n", ":notanumber\r\n", "$-2\r\n", "$3\r\nfooXX"] {
            let mut buf = BytesMut::from(wire);
            assert!(decode_value(&mut buf).is_err(), "{:?} decoded", wire);
        }
    }

    #[test]
    fn test_decode_pipelined_replies() {
        let mut buf = BytesMut::from("+OK\r\n$1\r\nv\r\n:3\r\n");
        assert_eq!(
            decode_value(&mut buf).unwrap().unwrap(),
            Value::Status("OK".into())
        );
        assert_eq!(
            decode_value(&mut buf).unwrap().unwrap(),
            Value::String(Bytes::from("v"))
        );
        assert_eq!(decode_value(&mut buf).unwrap().unwrap(), Value::Integer(3));
        assert!(decode_value(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_command_round_trip() {
        let query = vec![Bytes::from("GET"), Bytes::from("key")];
        let mut buf = BytesMut::new();
        encode_command(&query, &mut buf);
        assert_eq!(
            decode_value(&mut buf).unwrap().unwrap(),
            Value::Array(vec![
                Value::String(Bytes::from("GET")),
                Value::String(Bytes::from("key")),
            ])
        );
    }
}
