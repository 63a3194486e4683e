// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Upper bound for a single bulk string, matching the Redis `proto-max-bulk-len` default.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Upper bound for the number of elements announced by an array header.
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// How deep arrays may nest before the frame is rejected.
const MAX_DEPTH: usize = 32;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; invalid frame data type: {0:?}")]
    InvalidDataType(char),
    #[error("protocol error; {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Parses a single frame from `src`, advancing the cursor past it. Returns
    /// `Error::Incomplete` when the buffer ends before the frame does, in which case the cursor
    /// position is meaningless and the caller must retry once more data is available.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::Protocol("too many nested arrays".to_string()));
        }

        // The first byte in an RESP-serialized payload always identifies its type.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?;
                Ok(Frame::Simple(utf8(line)?.to_string()))
            }
            DataType::SimpleError => {
                let line = get_line(src)?;
                Ok(Frame::Error(utf8(line)?.to_string()))
            }
            DataType::Integer => {
                let line = get_line(src)?;
                Ok(Frame::Integer(parse_integer(line)?))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src, MAX_BULK_LEN)? {
                None => Ok(Frame::Null),
                Some(len) => Ok(Frame::Bulk(get_exact(src, len)?)),
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match get_length(src, MAX_ARRAY_LEN)? {
                None => Ok(Frame::Null),
                Some(len) => {
                    // Every element takes at least three bytes, so the header alone can't force a
                    // large allocation.
                    let mut frames = Vec::with_capacity(len.min(src.remaining() / 3));
                    for _ in 0..len {
                        frames.push(Self::parse_nested(src, depth + 1)?);
                    }
                    Ok(Frame::Array(frames))
                }
            },
            DataType::Null => {
                get_line(src)?;
                Ok(Frame::Null)
            }
        }
    }

    /// Appends the RESP2 encoding of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                put_line(dst, s);
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                put_line(dst, s);
            }
            Frame::Integer(i) => {
                dst.put_u8(b':');
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.reserve(bytes.len() + 16);
                dst.put_u8(b'$');
                dst.put_slice(bytes.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            // RESP2 clients do not understand `_`, so nulls go out as null bulk strings.
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(arr) => {
                dst.put_u8(b'*');
                dst.put_slice(arr.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }

}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Parses a command: a flat array of bulk or simple strings. Returns `None` for a null array.
pub(crate) fn parse_multibulk(src: &mut Cursor<&[u8]>) -> Result<Option<Vec<Bytes>>, Error> {
    match get_byte(src)? {
        b'*' => {}
        byte => return Err(Error::InvalidDataType(byte as char)),
    }

    let Some(len) = get_length(src, MAX_ARRAY_LEN)? else {
        return Ok(None);
    };

    // The smallest element, `+\r\n`, is three bytes long.
    let mut parts = Vec::with_capacity(len.min(src.remaining() / 3));
    for _ in 0..len {
        let part = match get_byte(src)? {
            b'$' => match get_length(src, MAX_BULK_LEN)? {
                Some(len) => get_exact(src, len)?,
                None => return Err(Error::Protocol("unexpected null bulk string".to_string())),
            },
            b'+' => Bytes::copy_from_slice(get_line(src)?),
            byte => {
                return Err(Error::Protocol(format!(
                    "expected bulk string, got {:?}",
                    byte as char
                )))
            }
        };
        parts.push(part);
    }

    Ok(Some(parts))
}

/// Writes `s` as a single line. CR and LF would end the reply early, so they become spaces.
fn put_line(dst: &mut BytesMut, s: &str) {
    dst.reserve(s.len() + CRLF.len());
    for &byte in s.as_bytes() {
        match byte {
            b'\r' | b'\n' => dst.put_u8(b' '),
            byte => dst.put_u8(byte),
        }
    }
    dst.put_slice(CRLF);
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
pub(crate) fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

/// Reads exactly `len` bytes followed by a CRLF.
fn get_exact(src: &mut Cursor<&[u8]>, len: usize) -> Result<Bytes, Error> {
    if src.remaining() < len + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
    src.advance(len);

    if src.chunk()[..CRLF.len()] != CRLF[..] {
        return Err(Error::Protocol("expected CRLF after bulk data".to_string()));
    }
    src.advance(CRLF.len());

    Ok(data)
}

/// Reads a length header. `-1` encodes a null value, any other negative number is rejected.
fn get_length(src: &mut Cursor<&[u8]>, max: usize) -> Result<Option<usize>, Error> {
    let len = parse_integer(get_line(src)?)?;
    if len == -1 {
        return Ok(None);
    }

    match usize::try_from(len) {
        Ok(len) if len <= max => Ok(Some(len)),
        _ => Err(Error::Protocol(format!("invalid length {}", len))),
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, Error> {
    utf8(line)?
        .parse::<i64>()
        .map_err(|_| Error::Protocol("invalid integer".to_string()))
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    str::from_utf8(bytes).map_err(|_| Error::Protocol("invalid UTF-8 string".to_string()))
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
    Null,         // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            _ => Err(Error::InvalidDataType(byte as char)),
        }
    }
}
