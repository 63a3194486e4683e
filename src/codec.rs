use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame;
use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// Default limit for a single buffered request, matching the Redis `client-query-buffer-limit`
/// ceiling.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 512 * 1024 * 1024;

/// Decodes requests from, and encodes replies to, a RESP byte stream.
///
/// Requests are either multibulk arrays (`*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`) or inline commands
/// (`ECHO hi\r\n`). Command names are lower-cased here, the same way handler names are folded on
/// registration.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_request_size: usize,
}

enum Decoded {
    Request(Request),
    Skip,
    Incomplete,
}

impl RespCodec {
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }

    fn decode_multibulk(&self, src: &mut BytesMut) -> Result<Decoded, Error> {
        let mut cursor = Cursor::new(&src[..]);
        let parts = match frame::parse_multibulk(&mut cursor) {
            Ok(parts) => parts,
            Err(frame::Error::Incomplete) => return Ok(Decoded::Incomplete),
            Err(err) => return Err(err.into()),
        };

        let position = cursor.position() as usize;
        src.advance(position);

        match parts {
            Some(parts) if !parts.is_empty() => Ok(Decoded::Request(into_request(parts))),
            _ => Ok(Decoded::Skip),
        }
    }

    fn decode_inline(&self, src: &mut BytesMut) -> Result<Decoded, Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            return Ok(Decoded::Incomplete);
        };

        let line = src.split_to(newline + 1).freeze();
        let line = line.slice(..newline);
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);

        let parts: Vec<Bytes> = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|word| !word.is_empty())
            .map(Bytes::copy_from_slice)
            .collect();

        if parts.is_empty() {
            return Ok(Decoded::Skip);
        }

        Ok(Decoded::Request(into_request(parts)))
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_SIZE)
    }
}

impl Decoder for RespCodec {
    type Item = Request;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }

            let decoded = if src[0] == b'*' {
                self.decode_multibulk(src)?
            } else {
                self.decode_inline(src)?
            };

            match decoded {
                Decoded::Request(req) => return Ok(Some(req)),
                Decoded::Skip => continue,
                Decoded::Incomplete => {
                    // Check if the request size exceeds the limit to prevent DoS attacks.
                    if src.len() > self.max_request_size {
                        return Err(protocol_error("request exceeds size limit".to_string()));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Responder> for RespCodec {
    type Error = Error;

    fn encode(&mut self, res: Responder, dst: &mut BytesMut) -> Result<(), Self::Error> {
        res.write_to(dst);
        Ok(())
    }
}

fn into_request(mut parts: Vec<Bytes>) -> Request {
    let args = parts.split_off(1);
    let name = String::from_utf8_lossy(&parts[0]);
    Request::new(name, args)
}

fn protocol_error(msg: String) -> Error {
    frame::Error::Protocol(msg).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut RespCodec, data: &[u8]) -> Vec<Request> {
        let mut buf = BytesMut::from(data);
        let mut requests = Vec::new();
        while let Some(req) = codec.decode(&mut buf).unwrap() {
            requests.push(req);
        }
        requests
    }

    #[test]
    fn decode_multibulk_request() {
        let mut codec = RespCodec::default();
        let reqs = decode_all(&mut codec, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");

        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].name(), "set");
        assert_eq!(reqs[0].args(), &[Bytes::from("key"), Bytes::from("value")]);
    }

    #[test]
    fn decode_inline_request() {
        let mut codec = RespCodec::default();
        let reqs = decode_all(&mut codec, b"PING\r\nEcHo  hello\nquit\r\n");

        let names: Vec<&str> = reqs.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["ping", "echo", "quit"]);
        assert_eq!(reqs[1].args(), &[Bytes::from("hello")]);
    }

    #[test]
    fn decode_pipelined_requests_in_order() {
        let mut codec = RespCodec::default();
        let data = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$1\r\na\r\n*1\r\n$4\r\nping\r\n";
        let reqs = decode_all(&mut codec, data);

        let names: Vec<&str> = reqs.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["ping", "echo", "ping"]);
    }

    #[test]
    fn decode_skips_empty_lines_and_arrays() {
        let mut codec = RespCodec::default();
        let reqs = decode_all(&mut codec, b"\r\n*0\r\n  \r\nPING\r\n");

        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].name(), "ping");
    }

    #[test]
    fn decode_incomplete_request_waits_for_more_data() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$4\r\nECHO\r\n$5\r\nhel"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"lo\r\n");
        let req = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(req.name(), "echo");
        assert_eq!(req.arg(0), Some(&Bytes::from("hello")));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_non_string_arguments() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n:1\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_rejects_nested_arrays() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(20_000)[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_waits_on_huge_announced_length() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*1048576\r\n$4\r\nPING\r\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 20);
    }

    #[test]
    fn decode_rejects_malformed_header() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*x\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_enforces_size_limit() {
        let mut codec = RespCodec::new(8);
        let mut buf = BytesMut::from(&b"*1\r\n$100\r\nabcdefgh"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_responder() {
        let mut codec = RespCodec::default();
        let mut res = Responder::new();
        res.write_simple("OK");

        let mut buf = BytesMut::new();
        codec.encode(res, &mut buf).unwrap();
        assert_eq!(&buf[..], b"+OK\r\n");
    }
}
