//! Incremental request decoding.
//!
//! # Responsibilities
//! - Turn an accumulating byte buffer into complete request frames
//! - Report `Incomplete` without consuming anything when bytes are missing
//! - Report the exact byte count of each frame so pipelined requests decode in order
//! - Enforce header and body size limits before buffering unbounded input
//!
//! # Design Decisions
//! - Framing is `Content-Length` only; chunked encoding is not supported
//! - The consumed count is measured from buffer offsets, never re-derived from parsed headers
//! - Header keys are trimmed and lower-cased; a repeated key keeps its last value

use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;

use crate::config::LimitsConfig;

const CRLF: &[u8] = b"\r\n";
const READ_RESERVE: usize = 4 * 1024;

/// A single decoded request. Lives for one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Request target as sent: path plus optional `?query`.
    pub target: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl ParsedRequest {
    /// Target without the query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Query string after `?`, if one was sent (possibly empty).
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Look up a header by lower-case name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the client asked to close the connection after this request.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}

/// Why a buffer can never become a valid request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("malformed header line")]
    MalformedHeader,
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("header section exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("declared body of {declared} bytes exceeds {limit} bytes")]
    BodyTooLarge { declared: usize, limit: usize },
}

impl FrameError {
    /// Status code answered before closing the connection.
    pub fn status(&self) -> u16 {
        match self {
            FrameError::MalformedRequestLine
            | FrameError::MalformedHeader
            | FrameError::InvalidContentLength => 400,
            FrameError::HeadersTooLarge { .. } => 431,
            FrameError::BodyTooLarge { .. } => 413,
        }
    }

    /// JSON error body answered before closing the connection.
    pub fn body(&self) -> &'static str {
        match self {
            FrameError::MalformedRequestLine | FrameError::MalformedHeader => {
                r#"{"error":"bad request"}"#
            }
            FrameError::InvalidContentLength => r#"{"error":"bad content-length"}"#,
            FrameError::HeadersTooLarge { .. } => r#"{"error":"headers too large"}"#,
            FrameError::BodyTooLarge { .. } => r#"{"error":"body too large"}"#,
        }
    }
}

/// Result of one decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    /// A full request occupying the first `consumed` bytes of the buffer.
    Frame { request: ParsedRequest, consumed: usize },
}

/// Stateless request decoder carrying the configured size limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestDecoder {
    limits: LimitsConfig,
}

impl RequestDecoder {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Try to decode one request from the start of `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded, FrameError> {
        let max_head = self.limits.max_header_bytes;

        let Some(line_end) = find_crlf(buf, 0) else {
            return self.incomplete_head(buf.len());
        };
        let (method, target, version) = parse_request_line(&buf[..line_end])?;

        let mut headers = HashMap::new();
        let mut pos = line_end + CRLF.len();
        let head_end = loop {
            let Some(end) = find_crlf(buf, pos) else {
                return self.incomplete_head(buf.len());
            };
            if end + CRLF.len() > max_head {
                return Err(FrameError::HeadersTooLarge { limit: max_head });
            }
            if end == pos {
                break end + CRLF.len();
            }
            let (key, value) = parse_header(&buf[pos..end])?;
            headers.insert(key, value);
            pos = end + CRLF.len();
        };

        let content_length = match headers.get("content-length") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength)?,
            None => 0,
        };
        if content_length > self.limits.max_body_bytes {
            return Err(FrameError::BodyTooLarge {
                declared: content_length,
                limit: self.limits.max_body_bytes,
            });
        }

        let consumed = head_end + content_length;
        if buf.len() < consumed {
            return Ok(Decoded::Incomplete);
        }

        Ok(Decoded::Frame {
            request: ParsedRequest {
                method,
                target,
                version,
                headers,
                body: Bytes::copy_from_slice(&buf[head_end..consumed]),
            },
            consumed,
        })
    }

    fn incomplete_head(&self, buffered: usize) -> Result<Decoded, FrameError> {
        if buffered > self.limits.max_header_bytes {
            Err(FrameError::HeadersTooLarge {
                limit: self.limits.max_header_bytes,
            })
        } else {
            Ok(Decoded::Incomplete)
        }
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|offset| from + offset)
}

fn parse_request_line(line: &[u8]) -> Result<(String, String, String), FrameError> {
    let line = std::str::from_utf8(line).map_err(|_| FrameError::MalformedRequestLine)?;
    let mut tokens = line.split(' ').filter(|token| !token.is_empty());
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(version)) => {
            Ok((method.to_string(), target.to_string(), version.to_string()))
        }
        _ => Err(FrameError::MalformedRequestLine),
    }
}

fn parse_header(line: &[u8]) -> Result<(String, String), FrameError> {
    let line = std::str::from_utf8(line).map_err(|_| FrameError::MalformedHeader)?;
    let (key, value) = line.split_once(':').ok_or(FrameError::MalformedHeader)?;
    Ok((key.trim().to_ascii_lowercase(), value.trim().to_string()))
}

/// Per-connection byte accumulator.
///
/// Grows as reads land and shrinks by exactly the bytes of each decoded frame.
#[derive(Debug, Default)]
pub struct ConnectionBuffer {
    buf: BytesMut,
}

impl ConnectionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Buffer to read socket data into, with spare capacity reserved.
    pub fn as_read_buf(&mut self) -> &mut BytesMut {
        if self.buf.capacity() - self.buf.len() < READ_RESERVE / 4 {
            self.buf.reserve(READ_RESERVE);
        }
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next frame and discard its bytes. `Ok(None)` means wait for more input.
    pub fn next_frame(&mut self, decoder: &RequestDecoder) -> Result<Option<ParsedRequest>, FrameError> {
        match decoder.decode(&self.buf)? {
            Decoded::Incomplete => Ok(None),
            Decoded::Frame { request, consumed } => {
                self.buf.advance(consumed);
                Ok(Some(request))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &[u8] = b"POST /payments HTTP/1.1\r\nHost: gw\r\nContent-Type: application/json\r\nContent-Length: 42\r\n\r\n{\"correlationId\":\"abc-123\",\"amount\":19.90}";
    const GET: &[u8] = b"GET /payments-summary?from=&to= HTTP/1.1\r\nHost: gw\r\n\r\n";

    fn decoder() -> RequestDecoder {
        RequestDecoder::default()
    }

    #[test]
    fn decodes_complete_request() {
        match decoder().decode(POST).unwrap() {
            Decoded::Frame { request, consumed } => {
                assert_eq!(consumed, POST.len());
                assert_eq!(request.method, "POST");
                assert_eq!(request.path(), "/payments");
                assert_eq!(request.query(), None);
                assert_eq!(request.header("content-type"), Some("application/json"));
                assert_eq!(&request.body[..], &POST[POST.len() - 42..]);
            }
            Decoded::Incomplete => panic!("expected a frame"),
        }
    }

    #[test]
    fn every_split_point_decodes_once() {
        for split in 1..POST.len() {
            let mut buffer = ConnectionBuffer::default();
            buffer.extend(&POST[..split]);
            assert_eq!(buffer.next_frame(&decoder()).unwrap(), None, "split at {split}");
            assert_eq!(buffer.len(), split);

            buffer.extend(&POST[split..]);
            let request = buffer.next_frame(&decoder()).unwrap().unwrap();
            assert_eq!(request.body.len(), 42);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn pipelined_requests_decode_in_order() {
        let mut buffer = ConnectionBuffer::default();
        buffer.extend(POST);
        buffer.extend(GET);
        buffer.extend(b"GET /pay");

        let first = buffer.next_frame(&decoder()).unwrap().unwrap();
        let second = buffer.next_frame(&decoder()).unwrap().unwrap();
        assert_eq!(first.method, "POST");
        assert_eq!(second.method, "GET");
        assert_eq!(second.query(), Some("from=&to="));
        assert!(second.body.is_empty());

        assert_eq!(buffer.next_frame(&decoder()).unwrap(), None);
        assert_eq!(buffer.len(), b"GET /pay".len());
    }

    #[test]
    fn duplicate_headers_do_not_skew_framing() {
        let raw = b"POST /payments HTTP/1.1\r\nX-A: 1\r\nx-a:  22 \r\nContent-Length: 2\r\n\r\n{}GET / HTTP/1.1\r\n\r\n";
        match decoder().decode(raw).unwrap() {
            Decoded::Frame { request, consumed } => {
                assert_eq!(request.header("x-a"), Some("22"));
                assert_eq!(&raw[consumed..], b"GET / HTTP/1.1\r\n\r\n");
            }
            Decoded::Incomplete => panic!("expected a frame"),
        }
    }

    #[test]
    fn short_request_line_is_malformed() {
        let err = decoder().decode(b"GET /payments\r\n\r\n").unwrap_err();
        assert_eq!(err, FrameError::MalformedRequestLine);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn header_without_separator_is_malformed() {
        let err = decoder()
            .decode(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, FrameError::MalformedHeader);
    }

    #[test]
    fn bad_content_length_is_rejected() {
        for value in ["-1", "ten", "1.5"] {
            let raw = format!("POST /payments HTTP/1.1\r\nContent-Length: {value}\r\n\r\n");
            assert_eq!(
                decoder().decode(raw.as_bytes()).unwrap_err(),
                FrameError::InvalidContentLength
            );
        }
    }

    #[test]
    fn missing_body_bytes_are_incomplete() {
        let raw = b"POST /payments HTTP/1.1\r\nContent-Length: 10\r\n\r\n12345";
        assert_eq!(decoder().decode(raw).unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let decoder = RequestDecoder::new(LimitsConfig {
            max_header_bytes: 64,
            max_body_bytes: 1024,
        });
        let mut raw = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(100));
        let err = decoder.decode(&raw).unwrap_err();
        assert_eq!(err.status(), 431);

        raw.extend_from_slice(b"\r\n\r\n");
        assert_eq!(decoder.decode(&raw).unwrap_err().status(), 431);
    }

    #[test]
    fn oversized_body_is_rejected_before_it_arrives() {
        let decoder = RequestDecoder::new(LimitsConfig {
            max_header_bytes: 1024,
            max_body_bytes: 16,
        });
        let err = decoder
            .decode(b"POST /payments HTTP/1.1\r\nContent-Length: 17\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, FrameError::BodyTooLarge { declared: 17, limit: 16 });
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn connection_close_is_case_insensitive() {
        let raw = b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n";
        match decoder().decode(raw).unwrap() {
            Decoded::Frame { request, .. } => assert!(request.wants_close()),
            Decoded::Incomplete => panic!("expected a frame"),
        }
    }
}
