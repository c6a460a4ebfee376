//! HTTP/1.1 framing.
//!
//! Wire format:
//!   request  = method SP target SP "HTTP/1.1" CRLF *(header CRLF) CRLF [body]
//!   response = "HTTP/1.x" SP code SP reason CRLF *(header CRLF) CRLF [body]
//!
//! Outgoing bodies are always length-delimited (chunked uploads are not
//! supported). Incoming bodies may be length-delimited, chunked, or delimited
//! by connection close.

use crate::error::{Error, Result};
use crate::wire::headers::{self, Headers};
use crate::wire::message::{Body, Method, Request, Response, StatusLine, HTTP_VERSION};
use bytes::{Buf, Bytes, BytesMut};

/// Upper bound on a response status line plus headers (64KB)
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on a single chunk-size or trailer line
const MAX_CHUNK_LINE: usize = 4 * 1024;

const CRLF: &[u8] = b"\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

// =============================================================================
// Request head
// =============================================================================

/// Serialize the request line and headers.
///
/// `Host` is always written first, derived from the request URI; the other
/// headers follow in insertion order. Fails when the body is not described by
/// an accurate Content-Length.
pub fn encode_head(request: &Request) -> Result<Bytes> {
    let headers = request.headers();

    if headers.is_chunked() {
        return Err(Error::protocol(
            "Chunked transfer encoding is not supported for outgoing requests",
        ));
    }

    let declared = headers.content_length()?;
    match (request.body(), declared) {
        (Body::Empty, None) | (Body::Empty, Some(0)) => {}
        (Body::Empty, Some(n)) => {
            return Err(Error::protocol(format!(
                "Content-Length is {} but the request has no body",
                n
            )));
        }
        (Body::Buffered(bytes), Some(n)) if n == bytes.len() as u64 => {}
        (Body::Buffered(bytes), Some(n)) => {
            return Err(Error::protocol(format!(
                "Content-Length is {} but the body is {} bytes",
                n,
                bytes.len()
            )));
        }
        (Body::Stream(_), Some(_)) => {}
        (_, None) => {
            return Err(Error::protocol("Content-Length header is missing"));
        }
    }

    let host = request.host_header()?;
    let mut head = String::with_capacity(128 + headers.len() * 32);
    head.push_str(&format!(
        "{} {} {}\r\n",
        request.method(),
        request.target(),
        HTTP_VERSION
    ));
    head.push_str(&format!("{}: {}\r\n", headers::HOST, host));
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case(headers::HOST) {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    if request.body().is_empty()
        && request.method().expects_body()
        && !headers.contains(headers::CONTENT_LENGTH)
    {
        head.push_str("Content-Length: 0\r\n");
    }
    head.push_str("\r\n");

    Ok(Bytes::from(head))
}

// =============================================================================
// Response head
// =============================================================================

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse `HTTP/1.x code reason`.
pub fn parse_status_line(line: &str) -> Result<StatusLine> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(Error::protocol(format!("Invalid status line: {:?}", line)));
    }

    let code_str = parts
        .next()
        .ok_or_else(|| Error::protocol(format!("Status line has no code: {:?}", line)))?;
    if code_str.len() != 3 {
        return Err(Error::protocol(format!("Invalid status code: {:?}", code_str)));
    }
    let code: u16 = code_str
        .parse()
        .map_err(|_| Error::protocol(format!("Invalid status code: {:?}", code_str)))?;
    if !(100..=599).contains(&code) {
        return Err(Error::protocol(format!("Status code out of range: {}", code)));
    }

    Ok(StatusLine {
        version: version.to_string(),
        code,
        reason: parts.next().unwrap_or_default().to_string(),
    })
}

/// Try to parse a response head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the response
/// (with an empty body) and the number of bytes the head occupied.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(Response, usize)>> {
    let end = match find(buf, HEAD_END) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => {
            return Err(Error::protocol(format!(
                "Response head exceeds {} bytes",
                MAX_HEAD_SIZE
            )));
        }
        None => return Ok(None),
    };
    if end > MAX_HEAD_SIZE {
        return Err(Error::protocol(format!(
            "Response head exceeds {} bytes",
            MAX_HEAD_SIZE
        )));
    }

    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::protocol("Response head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;

    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::protocol(format!("Malformed header line: {:?}", line)))?;
        if name.ends_with(char::is_whitespace) {
            return Err(Error::protocol(format!("Malformed header name: {:?}", name)));
        }
        headers.set(name, value.trim())?;
    }
    headers.content_length()?;

    Ok(Some((Response::new(status, headers), end + HEAD_END.len())))
}

// =============================================================================
// Response body
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body follows the head (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly this many bytes
    Length(u64),
    /// Transfer-Encoding: chunked
    Chunked,
    /// Everything until the peer closes the connection
    UntilClose,
}

impl BodyKind {
    pub fn for_response(response: &Response, request_method: Method) -> Result<Self> {
        let code = response.status();
        if request_method == Method::Head || (100..200).contains(&code) || code == 204 || code == 304
        {
            return Ok(BodyKind::Empty);
        }
        if response.headers().is_chunked() {
            return Ok(BodyKind::Chunked);
        }
        Ok(match response.content_length()? {
            Some(0) => BodyKind::Empty,
            Some(n) => BodyKind::Length(n),
            None => BodyKind::UntilClose,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

/// Incremental response body decoder.
///
/// Feed it whatever has been read from the connection; it moves payload bytes
/// into the output buffer and leaves anything it cannot consume yet in the
/// input buffer.
#[derive(Debug)]
pub struct BodyDecoder {
    kind: BodyKind,
    remaining: u64,
    chunk: ChunkState,
    received: u64,
    done: bool,
}

impl BodyDecoder {
    pub fn new(kind: BodyKind) -> Self {
        let (remaining, done) = match kind {
            BodyKind::Empty => (0, true),
            BodyKind::Length(n) => (n, n == 0),
            BodyKind::Chunked | BodyKind::UntilClose => (0, false),
        };
        Self {
            kind,
            remaining,
            chunk: ChunkState::Size,
            received: 0,
            done,
        }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    /// Total body length when the response declared one.
    pub fn expected_len(&self) -> Option<u64> {
        match self.kind {
            BodyKind::Empty => Some(0),
            BodyKind::Length(n) => Some(n),
            BodyKind::Chunked | BodyKind::UntilClose => None,
        }
    }

    /// Payload bytes produced so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Decode as much of `input` as possible into `output`.
    /// Returns the number of payload bytes produced by this call.
    pub fn decode(&mut self, input: &mut BytesMut, output: &mut BytesMut) -> Result<usize> {
        if self.done {
            return Ok(0);
        }
        let produced = match self.kind {
            BodyKind::Empty => 0,
            BodyKind::Length(_) => {
                let n = (self.remaining.min(input.len() as u64)) as usize;
                output.extend_from_slice(&input.split_to(n));
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    self.done = true;
                }
                n
            }
            BodyKind::UntilClose => {
                let n = input.len();
                output.extend_from_slice(&input.split_to(n));
                n
            }
            BodyKind::Chunked => self.decode_chunked(input, output)?,
        };
        self.received += produced as u64;
        Ok(produced)
    }

    fn decode_chunked(&mut self, input: &mut BytesMut, output: &mut BytesMut) -> Result<usize> {
        let mut produced = 0;
        loop {
            match self.chunk {
                ChunkState::Size => {
                    let Some(pos) = find(input, CRLF) else {
                        if input.len() > MAX_CHUNK_LINE {
                            return Err(Error::protocol("Chunk size line too long"));
                        }
                        return Ok(produced);
                    };
                    let line = input.split_to(pos + CRLF.len());
                    let text = std::str::from_utf8(&line[..pos])
                        .map_err(|_| Error::protocol("Chunk size line is not valid UTF-8"))?;
                    let size_str = text.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| Error::protocol(format!("Invalid chunk size: {:?}", text)))?;
                    self.chunk = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if input.is_empty() {
                        return Ok(produced);
                    }
                    let n = (remaining.min(input.len() as u64)) as usize;
                    output.extend_from_slice(&input.split_to(n));
                    produced += n;
                    let left = remaining - n as u64;
                    self.chunk = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                }
                ChunkState::DataEnd => {
                    if input.len() < CRLF.len() {
                        return Ok(produced);
                    }
                    if &input[..CRLF.len()] != CRLF {
                        return Err(Error::protocol("Chunk data not followed by CRLF"));
                    }
                    input.advance(CRLF.len());
                    self.chunk = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(pos) = find(input, CRLF) else {
                        if input.len() > MAX_CHUNK_LINE {
                            return Err(Error::protocol("Trailer line too long"));
                        }
                        return Ok(produced);
                    };
                    input.advance(pos + CRLF.len());
                    if pos == 0 {
                        self.done = true;
                        return Ok(produced);
                    }
                }
            }
        }
    }

    /// The peer closed the connection. Only a close-delimited or already
    /// complete body may end this way.
    pub fn finish_eof(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if self.kind == BodyKind::UntilClose {
            self.done = true;
            return Ok(());
        }
        Err(match self.expected_len() {
            Some(total) => Error::disconnected(format!(
                "Connection closed after {} of {} body bytes",
                self.received, total
            )),
            None => Error::disconnected(format!(
                "Connection closed inside chunked body after {} bytes",
                self.received
            )),
        })
    }
}
