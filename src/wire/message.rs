//! HTTP/1.1 request and response messages.

use crate::error::{Error, Result};
use crate::wire::headers::{self, Headers};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use tokio::io::AsyncRead;
use url::Url;

pub const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Copy,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Copy => "COPY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "COPY" => Some(Method::Copy),
            _ => None,
        }
    }

    /// Methods whose requests conventionally carry a body.
    pub fn expects_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing body source.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

pub enum Body {
    Empty,
    /// Whole body in memory, sent in one write
    Buffered(Bytes),
    /// Body read from a source in buffer-sized chunks
    Stream(BodyStream),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// An outgoing request: request line, headers and a body.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Url,
    headers: Headers,
    body: Body,
}

impl Request {
    pub fn new(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    pub fn get(uri: Url) -> Self {
        Self::new(Method::Get, uri)
    }

    pub fn put(uri: Url) -> Self {
        Self::new(Method::Put, uri)
    }

    pub fn post(uri: Url) -> Self {
        Self::new(Method::Post, uri)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Result<Self> {
        self.headers.set(name, value)?;
        Ok(self)
    }

    /// Buffered body; Content-Length is set from the buffer.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.set_content_length(body.len() as u64);
        self.body = Body::Buffered(body);
        self
    }

    /// Streamed body of a known length.
    pub fn with_stream(mut self, stream: BodyStream, length: u64) -> Self {
        self.headers.set_content_length(length);
        self.body = Body::Stream(stream);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        self.headers.content_length()
    }

    /// Origin-form request target: path plus optional query.
    pub fn target(&self) -> String {
        match self.uri.query() {
            Some(query) => format!("{}?{}", self.uri.path(), query),
            None => self.uri.path().to_string(),
        }
    }

    /// `host[:port]` as sent in the Host header. The port is omitted when it
    /// is the scheme default.
    pub fn host_header(&self) -> Result<String> {
        let host = self
            .uri
            .host_str()
            .ok_or_else(|| Error::protocol(format!("Request URI has no host: {}", self.uri)))?;
        Ok(match self.uri.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Host and port to open a connection to.
    pub fn authority(&self) -> Result<(String, u16)> {
        let host = self
            .uri
            .host_str()
            .ok_or_else(|| Error::protocol(format!("Request URI has no host: {}", self.uri)))?;
        let port = self
            .uri
            .port_or_known_default()
            .ok_or_else(|| Error::protocol(format!("Request URI has no port: {}", self.uri)))?;
        Ok((host.to_string(), port))
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

/// Parsed `HTTP/1.x code reason` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Status class digit (2 for 2xx, 4 for 4xx, ...)
    pub fn class(&self) -> u16 {
        self.code / 100
    }
}

/// A received response. The body is filled in once it has been read.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusLine, headers: Headers) -> Self {
        Self {
            status,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status.code
    }

    pub fn status_line(&self) -> &StatusLine {
        &self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        self.headers.content_length()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(headers::CONTENT_TYPE)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::reply(format!(
                "Expected JSON body (status {}): {}",
                self.status.code, e
            ))
        })
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("get"), Some(Method::Get));
        assert_eq!(Method::parse("PUT"), Some(Method::Put));
        assert_eq!(Method::parse("BREW"), None);
        assert!(Method::Put.expects_body());
        assert!(!Method::Get.expects_body());
    }

    #[test]
    fn test_with_body_sets_content_length() {
        let request = Request::put(uri("http://db:5984/docs/a")).with_body("hello");
        assert_eq!(request.content_length().unwrap(), Some(5));
        assert!(matches!(request.body(), Body::Buffered(b) if b.as_ref() == b"hello"));
    }

    #[test]
    fn test_target_and_host() {
        let request = Request::get(uri("http://db.local:5984/docs/_design/a/_view/b?limit=5"));
        assert_eq!(request.target(), "/docs/_design/a/_view/b?limit=5");
        assert_eq!(request.host_header().unwrap(), "db.local:5984");
        assert_eq!(
            request.authority().unwrap(),
            ("db.local".to_string(), 5984)
        );

        let default_port = Request::get(uri("http://db.local/docs"));
        assert_eq!(default_port.host_header().unwrap(), "db.local");
        assert_eq!(default_port.authority().unwrap().1, 80);
    }

    #[test]
    fn test_response_json() {
        let mut response = Response::new(
            StatusLine {
                version: HTTP_VERSION.to_string(),
                code: 201,
                reason: "Created".to_string(),
            },
            Headers::new(),
        );
        response.set_body(Bytes::from_static(br#"{"ok":true}"#));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
        assert!(response.is_success());
        assert_eq!(response.status_line().class(), 2);

        response.set_body(Bytes::from_static(b"<html>"));
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, Error::ReplyConstruction(_)));
    }
}
