//! `multipart/form-data` bodies.
//!
//! The total length is computed up front so the request carries an exact
//! Content-Length; file parts are streamed from the file system.

use crate::error::{Error, Result};
use crate::storage::fs::FileSystem;
use crate::wire::headers;
use crate::wire::message::{BodyStream, Request};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use url::Url;
use uuid::Uuid;

const BOUNDARY_PREFIX: &str = "-----------------------------";
const BOUNDARY_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Field { name: String, value: String },
    File { name: String, path: PathBuf, length: u64 },
}

#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(new_boundary())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// File part; `length` must match the file's size when the body is sent.
    pub fn file(mut self, name: impl Into<String>, path: impl Into<PathBuf>, length: u64) -> Self {
        self.parts.push(Part::File {
            name: name.into(),
            path: path.into(),
            length,
        });
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn field_bytes(&self, name: &str, value: &str) -> Vec<u8> {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary, name, value
        )
        .into_bytes()
    }

    fn file_header_bytes(&self, name: &str, path: &Path) -> Vec<u8> {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            self.boundary, name, filename
        )
        .into_bytes()
    }

    fn footer_bytes(&self) -> Vec<u8> {
        format!("--{}--\r\n", self.boundary).into_bytes()
    }

    /// Exact number of bytes the body will occupy.
    pub fn content_length(&self) -> u64 {
        let parts: u64 = self
            .parts
            .iter()
            .map(|part| match part {
                Part::Field { name, value } => self.field_bytes(name, value).len() as u64,
                Part::File { name, path, length } => {
                    self.file_header_bytes(name, path).len() as u64 + length + 2
                }
            })
            .sum();
        parts + self.footer_bytes().len() as u64
    }

    /// Open every file part and chain the body segments into one stream.
    pub async fn into_stream(self, fs: &dyn FileSystem) -> Result<BodyStream> {
        let mut stream: BodyStream = Box::new(Cursor::new(Vec::new()));
        for part in &self.parts {
            match part {
                Part::Field { name, value } => {
                    let bytes = self.field_bytes(name, value);
                    stream = Box::new(stream.chain(Cursor::new(bytes)));
                }
                Part::File { name, path, length } => {
                    let (file, actual) = fs.open_read(path).await?;
                    if actual != *length {
                        return Err(Error::protocol(format!(
                            "File {} is {} bytes, form declared {}",
                            path.display(),
                            actual,
                            length
                        )));
                    }
                    let header = self.file_header_bytes(name, path);
                    stream = Box::new(
                        stream
                            .chain(Cursor::new(header))
                            .chain(file.take(*length))
                            .chain(Cursor::new(b"\r\n".to_vec())),
                    );
                }
            }
        }
        let footer = self.footer_bytes();
        Ok(Box::new(stream.chain(Cursor::new(footer))))
    }

    /// A POST request carrying this form as a streamed body.
    pub async fn into_request(self, uri: Url, fs: &dyn FileSystem) -> Result<Request> {
        let content_type = self.content_type();
        let length = self.content_length();
        let stream = self.into_stream(fs).await?;
        Request::post(uri)
            .with_header(headers::CONTENT_TYPE, content_type)
            .map(|request| request.with_stream(stream, length))
    }
}

/// Boundary of the form `-----------------------------` followed by 15
/// random digits.
fn new_boundary() -> String {
    let digits = Uuid::new_v4().as_u128().to_string();
    let digits: String = digits.chars().take(BOUNDARY_DIGITS).collect();
    format!("{}{:0>width$}", BOUNDARY_PREFIX, digits, width = BOUNDARY_DIGITS)
}
