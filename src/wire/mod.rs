//! HTTP/1.1 message layer.
//!
//! Builds requests and parses responses over a plain byte stream. This layer
//! has no retry or timeout policy; the connection and remoting layers own
//! those.
//!
//! ```text
//! Request  --encode_head--> bytes --> connection --> body chunks
//! bytes    --parse_response_head--> Response --BodyDecoder--> body
//! ```

pub mod codec;
pub mod headers;
pub mod message;
pub mod multipart;

pub use codec::{encode_head, parse_response_head, BodyDecoder, BodyKind, MAX_HEAD_SIZE};
pub use headers::Headers;
pub use message::{Body, BodyStream, Method, Request, Response, StatusLine, HTTP_VERSION};
pub use multipart::MultipartForm;
