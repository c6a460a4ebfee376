//! Storage commands.
//!
//! Each command describes one request against the document database and
//! knows how to turn the matching response into a typed reply. Commands
//! validate their inputs at construction and never retry.

pub mod attachment;
pub mod database;
pub mod document;
pub mod search;
pub mod view;

pub use attachment::{
    AttachmentReply, AttachmentSource, GetAttachment, PostAttachmentForm, PutAttachment,
    OCTET_STREAM,
};
pub use database::{Credentials, Database};
pub use document::{DeleteDocument, DocumentReply, GetDocument, PutDocument, PutReply};
pub use search::{Search, SearchQuery, SearchReply, SearchRow};
pub use view::{GetView, ViewReply, ViewRow};

use crate::error::{Error, Result};
use crate::wire::{Request, Response};
use async_trait::async_trait;
use serde::Deserialize;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[async_trait]
pub trait Command: Send + Sync {
    type Reply: Send + 'static;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Build the request. Async because file-backed bodies are opened here.
    async fn build_request(&self) -> Result<Request>;

    fn parse_reply(&self, response: Response) -> Result<Self::Reply>;
}

/// Error body returned by the database on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    reason: String,
}

/// Fail with `ReplyConstruction` unless the status is one of `accepted`.
pub(crate) fn expect_status(response: &Response, accepted: &[u16]) -> Result<()> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(());
    }
    let detail = match response.json::<ErrorBody>() {
        Ok(body) if body.reason.is_empty() => body.error,
        Ok(body) => format!("{}: {}", body.error, body.reason),
        Err(_) => response.status_line().reason.clone(),
    };
    Err(Error::reply(format!("Unexpected status {} ({})", status, detail)))
}

pub(crate) fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::protocol(format!("{} must not be empty", what)));
    }
    Ok(())
}
