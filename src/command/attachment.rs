use crate::command::document::parse_put_reply;
use crate::command::{
    expect_status, require, Command, Database, PutReply, JSON_CONTENT_TYPE,
};
use crate::error::{Error, Result};
use crate::storage::fs::FileSystem;
use crate::wire::{headers, Method, MultipartForm, Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Where attachment bytes come from.
#[derive(Clone)]
pub enum AttachmentSource {
    Bytes(Bytes),
    /// Streamed from the file system when the request is built
    File {
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
    },
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            AttachmentSource::File { path, .. } => write!(f, "File({})", path.display()),
        }
    }
}

/// `PUT /{db}/{id}/{name}?rev={rev}` with a raw body.
#[derive(Debug, Clone)]
pub struct PutAttachment {
    db: Database,
    id: String,
    name: String,
    rev: Option<String>,
    content_type: String,
    source: AttachmentSource,
    length: u64,
}

impl PutAttachment {
    pub fn new(
        db: Database,
        id: impl Into<String>,
        name: impl Into<String>,
        source: AttachmentSource,
        length: u64,
    ) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        require(&id, "Document id")?;
        require(&name, "Attachment name")?;
        if length == 0 {
            return Err(Error::protocol(format!(
                "Attachment {}/{} must have a positive length",
                id, name
            )));
        }
        if let AttachmentSource::Bytes(bytes) = &source {
            if bytes.len() as u64 != length {
                return Err(Error::protocol(format!(
                    "Attachment {}/{} declared {} bytes but holds {}",
                    id,
                    name,
                    length,
                    bytes.len()
                )));
            }
        }
        Ok(Self {
            db,
            id,
            name,
            rev: None,
            content_type: OCTET_STREAM.to_string(),
            source,
            length,
        })
    }

    /// Revision of the document the attachment is added to.
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

#[async_trait]
impl Command for PutAttachment {
    type Reply = PutReply;

    fn name(&self) -> &'static str {
        "PutAttachment"
    }

    async fn build_request(&self) -> Result<Request> {
        let mut uri = self.db.uri(&[&self.id, &self.name])?;
        if let Some(rev) = &self.rev {
            uri.query_pairs_mut().append_pair("rev", rev);
        }
        let request = self
            .db
            .request_to(Method::Put, uri)?
            .with_header(headers::CONTENT_TYPE, self.content_type.clone())?;

        match &self.source {
            AttachmentSource::Bytes(bytes) => Ok(request.with_body(bytes.clone())),
            AttachmentSource::File { fs, path } => {
                let (stream, actual) = fs.open_read(path).await?;
                if actual != self.length {
                    return Err(Error::protocol(format!(
                        "File {} is {} bytes, attachment declared {}",
                        path.display(),
                        actual,
                        self.length
                    )));
                }
                Ok(request.with_stream(stream, self.length))
            }
        }
    }

    fn parse_reply(&self, response: Response) -> Result<PutReply> {
        parse_put_reply(&self.id, &response)
    }
}

/// `POST /{db}/{id}` with a `multipart/form-data` body: the `_rev` field and
/// one `_attachments` file part. The attachment takes the file's name.
#[derive(Clone)]
pub struct PostAttachmentForm {
    db: Database,
    id: String,
    rev: String,
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    length: u64,
}

impl fmt::Debug for PostAttachmentForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostAttachmentForm")
            .field("id", &self.id)
            .field("rev", &self.rev)
            .field("path", &self.path)
            .field("length", &self.length)
            .finish()
    }
}

impl PostAttachmentForm {
    pub fn new(
        db: Database,
        id: impl Into<String>,
        rev: impl Into<String>,
        fs: Arc<dyn FileSystem>,
        path: impl Into<PathBuf>,
        length: u64,
    ) -> Result<Self> {
        let id = id.into();
        let rev = rev.into();
        let path = path.into();
        require(&id, "Document id")?;
        require(&rev, "Document revision")?;
        if path.file_name().is_none() {
            return Err(Error::protocol(format!(
                "Attachment path {} has no file name",
                path.display()
            )));
        }
        if length == 0 {
            return Err(Error::protocol(format!(
                "Attachment {} must have a positive length",
                path.display()
            )));
        }
        Ok(Self {
            db,
            id,
            rev,
            fs,
            path,
            length,
        })
    }

    fn form(&self) -> MultipartForm {
        MultipartForm::new()
            .field("_rev", self.rev.clone())
            .file("_attachments", self.path.clone(), self.length)
    }
}

#[async_trait]
impl Command for PostAttachmentForm {
    type Reply = PutReply;

    fn name(&self) -> &'static str {
        "PostAttachmentForm"
    }

    async fn build_request(&self) -> Result<Request> {
        let uri = self.db.uri(&[&self.id])?;
        let request = self
            .form()
            .into_request(uri, self.fs.as_ref())
            .await?
            .with_header(headers::ACCEPT, JSON_CONTENT_TYPE)?;
        self.db.authorize(request)
    }

    fn parse_reply(&self, response: Response) -> Result<PutReply> {
        parse_put_reply(&self.id, &response)
    }
}

/// `GET /{db}/{id}/{name}`
#[derive(Debug, Clone)]
pub struct GetAttachment {
    db: Database,
    id: String,
    name: String,
}

impl GetAttachment {
    pub fn new(db: Database, id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        require(&id, "Document id")?;
        require(&name, "Attachment name")?;
        Ok(Self { db, id, name })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[async_trait]
impl Command for GetAttachment {
    type Reply = AttachmentReply;

    fn name(&self) -> &'static str {
        "GetAttachment"
    }

    async fn build_request(&self) -> Result<Request> {
        self.db
            .request(Method::Get, &[&self.id, &self.name])?
            .with_header(headers::ACCEPT, "*/*")
    }

    fn parse_reply(&self, response: Response) -> Result<AttachmentReply> {
        expect_status(&response, &[200])?;
        let status = response.status();
        let content_type = response.content_type().map(str::to_string);
        Ok(AttachmentReply {
            status,
            content_type,
            data: response.into_body(),
        })
    }
}
