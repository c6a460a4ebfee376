use crate::command::{expect_status, require, Command, Database, JSON_CONTENT_TYPE};
use crate::error::{Error, Result};
use crate::wire::{headers, Method, Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

/// `GET /{db}/{id}`
#[derive(Debug, Clone)]
pub struct GetDocument {
    db: Database,
    id: String,
}

impl GetDocument {
    pub fn new(db: Database, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        require(&id, "Document id")?;
        Ok(Self { db, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReply {
    pub status: u16,
    pub id: String,
    pub rev: String,
    /// The full document, including `_id` and `_rev`
    pub document: Value,
}

#[async_trait]
impl Command for GetDocument {
    type Reply = DocumentReply;

    fn name(&self) -> &'static str {
        "GetDocument"
    }

    async fn build_request(&self) -> Result<Request> {
        self.db.request(Method::Get, &[&self.id])
    }

    fn parse_reply(&self, response: Response) -> Result<DocumentReply> {
        expect_status(&response, &[200])?;
        let document: Value = response.json()?;
        let field = |name: &str| {
            document
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::reply(format!("Document is missing {}", name)))
        };
        let id = field("_id")?;
        let rev = field("_rev")?;
        if id != self.id {
            return Err(Error::reply(format!(
                "Requested document {} but received {}",
                self.id, id
            )));
        }
        Ok(DocumentReply {
            status: response.status(),
            id,
            rev,
            document,
        })
    }
}

/// `PUT /{db}/{id}` with a JSON body. Updates carry `_rev` inside the
/// document.
#[derive(Debug, Clone)]
pub struct PutDocument {
    db: Database,
    id: String,
    body: Bytes,
}

impl PutDocument {
    pub fn new(db: Database, id: impl Into<String>, document: &Value) -> Result<Self> {
        let id = id.into();
        require(&id, "Document id")?;
        if !document.is_object() {
            return Err(Error::protocol("Document body must be a JSON object"));
        }
        let body = Bytes::from(serde_json::to_vec(document)?);
        Ok(Self { db, id, body })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }
}

/// `DELETE /{db}/{id}?rev={rev}`
#[derive(Debug, Clone)]
pub struct DeleteDocument {
    db: Database,
    id: String,
    rev: String,
}

impl DeleteDocument {
    pub fn new(db: Database, id: impl Into<String>, rev: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let rev = rev.into();
        require(&id, "Document id")?;
        require(&rev, "Document revision")?;
        Ok(Self { db, id, rev })
    }
}

#[async_trait]
impl Command for DeleteDocument {
    type Reply = PutReply;

    fn name(&self) -> &'static str {
        "DeleteDocument"
    }

    async fn build_request(&self) -> Result<Request> {
        let mut uri = self.db.uri(&[&self.id])?;
        uri.query_pairs_mut().append_pair("rev", &self.rev);
        self.db.request_to(Method::Delete, uri)
    }

    fn parse_reply(&self, response: Response) -> Result<PutReply> {
        parse_put_reply(&self.id, &response)
    }
}

/// Write confirmation: `{"ok":true,"id":..,"rev":..}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReply {
    pub status: u16,
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

#[derive(Deserialize)]
struct PutBody {
    #[serde(default)]
    ok: bool,
    id: String,
    rev: String,
}

/// Shared by every command answered with a write confirmation.
pub(crate) fn parse_put_reply(expected_id: &str, response: &Response) -> Result<PutReply> {
    expect_status(response, &[200, 201, 202])?;
    let body: PutBody = response.json()?;
    if !body.ok {
        return Err(Error::reply(format!("Write of {} was not acknowledged", expected_id)));
    }
    if body.id != expected_id {
        return Err(Error::reply(format!(
            "Wrote {} but the server confirmed {}",
            expected_id, body.id
        )));
    }
    Ok(PutReply {
        status: response.status(),
        ok: body.ok,
        id: body.id,
        rev: body.rev,
    })
}

#[async_trait]
impl Command for PutDocument {
    type Reply = PutReply;

    fn name(&self) -> &'static str {
        "PutDocument"
    }

    async fn build_request(&self) -> Result<Request> {
        Ok(self
            .db
            .request(Method::Put, &[&self.id])?
            .with_header(headers::CONTENT_TYPE, JSON_CONTENT_TYPE)?
            .with_body(self.body.clone()))
    }

    fn parse_reply(&self, response: Response) -> Result<PutReply> {
        parse_put_reply(&self.id, &response)
    }
}
