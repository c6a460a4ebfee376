use crate::command::{expect_status, require, Command, Database};
use crate::error::{Error, Result};
use crate::wire::{Method, Request, Response};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// `GET /{db}/_design/{design}/_view/{view}`
#[derive(Debug, Clone)]
pub struct GetView {
    db: Database,
    design: String,
    view: String,
    params: Vec<(String, String)>,
}

impl GetView {
    pub fn new(db: Database, design: impl Into<String>, view: impl Into<String>) -> Result<Self> {
        let design = design.into();
        let view = view.into();
        require(&design, "Design document name")?;
        require(&view, "View name")?;
        Ok(Self {
            db,
            design,
            view,
            params: Vec::new(),
        })
    }

    /// Query parameter with a JSON value (`key`, `startkey`, `limit`, ...).
    pub fn with_param(mut self, name: impl Into<String>, value: &Value) -> Result<Self> {
        let value = serde_json::to_string(value)?;
        self.params.push((name.into(), value));
        Ok(self)
    }

    pub fn include_docs(mut self) -> Self {
        self.params
            .push(("include_docs".to_string(), "true".to_string()));
        self
    }

    pub fn design(&self) -> &str {
        &self.design
    }

    pub fn view(&self) -> &str {
        &self.view
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewReply {
    pub status: u16,
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<ViewRow>,
}

#[derive(Deserialize)]
struct ViewBody {
    #[serde(default)]
    total_rows: Option<u64>,
    #[serde(default)]
    offset: u64,
    rows: Vec<ViewRow>,
}

#[async_trait]
impl Command for GetView {
    type Reply = ViewReply;

    fn name(&self) -> &'static str {
        "GetView"
    }

    async fn build_request(&self) -> Result<Request> {
        let mut uri = self
            .db
            .uri(&["_design", &self.design, "_view", &self.view])?;
        if !self.params.is_empty() {
            uri.query_pairs_mut()
                .extend_pairs(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        self.db.request_to(Method::Get, uri)
    }

    fn parse_reply(&self, response: Response) -> Result<ViewReply> {
        expect_status(&response, &[200])?;
        let body: ViewBody = response.json()?;
        let total_rows = body.total_rows.unwrap_or(body.rows.len() as u64);
        if (body.rows.len() as u64) > total_rows {
            return Err(Error::reply(format!(
                "View returned {} rows but total_rows is {}",
                body.rows.len(),
                total_rows
            )));
        }
        Ok(ViewReply {
            status: response.status(),
            total_rows,
            offset: body.offset,
            rows: body.rows,
        })
    }
}
