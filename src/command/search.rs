//! Full-text search through the database's `_fti` handler.

use crate::command::{expect_status, require, Command, Database};
use crate::error::Result;
use crate::wire::{Method, Request, Response};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const RANGE_START_SUFFIX: &str = "_start";
const RANGE_STOP_SUFFIX: &str = "_stop";
const OPEN_BOUND: &str = "*";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lucene query assembled from field terms, joined with `AND`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    terms: Vec<String>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `field:value`; values containing whitespace are quoted as a phrase.
    /// Blank values add nothing.
    pub fn text(mut self, field: &str, value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return self;
        }
        let term = if value.chars().any(char::is_whitespace) {
            format!("{}:{}", escape(field), quote(value))
        } else {
            format!("{}:{}", escape(field), escape(value))
        };
        self.terms.push(term);
        self
    }

    /// `field:[from TO to]`; a missing bound is open (`*`). Nothing is added
    /// when both bounds are missing.
    pub fn range(mut self, field: &str, from: Option<&str>, to: Option<&str>) -> Self {
        let from = from.map(str::trim).filter(|s| !s.is_empty());
        let to = to.map(str::trim).filter(|s| !s.is_empty());
        if from.is_none() && to.is_none() {
            return self;
        }
        self.terms.push(format!(
            "{}:[{} TO {}]",
            escape(field),
            from.map_or_else(|| OPEN_BOUND.to_string(), range_bound),
            to.map_or_else(|| OPEN_BOUND.to_string(), range_bound)
        ));
        self
    }

    pub fn date_range(self, field: &str, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        let from = from.map(|d| d.format(DATE_FORMAT).to_string());
        let to = to.map(|d| d.format(DATE_FORMAT).to_string());
        self.range(field, from.as_deref(), to.as_deref())
    }

    /// Build from bound form values. Keys ending in `_start` / `_stop` are
    /// paired by name into one range; every other key is a text term.
    pub fn from_bound(values: &BTreeMap<String, String>) -> Self {
        let mut query = Self::new();
        for (key, value) in values {
            if let Some(field) = key.strip_suffix(RANGE_START_SUFFIX) {
                let stop = values.get(&format!("{}{}", field, RANGE_STOP_SUFFIX));
                query = query.range(field, Some(value), stop.map(String::as_str));
            } else if let Some(field) = key.strip_suffix(RANGE_STOP_SUFFIX) {
                // Paired above when the start half exists
                if !values.contains_key(&format!("{}{}", field, RANGE_START_SUFFIX)) {
                    query = query.range(field, None, Some(value));
                }
            } else {
                query = query.text(key, value);
            }
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The `q` parameter. An empty query matches everything.
    pub fn to_query_string(&self) -> String {
        if self.terms.is_empty() {
            return "*:*".to_string();
        }
        self.terms.join(" AND ")
    }
}

/// Quoted phrase; `\` and `"` are escaped so the phrase always closes.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Range bound. Plain dates and numbers stay bare; anything else is quoted
/// so it cannot close the range or start a new clause.
fn range_bound(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if plain && value != "TO" {
        value.to_string()
    } else {
        quote(value)
    }
}

fn escape(value: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
        '\\', '/',
    ];
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `GET /{db}/_fti/_design/{design}/{index}?q=..`
#[derive(Debug, Clone)]
pub struct Search {
    db: Database,
    design: String,
    index: String,
    query: SearchQuery,
    limit: Option<u32>,
    include_docs: bool,
}

impl Search {
    pub fn new(
        db: Database,
        design: impl Into<String>,
        index: impl Into<String>,
        query: SearchQuery,
    ) -> Result<Self> {
        let design = design.into();
        let index = index.into();
        require(&design, "Search design document")?;
        require(&index, "Search index")?;
        Ok(Self {
            db,
            design,
            index,
            query,
            limit: None,
            include_docs: false,
        })
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRow {
    pub id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub fields: Value,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub status: u16,
    pub total_rows: u64,
    pub rows: Vec<SearchRow>,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    rows: Vec<SearchRow>,
}

#[async_trait]
impl Command for Search {
    type Reply = SearchReply;

    fn name(&self) -> &'static str {
        "Search"
    }

    async fn build_request(&self) -> Result<Request> {
        let mut uri = self
            .db
            .uri(&["_fti", "_design", &self.design, &self.index])?;
        {
            let mut pairs = uri.query_pairs_mut();
            pairs.append_pair("q", &self.query.to_query_string());
            if let Some(limit) = self.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            if self.include_docs {
                pairs.append_pair("include_docs", "true");
            }
        }
        self.db.request_to(Method::Get, uri)
    }

    fn parse_reply(&self, response: Response) -> Result<SearchReply> {
        expect_status(&response, &[200])?;
        let body: SearchBody = response.json()?;
        Ok(SearchReply {
            status: response.status(),
            total_rows: body.total_rows,
            rows: body.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::wire::{Headers, StatusLine};
    use bytes::Bytes;

    fn bound(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_ranges_pair_by_suffix() {
        let query = SearchQuery::from_bound(&bound(&[
            ("title", "budget"),
            ("created_stop", "2011-12-31"),
            ("created_start", "2011-01-01"),
            ("modified_stop", "2012-06-30"),
        ]));
        assert_eq!(
            query.to_query_string(),
            "created:[2011-01-01 TO 2011-12-31] AND modified:[* TO 2012-06-30] AND title:budget"
        );
    }

    #[test]
    fn test_missing_stop_is_open() {
        let query = SearchQuery::from_bound(&bound(&[("created_start", "2011-01-01")]));
        assert_eq!(query.to_query_string(), "created:[2011-01-01 TO *]");
    }

    #[test]
    fn test_blank_values_skipped() {
        let query = SearchQuery::from_bound(&bound(&[
            ("title", "  "),
            ("created_start", ""),
            ("created_stop", ""),
        ]));
        assert!(query.is_empty());
        assert_eq!(query.to_query_string(), "*:*");
    }

    #[test]
    fn test_text_quoting_and_escaping() {
        let query = SearchQuery::new()
            .text("title", "annual report")
            .text("extension", "c++");
        assert_eq!(
            query.to_query_string(),
            "title:\"annual report\" AND extension:c\\+\\+"
        );
    }

    #[test]
    fn test_phrase_with_trailing_backslash_closes() {
        let query = SearchQuery::new().text("title", "annual report\\");
        assert_eq!(query.to_query_string(), r#"title:"annual report\\""#);

        let query = SearchQuery::new().text("title", r#"say "hi" now"#);
        assert_eq!(query.to_query_string(), r#"title:"say \"hi\" now""#);
    }

    #[test]
    fn test_range_bounds_cannot_add_clauses() {
        let query = SearchQuery::from_bound(&bound(&[("created_start", "a] OR secret:[* TO *")]));
        assert_eq!(
            query.to_query_string(),
            r#"created:["a] OR secret:[* TO *" TO *]"#
        );

        let query = SearchQuery::new().range("size", Some("10"), Some(r#"2" OR x"#));
        assert_eq!(query.to_query_string(), r#"size:[10 TO "2\" OR x"]"#);
    }

    #[test]
    fn test_field_names_are_escaped() {
        let query = SearchQuery::from_bound(&bound(&[("a:b", "c"), ("x)_start", "1")]));
        assert_eq!(query.to_query_string(), r#"a\:b:c AND x\):[1 TO *]"#);
    }

    #[test]
    fn test_date_range() {
        let query = SearchQuery::new().date_range(
            "created",
            NaiveDate::from_ymd_opt(2011, 3, 4),
            None,
        );
        assert_eq!(query.to_query_string(), "created:[2011-03-04 TO *]");
    }

    #[tokio::test]
    async fn test_search_request() {
        let db = Database::new("localhost", 5984, "documents").unwrap();
        let search = Search::new(db, "search", "by_all", SearchQuery::new().text("creator", "lucas"))
            .unwrap()
            .with_limit(25);
        let request = search.build_request().await.unwrap();
        assert_eq!(
            request.target(),
            "/documents/_fti/_design/search/by_all?q=creator%3Alucas&limit=25"
        );
    }

    #[test]
    fn test_parse_reply() {
        let db = Database::new("localhost", 5984, "documents").unwrap();
        let search = Search::new(db, "search", "by_all", SearchQuery::new()).unwrap();
        let mut response = Response::new(
            StatusLine {
                version: "HTTP/1.1".to_string(),
                code: 200,
                reason: "OK".to_string(),
            },
            Headers::new(),
        );
        response.set_body(Bytes::from_static(
            br#"{"q":"*:*","total_rows":1,"rows":[{"id":"v1","score":0.5,"fields":{"title":"Plan"}}]}"#,
        ));
        let reply = search.parse_reply(response).unwrap();
        assert_eq!(reply.total_rows, 1);
        assert_eq!(reply.rows[0].fields["title"], "Plan");

        let mut bad = Response::new(
            StatusLine {
                version: "HTTP/1.1".to_string(),
                code: 200,
                reason: "OK".to_string(),
            },
            Headers::new(),
        );
        bad.set_body(Bytes::from_static(b"not json"));
        assert!(matches!(search.parse_reply(bad), Err(Error::ReplyConstruction(_))));
    }
}
