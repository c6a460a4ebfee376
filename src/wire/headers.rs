//! Header collection with unique, case-insensitive keys.

use crate::error::{Error, Result};
use std::fmt;

pub const HOST: &str = "Host";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const AUTHORIZATION: &str = "Authorization";
pub const ACCEPT: &str = "Accept";
pub const CONNECTION: &str = "Connection";

/// Ordered header set. Names compare case-insensitively; the spelling of the
/// first insertion is kept for serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Insert or replace a header. Rejects names and values that would
    /// corrupt the header block.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;

        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    pub(crate) fn set_content_length(&mut self, length: u64) {
        let value = length.to_string();
        match self.position(CONTENT_LENGTH) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((CONTENT_LENGTH.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed Content-Length, if present.
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::protocol(format!("Invalid Content-Length: {:?}", raw))),
        }
    }

    /// True when the last transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get(TRANSFER_ENCODING)
            .and_then(|v| v.rsplit(',').next())
            .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

impl fmt::Display for Headers {
    /// `Name: value\r\n` per entry, in insertion order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':' && !b"()<>@,;\\\"/[]?={}".contains(&b));
    if valid {
        Ok(())
    } else {
        Err(Error::protocol(format!("Invalid header name: {:?}", name)))
    }
}

fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(Error::protocol(format!(
            "Invalid value for header {}: control characters",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_insensitive_unique_keys() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain").unwrap();
        headers.set("content-type", "application/json").unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.to_string(), "Content-Type: application/json\r\n");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut headers = Headers::new();
        headers.set("B", "2").unwrap();
        headers.set("A", "1").unwrap();
        headers.set("C", "3").unwrap();

        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_rejects_header_injection() {
        let mut headers = Headers::new();
        assert!(headers.set("X-Evil", "a\r\nHost: other").is_err());
        assert!(headers.set("Bad Name", "v").is_err());
        assert!(headers.set("", "v").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_content_length_parsing() {
        let mut headers = Headers::new();
        assert_eq!(headers.content_length().unwrap(), None);

        headers.set(CONTENT_LENGTH, " 42 ").unwrap();
        assert_eq!(headers.content_length().unwrap(), Some(42));

        headers.set(CONTENT_LENGTH, "forty").unwrap();
        assert!(matches!(headers.content_length(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_chunked_detection() {
        let mut headers = Headers::new();
        assert!(!headers.is_chunked());
        headers.set(TRANSFER_ENCODING, "gzip, Chunked").unwrap();
        assert!(headers.is_chunked());
        headers.set(TRANSFER_ENCODING, "chunked, gzip").unwrap();
        assert!(!headers.is_chunked());
    }

    proptest! {
        #[test]
        fn prop_set_then_get_any_case(
            name in "[A-Za-z][A-Za-z0-9-]{0,20}",
            value in "[ -~]{0,40}",
        ) {
            let mut headers = Headers::new();
            headers.set(name.clone(), value.clone()).unwrap();
            prop_assert_eq!(headers.get(&name.to_ascii_lowercase()), Some(value.as_str()));
            prop_assert_eq!(headers.get(&name.to_ascii_uppercase()), Some(value.as_str()));
            let line = format!("{}: {}\r\n", name, value);
            prop_assert_eq!(headers.to_string(), line);
        }
    }
}
