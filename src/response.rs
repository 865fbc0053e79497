//! Normalized API response.
//!
//! The body is parsed once, on first access, into a [`Parsed`] tree. The
//! dictionary, JSON, DOM and soup views are read-only projections of that tree.

use std::sync::OnceLock;

use log::debug;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::xml::{self, Node};

/// Errors, warnings and codes a verb hook found inside a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyErrors {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub codes: Vec<String>,
}

impl BodyErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.codes.is_empty()
    }
}

/// Canonical parsed form of a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Xml(Node),
    Json(Value),
}

#[derive(Debug, Clone)]
pub struct Response {
    verb: String,
    status_code: u16,
    reason: String,
    headers: HeaderMap,
    content: Vec<u8>,
    list_nodes: Vec<String>,
    transport_error: Option<String>,
    body_errors: BodyErrors,
    parsed: OnceLock<std::result::Result<Parsed, String>>,
}

impl Response {
    /// Wraps a received body. A status other than 200 records its reason as
    /// the transport error.
    pub fn new(
        verb: impl Into<String>,
        status_code: u16,
        reason: impl Into<String>,
        list_nodes: Vec<String>,
        content: Vec<u8>,
    ) -> Self {
        let reason = reason.into();
        let transport_error = if status_code != 200 {
            Some(if reason.is_empty() {
                format!("HTTP {}", status_code)
            } else {
                reason.clone()
            })
        } else {
            None
        };

        Self {
            verb: verb.into(),
            status_code,
            reason,
            headers: HeaderMap::new(),
            content,
            list_nodes,
            transport_error,
            body_errors: BodyErrors::default(),
            parsed: OnceLock::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Reads a transport response to completion and wraps it.
    pub async fn from_http(
        verb: &str,
        list_nodes: Vec<String>,
        response: reqwest::Response,
    ) -> Result<Self> {
        let status: StatusCode = response.status();
        let headers = response.headers().clone();
        let content = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {}", e)))?;

        Ok(Self::new(
            verb,
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            list_nodes,
            content.to_vec(),
        )
        .with_headers(headers))
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// HTTP status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// HTTP reason phrase.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw response body.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn list_nodes(&self) -> &[String] {
        &self.list_nodes
    }

    /// Reason recorded for a non-200 status.
    pub fn transport_error(&self) -> Option<&str> {
        self.transport_error.as_deref()
    }

    pub fn body_errors(&self) -> &BodyErrors {
        &self.body_errors
    }

    pub(crate) fn set_body_errors(&mut self, body_errors: BodyErrors) {
        self.body_errors = body_errors;
    }

    /// Aggregated error message: transport error first, then payload errors.
    ///
    /// Formatted as `"<verb>: <message>, <message>"`; `None` when there is
    /// nothing to report.
    pub fn error(&self) -> Option<String> {
        let messages: Vec<&str> = self
            .transport_error
            .iter()
            .map(String::as_str)
            .chain(self.body_errors.errors.iter().map(String::as_str))
            .collect();

        if messages.is_empty() {
            None
        } else {
            Some(format!("{}: {}", self.verb, messages.join(", ")))
        }
    }

    /// The canonical parsed body, computed on first access.
    pub fn parsed(&self) -> Result<&Parsed> {
        self.parsed
            .get_or_init(|| parse_content(&self.verb, &self.content))
            .as_ref()
            .map_err(|e| Error::Parse(e.clone()))
    }

    /// Dictionary view: JSON bodies as-is, XML bodies as `{Root: {...}}`.
    pub fn dict(&self) -> Result<Value> {
        Ok(match self.parsed()? {
            Parsed::Xml(root) => root.to_value(&self.list_nodes),
            Parsed::Json(value) => value.clone(),
        })
    }

    /// The content of the root element of [`Response::dict`].
    pub fn reply(&self) -> Result<Value> {
        Ok(match self.parsed()? {
            Parsed::Xml(root) => {
                let mut dict = root.to_value(&self.list_nodes);
                dict.get_mut(&root.name).map(Value::take).unwrap_or(Value::Null)
            }
            Parsed::Json(value) => value.clone(),
        })
    }

    /// [`Response::dict`] serialized as a JSON string.
    pub fn json(&self) -> Result<String> {
        serde_json::to_string(&self.dict()?).map_err(|e| Error::Parse(e.to_string()))
    }

    /// The `<Verb>Response` element, falling back to the document root.
    pub fn dom(&self) -> Result<&Node> {
        let root = self.soup()?;
        let name = format!("{}Response", self.verb);
        if root.name == name {
            return Ok(root);
        }
        Ok(root.descendants(&name).into_iter().next().unwrap_or(root))
    }

    /// The whole document element.
    pub fn soup(&self) -> Result<&Node> {
        match self.parsed()? {
            Parsed::Xml(root) => Ok(root),
            Parsed::Json(_) => Err(Error::Parse(format!(
                "Invalid Verb: {} (response is not XML)",
                self.verb
            ))),
        }
    }

    /// Looks up a value by key path under [`Response::reply`].
    ///
    /// Elements carrying attributes resolve to their `value` text.
    pub fn value(&self, path: &[&str]) -> Option<Value> {
        let reply = match self.reply() {
            Ok(reply) => reply,
            Err(e) => {
                debug!("value lookup on unparsable response: {}", e);
                return None;
            }
        };

        let mut current = &reply;
        for key in path {
            current = current.get(key)?;
        }

        match current {
            Value::Object(map) => map.get("value").cloned(),
            Value::Null => None,
            other => Some(other.clone()),
        }
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn parse_content(verb: &str, content: &[u8]) -> std::result::Result<Parsed, String> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let trimmed = content.trim_ascii();

    match trimmed.first() {
        None => Ok(Parsed::Xml(Node::new(format!("{}Response", verb)))),
        Some(b'<') => xml::parse(trimmed).map(Parsed::Xml).map_err(|e| match e {
            Error::Parse(msg) => msg,
            other => other.to_string(),
        }),
        Some(_) => serde_json::from_slice(trimmed)
            .map(Parsed::Json)
            .map_err(|e| format!("invalid JSON: {}", e)),
    }
}
