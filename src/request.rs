//! Per-call request description and the request built from it.

use reqwest::Method;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A file sent alongside the payload as multipart form data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub mime: Option<String>,
}

impl Attachment {
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content,
            mime: None,
        }
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// What to call: the verb plus everything the caller supplies for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: String,
    pub payload: Value,
    pub list_nodes: Vec<String>,
    pub verb_attrs: Vec<(String, String)>,
    pub attachments: Vec<Attachment>,
}

impl Call {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            payload: Value::Null,
            list_nodes: Vec::new(),
            verb_attrs: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Marks a response path as repeated (always an array in the dict view).
    pub fn list_node(mut self, path: impl Into<String>) -> Self {
        self.list_nodes.push(path.into());
        self
    }

    pub fn verb_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.verb_attrs.push((name.into(), value.into()));
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Prefixes list-node paths with `<verb>response.` unless they already start
/// with the lowercase verb.
///
/// `item.variations` for `GetItem` becomes `getitemresponse.item.variations`.
pub fn add_prefix(nodes: &mut [String], verb: &str) {
    let verb = verb.to_lowercase();
    if verb.is_empty() {
        return;
    }
    for node in nodes.iter_mut() {
        if !node.starts_with(&verb) {
            *node = format!("{}response.{}", verb, node.to_lowercase());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    /// Text fields plus files; the transport picks the multipart boundary.
    Multipart {
        fields: Vec<(String, String)>,
        attachments: Vec<Attachment>,
    },
}

impl RequestBody {
    fn form(&self) -> Result<Option<Form>> {
        let RequestBody::Multipart {
            fields,
            attachments,
        } = self
        else {
            return Ok(None);
        };

        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        for attachment in attachments {
            let mut part =
                Part::bytes(attachment.content.clone()).file_name(attachment.file_name.clone());
            if let Some(mime) = &attachment.mime {
                part = part.mime_str(mime).map_err(|e| {
                    Error::Configuration(format!("invalid attachment mime {}: {}", mime, e))
                })?;
            }
            form = form.part(attachment.field.clone(), part);
        }
        Ok(Some(form))
    }
}

/// Everything built for one call, discarded once the call completes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub verb: String,
    pub request_id: Uuid,
    pub payload: Value,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub list_nodes: Vec<String>,
}

impl RequestContext {
    pub(crate) fn to_builder(&self, client: &reqwest::Client) -> Result<reqwest::RequestBuilder> {
        let builder = client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());

        Ok(match self.body.form()? {
            Some(form) => builder.multipart(form),
            None => builder.body(self.body_text().unwrap_or_default().to_string()),
        })
    }

    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            RequestBody::Text(text) => Some(text),
            RequestBody::Multipart { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_prefix_unprefixed_path() {
        let mut nodes = vec!["item.variations".to_string()];
        add_prefix(&mut nodes, "GetItem");
        assert_eq!(nodes, vec!["getitemresponse.item.variations"]);
    }

    #[test]
    fn test_add_prefix_keeps_prefixed_path() {
        let mut nodes = vec!["getitemresponse.item".to_string()];
        add_prefix(&mut nodes, "GetItem");
        assert_eq!(nodes, vec!["getitemresponse.item"]);
    }

    #[test]
    fn test_add_prefix_lowercases_new_paths() {
        let mut nodes = vec![
            "Item.PictureDetails.PictureURL".to_string(),
            "getitemresponse.Item".to_string(),
        ];
        add_prefix(&mut nodes, "GetItem");
        assert_eq!(
            nodes,
            vec![
                "getitemresponse.item.picturedetails.pictureurl",
                "getitemresponse.Item",
            ]
        );
    }

    #[test]
    fn test_add_prefix_without_verb() {
        let mut nodes = vec!["item".to_string()];
        add_prefix(&mut nodes, "");
        assert_eq!(nodes, vec!["item"]);
    }

    #[test]
    fn test_call_builder() {
        let call = Call::new("AddItem")
            .payload(json!({"Item": {"Title": "Lamp"}}))
            .list_node("item.fees")
            .verb_attr("version", "1")
            .attachment(Attachment::new("file", "a.jpg", vec![1, 2, 3]).mime("image/jpeg"));

        assert_eq!(call.verb, "AddItem");
        assert_eq!(call.list_nodes, vec!["item.fees"]);
        assert_eq!(call.verb_attrs, vec![("version".to_string(), "1".to_string())]);
        assert_eq!(call.attachments[0].mime.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_text_body_has_no_form() {
        let body = RequestBody::Text("<xml/>".to_string());
        assert!(body.form().unwrap().is_none());
    }

    #[test]
    fn test_multipart_rejects_bad_mime() {
        let body = RequestBody::Multipart {
            fields: vec![],
            attachments: vec![Attachment::new("file", "a.bin", vec![]).mime("not a mime")],
        };
        assert!(matches!(body.form(), Err(Error::Configuration(_))));
    }
}
