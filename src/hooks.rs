//! Per-verb request building and error extraction.
//!
//! Every API family shapes its headers, body and embedded errors differently.
//! A [`VerbHooks`] implementation supplies those three capabilities; a
//! [`HookRegistry`] selects one by verb.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::response::{BodyErrors, Response};
use crate::xml;

pub const CALL_NAME_HEADER: &str = "X-EBAY-API-CALL-NAME";

const XML_NAMESPACE: &str = "urn:ebay:apis:eBLBaseComponents";

#[cfg_attr(test, mockall::automock)]
pub trait VerbHooks: Send + Sync {
    /// Headers specific to the verb.
    fn build_headers(&self, _verb: &str) -> Result<HeaderMap> {
        Ok(HeaderMap::new())
    }

    /// Encoded request body for the verb.
    fn build_body(&self, _verb: &str, _payload: &Value, _verb_attrs: &[(String, String)]) -> Result<String> {
        Ok(String::new())
    }

    /// Errors, warnings and codes embedded in a successfully received body.
    fn extract_payload_errors(&self, _verb: &str, _response: &Response) -> BodyErrors {
        BodyErrors::default()
    }
}

/// Hooks that add nothing: no extra headers, an empty body, no payload errors.
pub struct DefaultHooks;

impl VerbHooks for DefaultHooks {}

/// Function table keyed by verb, with a fallback for unregistered verbs.
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn VerbHooks>>,
    fallback: Arc<dyn VerbHooks>,
}

impl HookRegistry {
    /// Empty registry falling back to [`DefaultHooks`].
    pub fn new() -> Self {
        Self::with_fallback(Arc::new(DefaultHooks))
    }

    /// Empty registry using `fallback` for unregistered verbs.
    pub fn with_fallback(fallback: Arc<dyn VerbHooks>) -> Self {
        Self {
            hooks: HashMap::new(),
            fallback,
        }
    }

    /// Registers hooks for a verb, replacing any previous registration.
    pub fn register(&mut self, verb: impl Into<String>, hooks: Arc<dyn VerbHooks>) {
        self.hooks.insert(verb.into(), hooks);
    }

    /// Hooks for a verb, or the fallback.
    pub fn resolve(&self, verb: &str) -> &Arc<dyn VerbHooks> {
        self.hooks.get(verb).unwrap_or(&self.fallback)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VerbHooks for HookRegistry {
    fn build_headers(&self, verb: &str) -> Result<HeaderMap> {
        self.resolve(verb).build_headers(verb)
    }

    fn build_body(&self, verb: &str, payload: &Value, verb_attrs: &[(String, String)]) -> Result<String> {
        self.resolve(verb).build_body(verb, payload, verb_attrs)
    }

    fn extract_payload_errors(&self, verb: &str, response: &Response) -> BodyErrors {
        self.resolve(verb).extract_payload_errors(verb, response)
    }
}

/// Generic XML call flavour: `<VerbRequest>` bodies and `<Errors>` extraction.
#[derive(Debug, Clone, Default)]
pub struct XmlHooks {
    /// Escape text when rendering the payload.
    pub escape_xml: bool,
    /// Extra headers sent with every call (site id, compatibility level...).
    pub headers: Vec<(String, String)>,
}

impl XmlHooks {
    pub fn new(escape_xml: bool) -> Self {
        Self {
            escape_xml,
            headers: Vec::new(),
        }
    }

    /// Adds a header sent with every call.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl VerbHooks for XmlHooks {
    fn build_headers(&self, verb: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        headers.insert(
            HeaderName::from_static("x-ebay-api-call-name"),
            header_value(verb)?,
        );
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Configuration(format!("invalid header name {}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }

    fn build_body(&self, verb: &str, payload: &Value, verb_attrs: &[(String, String)]) -> Result<String> {
        xml::check_name(&format!("{}Request", verb))?;

        let mut attrs = String::new();
        for (name, value) in verb_attrs {
            xml::check_name(name)?;
            attrs.push_str(&format!(" {}=\"{}\"", name, quick_xml::escape::escape(value.as_str())));
        }
        let body = xml::to_xml(payload, self.escape_xml)?;

        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><{verb}Request xmlns=\"{ns}\"{attrs}>{body}</{verb}Request>",
            verb = verb,
            ns = XML_NAMESPACE,
            attrs = attrs,
            body = body,
        ))
    }

    fn extract_payload_errors(&self, verb: &str, response: &Response) -> BodyErrors {
        let mut found = BodyErrors::default();

        // An unparsable or empty body yields no payload errors; the transport
        // status is left to report the failure.
        let dom = match response.dom() {
            Ok(dom) => dom,
            Err(e) => {
                debug!("{}: skipping payload error scan: {}", verb, e);
                return found;
            }
        };

        for error in dom.descendants("Errors") {
            let message = error
                .child_text("LongMessage")
                .filter(|m| !m.is_empty())
                .or_else(|| error.child_text("ShortMessage"))
                .unwrap_or_default()
                .to_string();

            if let Some(code) = error.child_text("ErrorCode") {
                found.codes.push(code.to_string());
            }

            match error.child_text("SeverityCode") {
                Some("Warning") => found.warnings.push(message),
                _ => found.errors.push(message),
            }
        }

        found
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Configuration(format!("invalid header value {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{always, eq};
    use serde_json::json;

    const FAILURE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GetItemResponse xmlns="urn:ebay:apis:eBLBaseComponents">
  <Ack>Failure</Ack>
  <Errors>
    <ShortMessage>Invalid ID</ShortMessage>
    <ErrorCode>17</ErrorCode>
    <SeverityCode>Error</SeverityCode>
  </Errors>
  <Errors>
    <ShortMessage>Short</ShortMessage>
    <LongMessage>Deprecated field used.</LongMessage>
    <ErrorCode>21917</ErrorCode>
    <SeverityCode>Warning</SeverityCode>
  </Errors>
</GetItemResponse>"#;

    fn response(body: &str) -> Response {
        Response::new("GetItem", 200, "OK", Vec::new(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_default_hooks_are_empty() {
        let hooks = DefaultHooks;
        assert!(hooks.build_headers("GetItem").unwrap().is_empty());
        assert_eq!(hooks.build_body("GetItem", &json!({"a": 1}), &[]).unwrap(), "");
        assert!(hooks
            .extract_payload_errors("GetItem", &response(FAILURE_XML))
            .is_empty());
    }

    #[test]
    fn test_xml_hooks_headers() {
        let hooks = XmlHooks::new(false).header("X-EBAY-API-SITEID", "0");
        let headers = hooks.build_headers("GetItem").unwrap();
        assert_eq!(headers[CONTENT_TYPE], "text/xml");
        assert_eq!(headers[CALL_NAME_HEADER], "GetItem");
        assert_eq!(headers["X-EBAY-API-SITEID"], "0");
    }

    #[test]
    fn test_xml_hooks_rejects_bad_header_name() {
        let hooks = XmlHooks::new(false).header("bad header", "0");
        assert!(matches!(
            hooks.build_headers("GetItem"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_xml_hooks_body() {
        let hooks = XmlHooks::new(false);
        let body = hooks
            .build_body(
                "findItemsAdvanced",
                &json!({"keywords": "lamp"}),
                &[("version".to_string(), "1.0".to_string())],
            )
            .unwrap();
        assert_eq!(
            body,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <findItemsAdvancedRequest xmlns=\"urn:ebay:apis:eBLBaseComponents\" version=\"1.0\">\
             <keywords>lamp</keywords></findItemsAdvancedRequest>"
        );
    }

    #[test]
    fn test_xml_hooks_body_keeps_payload_order() {
        let hooks = XmlHooks::new(true);
        let body = hooks
            .build_body(
                "AddItem",
                &json!({"Item": {"Title": "Lamp & Shade", "StartPrice": 5, "Country": "US"}}),
                &[],
            )
            .unwrap();
        assert!(body.ends_with(
            "<Item><Title>Lamp &amp; Shade</Title><StartPrice>5</StartPrice>\
             <Country>US</Country></Item></AddItemRequest>"
        ));
    }

    #[test]
    fn test_xml_hooks_body_rejects_invalid_names() {
        let hooks = XmlHooks::default();
        let attrs = [("bad attr".to_string(), "1".to_string())];
        assert!(matches!(
            hooks.build_body("GetItem", &json!({}), &attrs),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            hooks.build_body("Get Item", &json!({}), &[]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            hooks.build_body("GetItem", &json!({"Item ID": "1"}), &[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_xml_hooks_extracts_errors_warnings_and_codes() {
        let hooks = XmlHooks::default();
        let found = hooks.extract_payload_errors("GetItem", &response(FAILURE_XML));
        assert_eq!(found.errors, vec!["Invalid ID"]);
        assert_eq!(found.warnings, vec!["Deprecated field used."]);
        assert_eq!(found.codes, vec!["17", "21917"]);
    }

    #[test]
    fn test_xml_hooks_success_has_no_errors() {
        let hooks = XmlHooks::default();
        let found = hooks.extract_payload_errors(
            "GetItem",
            &response("<GetItemResponse><Ack>Success</Ack></GetItemResponse>"),
        );
        assert!(found.is_empty());
    }

    // Tolerance: a body that cannot be parsed into a DOM reports no payload
    // errors instead of failing the scan.
    #[test]
    fn test_xml_hooks_unparsable_body_reports_nothing() {
        let hooks = XmlHooks::default();
        let found = hooks.extract_payload_errors("GetItem", &response("<GetItemResponse><Errors>"));
        assert!(found.is_empty());

        let found = hooks.extract_payload_errors("GetItem", &response(""));
        assert!(found.is_empty());
    }

    #[test]
    fn test_registry_resolves_by_verb() {
        let mut registry = HookRegistry::new();
        registry.register("GetItem", Arc::new(XmlHooks::default()));

        assert!(registry.hooks.contains_key("GetItem"));
        let headers = registry.build_headers("GetItem").unwrap();
        assert_eq!(headers[CALL_NAME_HEADER], "GetItem");

        // Unregistered verbs use the fallback.
        assert!(registry.build_headers("GetUser").unwrap().is_empty());
        assert!(registry
            .extract_payload_errors("GetUser", &response(FAILURE_XML))
            .is_empty());
    }

    #[test]
    fn test_registry_with_mock_fallback() {
        let mut mock = MockVerbHooks::new();
        mock.expect_extract_payload_errors()
            .with(eq("AddItem"), always())
            .times(1)
            .returning(|_, _| BodyErrors {
                errors: vec!["boom".to_string()],
                ..BodyErrors::default()
            });

        let registry = HookRegistry::with_fallback(Arc::new(mock));
        let found = registry.extract_payload_errors("AddItem", &response(""));
        assert_eq!(found.errors, vec!["boom"]);
    }
}
