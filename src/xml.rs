//! XML element tree used as the canonical parsed form of API responses.
//!
//! - [`parse`] turns a document into a [`Node`] tree with namespaces stripped
//! - [`Node::to_value`] projects a tree into a `serde_json::Value` dictionary
//! - [`to_xml`] renders a JSON payload as request XML

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A parsed XML element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All descendants (depth first, document order) with the given name.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Node> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Node>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// Text of the first direct child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Projects the element into `{name: value}`.
    ///
    /// Paths in `list_nodes` are dotted, lowercase element paths starting at
    /// this element (e.g. `getitemresponse.item.variations`); elements found at
    /// those paths are always rendered as arrays.
    pub fn to_value(&self, list_nodes: &[String]) -> Value {
        let path = self.name.to_lowercase();
        let mut root = Map::new();
        root.insert(self.name.clone(), self.body_value(&path, list_nodes));
        Value::Object(root)
    }

    fn body_value(&self, path: &str, list_nodes: &[String]) -> Value {
        if self.children.is_empty() && self.attributes.is_empty() {
            return if self.text.is_empty() {
                Value::Null
            } else {
                Value::String(self.text.clone())
            };
        }

        // Group repeated children while keeping first-appearance order.
        let mut groups: Vec<(&str, Vec<Value>)> = Vec::new();
        for child in &self.children {
            let child_path = format!("{}.{}", path, child.name.to_lowercase());
            let value = child.body_value(&child_path, list_nodes);
            match groups.iter_mut().find(|(name, _)| *name == child.name) {
                Some((_, values)) => values.push(value),
                None => groups.push((&child.name, vec![value])),
            }
        }

        let mut map = Map::new();
        for (name, mut values) in groups {
            let child_path = format!("{}.{}", path, name.to_lowercase());
            let is_list = list_nodes
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&child_path));
            let value = if values.len() == 1 && !is_list {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            map.insert(name.to_string(), value);
        }

        for (key, value) in &self.attributes {
            map.insert(format!("_{}", key), Value::String(value.clone()));
        }

        if !self.text.is_empty() {
            map.insert("value".to_string(), Value::String(self.text.clone()));
        }

        Value::Object(map)
    }
}

fn local_name(bytes: &[u8]) -> String {
    let name = String::from_utf8_lossy(bytes);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn start_node(start: &BytesStart) -> Result<Node> {
    let mut node = Node::new(local_name(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Parse(e.to_string()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Parse(e.to_string()))?;
        node.attributes.push((local_name(key), value.into_owned()));
    }
    Ok(node)
}

/// Parses an XML document into its root element.
pub fn parse(content: &[u8]) -> Result<Node> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::Parse(format!(
                "invalid XML at position {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(start) => stack.push(start_node(&start)?),
            Event::Empty(start) => {
                let node = start_node(&start)?;
                attach(node, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| Error::Parse("unexpected closing tag".to_string()))?;
                attach(node, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text.unescape().map_err(|e| Error::Parse(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::Parse(format!(
            "unclosed element <{}>",
            stack[stack.len() - 1].name
        )));
    }

    root.ok_or_else(|| Error::Parse("document has no root element".to_string()))
}

fn attach(node: Node, stack: &mut [Node], root: &mut Option<Node>) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(Error::Parse("multiple root elements".to_string())),
    }
    Ok(())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rejects strings that cannot be used as an XML element or attribute name.
pub fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_' || first == ':')
                && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!("invalid XML name {:?}", name)))
    }
}

/// Renders a JSON payload as XML elements, in the payload's key order.
///
/// Object keys become elements and arrays repeat their key. Inside an object,
/// `@attrs` supplies attributes and `#text` the element text, so
/// `{"ItemID": {"@attrs": {"currencyID": "USD"}, "#text": "1"}}` renders as
/// `<ItemID currencyID="USD">1</ItemID>`.
pub fn to_xml(payload: &Value, escape_text: bool) -> Result<String> {
    let mut out = String::new();
    if let Value::Object(map) = payload {
        for (key, value) in map {
            write_element(&mut out, key, value, escape_text)?;
        }
    } else {
        out.push_str(&render_text(&scalar_text(payload), escape_text));
    }
    Ok(out)
}

fn render_text(text: &str, escape_text: bool) -> String {
    if escape_text {
        escape(text).into_owned()
    } else {
        text.to_string()
    }
}

fn write_element(out: &mut String, key: &str, value: &Value, escape_text: bool) -> Result<()> {
    if let Value::Array(items) = value {
        for item in items {
            write_element(out, key, item, escape_text)?;
        }
        return Ok(());
    }

    check_name(key)?;
    match value {
        Value::Object(map) => {
            out.push('<');
            out.push_str(key);
            if let Some(Value::Object(attrs)) = map.get("@attrs") {
                for (name, attr) in attrs {
                    check_name(name)?;
                    out.push_str(&format!(
                        " {}=\"{}\"",
                        name,
                        escape(scalar_text(attr).as_str())
                    ));
                }
            }
            out.push('>');
            if let Some(text) = map.get("#text") {
                out.push_str(&render_text(&scalar_text(text), escape_text));
            }
            for (child, child_value) in map {
                if child == "@attrs" || child == "#text" {
                    continue;
                }
                write_element(out, child, child_value, escape_text)?;
            }
            out.push_str(&format!("</{}>", key));
        }
        scalar => {
            out.push_str(&format!(
                "<{key}>{}</{key}>",
                render_text(&scalar_text(scalar), escape_text)
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ITEM_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GetItemResponse xmlns="urn:ebay:apis:eBLBaseComponents">
  <Ack>Success</Ack>
  <Item>
    <ItemID>110</ItemID>
    <Price currencyID="USD">9.99</Price>
    <Variations>
      <SKU>A</SKU>
    </Variations>
    <Picture>one.jpg</Picture>
    <Picture>two.jpg</Picture>
    <Empty/>
  </Item>
</GetItemResponse>"#;

    #[test]
    fn test_parse_strips_namespaces() {
        let root = parse(ITEM_RESPONSE.as_bytes()).unwrap();
        assert_eq!(root.name, "GetItemResponse");
        assert!(root.attributes.is_empty());
        assert_eq!(root.child_text("Ack"), Some("Success"));

        let item = root.child("Item").unwrap();
        assert_eq!(item.child_text("ItemID"), Some("110"));
        assert_eq!(item.child("Price").unwrap().attribute("currencyID"), Some("USD"));
        assert_eq!(item.descendants("Picture").len(), 2);
    }

    #[test]
    fn test_parse_prefixed_elements() {
        let root = parse(br#"<soap:Envelope xmlns:soap="x"><soap:Body>hi</soap:Body></soap:Envelope>"#)
            .unwrap();
        assert_eq!(root.name, "Envelope");
        assert_eq!(root.child_text("Body"), Some("hi"));
    }

    #[test]
    fn test_parse_unescapes_text_and_cdata() {
        let root = parse(b"<R><A>a &amp; b</A><B><![CDATA[<raw>]]></B></R>").unwrap();
        assert_eq!(root.child_text("A"), Some("a & b"));
        assert_eq!(root.child_text("B"), Some("<raw>"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse(b"<R><A></R>"), Err(Error::Parse(_))));
        assert!(matches!(parse(b"<R><A>"), Err(Error::Parse(_))));
        assert!(matches!(parse(b"just text"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_to_value_shapes() {
        let root = parse(ITEM_RESPONSE.as_bytes()).unwrap();
        let value = root.to_value(&[]);

        assert_eq!(
            value,
            json!({
                "GetItemResponse": {
                    "Ack": "Success",
                    "Item": {
                        "ItemID": "110",
                        "Price": {"_currencyID": "USD", "value": "9.99"},
                        "Variations": {"SKU": "A"},
                        "Picture": ["one.jpg", "two.jpg"],
                        "Empty": null
                    }
                }
            })
        );
    }

    #[test]
    fn test_to_value_keeps_document_order() {
        let root = parse(br#"<R><Zeta>1</Zeta><Alpha>2</Alpha><Mid a="x">3</Mid></R>"#).unwrap();
        assert_eq!(
            serde_json::to_string(&root.to_value(&[])).unwrap(),
            r#"{"R":{"Zeta":"1","Alpha":"2","Mid":{"_a":"x","value":"3"}}}"#
        );
    }

    #[test]
    fn test_to_value_list_nodes_force_arrays() {
        let root = parse(ITEM_RESPONSE.as_bytes()).unwrap();
        let list_nodes = vec![
            "getitemresponse.item.variations".to_string(),
            "GetItemResponse.Item.ItemID".to_string(),
        ];
        let value = root.to_value(&list_nodes);

        let item = &value["GetItemResponse"]["Item"];
        assert_eq!(item["Variations"], json!([{"SKU": "A"}]));
        assert_eq!(item["ItemID"], json!(["110"]));
        assert_eq!(item["Picture"], json!(["one.jpg", "two.jpg"]));
    }

    #[test]
    fn test_to_xml_nested_and_repeated() {
        let payload = json!({
            "Item": {
                "Title": "Lamp",
                "PictureURL": ["a.jpg", "b.jpg"],
                "StartPrice": {"@attrs": {"currencyID": "USD"}, "#text": 5}
            }
        });
        assert_eq!(
            to_xml(&payload, false).unwrap(),
            "<Item><Title>Lamp</Title><PictureURL>a.jpg</PictureURL><PictureURL>b.jpg</PictureURL>\
             <StartPrice currencyID=\"USD\">5</StartPrice></Item>"
        );
    }

    #[test]
    fn test_to_xml_keeps_payload_key_order() {
        let payload: Value =
            serde_json::from_str(r#"{"Item": {"Title": "Lamp", "Description": "d", "Country": "US"}}"#)
                .unwrap();
        assert_eq!(
            to_xml(&payload, false).unwrap(),
            "<Item><Title>Lamp</Title><Description>d</Description><Country>US</Country></Item>"
        );
    }

    #[test]
    fn test_to_xml_rejects_invalid_names() {
        for payload in [
            json!({"a b": "x"}),
            json!({"<x": "x"}),
            json!({"1st": "x"}),
            json!({"Item": {"": "x"}}),
            json!({"Price": {"@attrs": {"bad attr": "USD"}, "#text": 1}}),
            json!({"List": [{"ok": 1}, {"no way": 2}]}),
        ] {
            assert!(
                matches!(to_xml(&payload, false), Err(Error::Configuration(_))),
                "accepted {}",
                payload
            );
        }
    }

    #[test]
    fn test_check_name_accepts_xml_names() {
        for name in ["ItemID", "_private", "ns:Item", "item-id.v2", "Prixé"] {
            assert!(check_name(name).is_ok(), "rejected {}", name);
        }
    }

    #[test]
    fn test_to_xml_escaping_is_optional() {
        let payload = json!({"Title": "Tom & Jerry"});
        assert_eq!(to_xml(&payload, false).unwrap(), "<Title>Tom & Jerry</Title>");
        assert_eq!(to_xml(&payload, true).unwrap(), "<Title>Tom &amp; Jerry</Title>");
    }
}
