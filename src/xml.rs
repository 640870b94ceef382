//! XML structural equality and XPath evaluation.
//!
//! Documents are parsed with `sxd-document`; expressions are evaluated with
//! `sxd-xpath`. Nothing here returns an error for malformed input: callers get
//! `false` or `None` and treat it as a non-match.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value};
use tracing::warn;

const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

/// String literals, or a `prefix:name` qualified name outside them.
static QNAME: OnceLock<Option<Regex>> = OnceLock::new();

fn qname_regex() -> Option<&'static Regex> {
    QNAME
        .get_or_init(|| Regex::new(r#"'[^']*'|"[^"]*"|([A-Za-z_][\w.\-]*):[A-Za-z_*]"#).ok())
        .as_ref()
}

/// Compare two XML documents structurally.
///
/// Element names (namespace and local part), attribute sets, trimmed text and
/// child order must agree. Whitespace-only text, comments, processing
/// instructions and the XML declaration are ignored.
pub fn xml_equals(expected: &str, actual: &str) -> bool {
    let (Ok(expected), Ok(actual)) = (parser::parse(expected), parser::parse(actual)) else {
        return false;
    };
    let expected_doc = expected.as_document();
    let actual_doc = actual.as_document();

    match (
        root_element(expected_doc.root().children()),
        root_element(actual_doc.root().children()),
    ) {
        (Some(e), Some(a)) => elements_equal(e, a),
        _ => false,
    }
}

fn root_element(children: Vec<ChildOfRoot<'_>>) -> Option<Element<'_>> {
    children.into_iter().find_map(|child| match child {
        ChildOfRoot::Element(element) => Some(element),
        _ => None,
    })
}

fn elements_equal(expected: Element<'_>, actual: Element<'_>) -> bool {
    let (en, an) = (expected.name(), actual.name());
    if en.namespace_uri() != an.namespace_uri() || en.local_part() != an.local_part() {
        return false;
    }
    if attribute_set(expected) != attribute_set(actual) {
        return false;
    }

    let expected_children = significant_children(expected);
    let actual_children = significant_children(actual);
    expected_children.len() == actual_children.len()
        && expected_children
            .into_iter()
            .zip(actual_children)
            .all(|pair| match pair {
                (Significant::Element(e), Significant::Element(a)) => elements_equal(e, a),
                (Significant::Text(e), Significant::Text(a)) => e == a,
                _ => false,
            })
}

fn attribute_set(element: Element<'_>) -> BTreeMap<(Option<String>, String), String> {
    element
        .attributes()
        .into_iter()
        .filter(|attr| {
            let name = attr.name();
            name.namespace_uri() != Some(XMLNS_URI) && name.local_part() != "xmlns"
        })
        .map(|attr| {
            let name = attr.name();
            (
                (
                    name.namespace_uri().map(str::to_string),
                    name.local_part().to_string(),
                ),
                attr.value().to_string(),
            )
        })
        .collect()
}

enum Significant<'d> {
    Element(Element<'d>),
    Text(String),
}

/// Child elements and non-blank text runs, with adjacent text merged.
fn significant_children(element: Element<'_>) -> Vec<Significant<'_>> {
    let mut out = Vec::new();
    let mut text = String::new();

    for child in element.children() {
        match child {
            ChildOfElement::Element(e) => {
                flush_text(&mut text, &mut out);
                out.push(Significant::Element(e));
            }
            ChildOfElement::Text(t) => text.push_str(t.text()),
            _ => {}
        }
    }
    flush_text(&mut text, &mut out);
    out
}

fn flush_text<'d>(text: &mut String, out: &mut Vec<Significant<'d>>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(Significant::Text(trimmed.to_string()));
    }
    text.clear();
}

/// Result of evaluating an XPath expression against a document.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathSelection {
    /// Whether the expression selected anything (non-empty node set, `true`,
    /// a non-empty string, or any number).
    pub exists: bool,
    /// Selected values: element nodes as serialized XML, other nodes by their
    /// string value, scalar results in their string form.
    pub values: Vec<String>,
}

/// Check that an XPath expression compiles and that every namespace prefix
/// it uses is bound.
pub fn validate_xpath(
    expression: &str,
    namespaces: &BTreeMap<String, String>,
) -> Result<(), String> {
    match Factory::new().build(expression) {
        Ok(Some(_)) => {}
        Ok(None) => return Err("empty expression".to_string()),
        Err(e) => return Err(format!("{e:?}")),
    }
    match namespace_prefixes(expression)
        .into_iter()
        .find(|prefix| !namespaces.contains_key(prefix))
    {
        Some(prefix) => Err(format!("namespace prefix `{}` is not bound", prefix)),
        None => Ok(()),
    }
}

/// Prefixes of qualified names in `expression`, skipping string literals and
/// `axis::` separators.
fn namespace_prefixes(expression: &str) -> BTreeSet<String> {
    let Some(regex) = qname_regex() else {
        return BTreeSet::new();
    };
    regex
        .captures_iter(expression)
        .filter_map(|caps| caps.get(1))
        .map(|prefix| prefix.as_str().to_string())
        .collect()
}

/// Evaluate `expression` against `body` with the given prefix → URI bindings.
///
/// Returns `None` when the body is not XML or evaluation fails. A panic inside
/// the evaluator is contained and reported as a failed evaluation.
pub fn evaluate_xpath(
    body: &str,
    expression: &str,
    namespaces: &BTreeMap<String, String>,
) -> Option<XPathSelection> {
    let package = parser::parse(body).ok()?;
    let document = package.as_document();
    let xpath = Factory::new().build(expression).ok()??;

    let mut context = Context::new();
    for (prefix, uri) in namespaces {
        context.set_namespace(prefix, uri);
    }

    let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
        xpath.evaluate(&context, document.root())
    }));
    let value = match evaluated {
        Ok(result) => result.ok()?,
        Err(_) => {
            warn!(expression = %expression, "XPath evaluation panicked");
            return None;
        }
    };

    let selection = match value {
        Value::Nodeset(nodes) => {
            let values: Vec<String> = nodes
                .document_order()
                .into_iter()
                .map(render_node)
                .collect();
            XPathSelection {
                exists: !values.is_empty(),
                values,
            }
        }
        Value::Boolean(b) => XPathSelection {
            exists: b,
            values: vec![b.to_string()],
        },
        Value::Number(n) => XPathSelection {
            exists: !n.is_nan(),
            values: vec![format_number(n)],
        },
        Value::String(s) => XPathSelection {
            exists: !s.is_empty(),
            values: vec![s],
        },
    };
    Some(selection)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn render_node(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => serialize_element(element),
        Node::Root(root) => root_element(root.children())
            .map(serialize_element)
            .unwrap_or_default(),
        other => other.string_value(),
    }
}

/// Serialize an element subtree back to XML text.
pub fn serialize_element(element: Element<'_>) -> String {
    let mut out = String::new();
    write_element(element, &mut out);
    out
}

fn write_element(element: Element<'_>, out: &mut String) {
    let name = element.name();
    let prefix = element.preferred_prefix();
    let tag = match (name.namespace_uri(), prefix) {
        (Some(_), Some(prefix)) => format!("{}:{}", prefix, name.local_part()),
        _ => name.local_part().to_string(),
    };

    out.push('<');
    out.push_str(&tag);
    if let Some(uri) = name.namespace_uri() {
        match prefix {
            Some(prefix) => out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape(uri))),
            None => out.push_str(&format!(" xmlns=\"{}\"", escape(uri))),
        }
    }
    for attr in element.attributes() {
        let attr_name = attr.name();
        if attr_name.namespace_uri() == Some(XMLNS_URI) {
            continue;
        }
        out.push_str(&format!(
            " {}=\"{}\"",
            attr_name.local_part(),
            escape(attr.value())
        ));
    }

    let children = element.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in children {
        match child {
            ChildOfElement::Element(e) => write_element(e, out),
            ChildOfElement::Text(t) => out.push_str(&escape(t.text())),
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_namespaces() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_xml_equals_identical() {
        assert!(xml_equals(
            "<message>Hello World!</message>",
            "<message>Hello World!</message>"
        ));
        assert!(!xml_equals(
            "<message>Hello World!</message>",
            "<message>Goodbye</message>"
        ));
    }

    #[test]
    fn test_xml_equals_ignores_declaration_and_whitespace() {
        let expected = "<message><name>Petri</name><text>Hello</text></message>";
        let actual = r#"<?xml version="1.0" encoding="UTF-8"?>
<message>
    <name>Petri</name>
    <text>Hello</text>
</message>"#;
        assert!(xml_equals(expected, actual));
    }

    #[test]
    fn test_xml_equals_attribute_order_insensitive() {
        assert!(xml_equals(
            r#"<item id="1" kind="a"/>"#,
            r#"<item kind="a" id="1"></item>"#
        ));
        assert!(!xml_equals(r#"<item id="1"/>"#, r#"<item id="2"/>"#));
    }

    #[test]
    fn test_xml_equals_element_order_sensitive() {
        assert!(!xml_equals(
            "<m><a/><b/></m>",
            "<m><b/><a/></m>"
        ));
    }

    #[test]
    fn test_xml_equals_malformed() {
        assert!(!xml_equals("<message>", "<message></message>"));
        assert!(!xml_equals("<message/>", "not xml"));
    }

    #[test]
    fn test_xpath_exists() {
        let body = "<message>Hello World!</message>";
        let selection = evaluate_xpath(body, "/message", &no_namespaces()).unwrap();
        assert!(selection.exists);

        let selection = evaluate_xpath(body, "/missing", &no_namespaces()).unwrap();
        assert!(!selection.exists);
    }

    #[test]
    fn test_xpath_predicates() {
        let body = "<message>Hello World!</message>";
        let selection =
            evaluate_xpath(body, "/message[text()='Hello World!']", &no_namespaces()).unwrap();
        assert!(selection.exists);

        let body = "<messages><message>Hello World!</message></messages>";
        let selection =
            evaluate_xpath(body, "/messages[count(message)=1]", &no_namespaces()).unwrap();
        assert!(selection.exists);
        let selection =
            evaluate_xpath(body, "/messages[count(message)=2]", &no_namespaces()).unwrap();
        assert!(!selection.exists);
    }

    #[test]
    fn test_xpath_text_value() {
        let body = "<message>Hello World!</message>";
        let selection = evaluate_xpath(body, "/message/text()", &no_namespaces()).unwrap();
        assert_eq!(selection.values, vec!["Hello World!".to_string()]);
    }

    #[test]
    fn test_xpath_element_serialized() {
        let body = "<message><name>Petri</name><text>Hello World!</text></message>";
        let selection = evaluate_xpath(body, "/message/name", &no_namespaces()).unwrap();
        assert_eq!(selection.values, vec!["<name>Petri</name>".to_string()]);
        assert!(xml_equals("<name>Petri</name>", &selection.values[0]));
    }

    #[test]
    fn test_xpath_with_namespaces() {
        let body = r#"<sample:message xmlns:sample="http://www.example.com">Hello World!</sample:message>"#;
        let mut namespaces = BTreeMap::new();
        namespaces.insert("sample".to_string(), "http://www.example.com".to_string());

        let selection = evaluate_xpath(
            body,
            "/sample:message[text()='Hello World!']",
            &namespaces,
        )
        .unwrap();
        assert!(selection.exists);

        // An unbound prefix is a failed evaluation, not a crash.
        assert_eq!(evaluate_xpath(body, "/sample:message", &no_namespaces()), None);
    }

    #[test]
    fn test_xpath_attribute_and_scalar() {
        let body = r#"<item id="123">Content</item>"#;
        let selection = evaluate_xpath(body, "/item/@id", &no_namespaces()).unwrap();
        assert_eq!(selection.values, vec!["123".to_string()]);

        let selection = evaluate_xpath(body, "count(/item)", &no_namespaces()).unwrap();
        assert_eq!(selection.values, vec!["1".to_string()]);
    }

    #[test]
    fn test_xpath_malformed_body() {
        assert_eq!(evaluate_xpath("not xml", "/message", &no_namespaces()), None);
    }

    #[test]
    fn test_validate_xpath() {
        assert!(validate_xpath("/message[text()='x']", &no_namespaces()).is_ok());
        assert!(validate_xpath("/message[", &no_namespaces()).is_err());
    }

    #[test]
    fn test_validate_xpath_requires_bound_prefixes() {
        let err = validate_xpath("/sample:message", &no_namespaces()).unwrap_err();
        assert!(err.contains("`sample`"));

        let mut namespaces = BTreeMap::new();
        namespaces.insert("sample".to_string(), "http://www.example.com".to_string());
        assert!(validate_xpath("/sample:message/@sample:id", &namespaces).is_ok());

        // Axes and literals are not prefixes.
        assert!(validate_xpath("/child::message[text()='a:b']", &no_namespaces()).is_ok());
    }
}
