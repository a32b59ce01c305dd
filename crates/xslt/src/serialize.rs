//! Writes a `ResultDocument` as XML (or plain text) with `quick-xml`.
//!
//! The result tree records namespaces per name rather than as declarations, so
//! the writer performs namespace fixup: it declares whatever binding a name
//! needs and is not already in scope, and never repeats one that is.

use crate::ast::{OutputMethod, OutputSettings};
use crate::error::XsltError;
use crate::result::{ResultDocument, ResultElement, ResultName, ResultNode};
use cei2tei_xpath1::namespaces::XML_NAMESPACE;
use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use std::borrow::Cow;

const INDENT: &str = "  ";

/// Serializes a result document according to its output settings.
pub fn serialize(doc: &ResultDocument) -> Result<Vec<u8>, XsltError> {
    if doc.output.method == OutputMethod::Text {
        return Ok(doc.text_content().into_bytes());
    }
    let mut serializer = Serializer::new(&doc.output);
    serializer.write_prolog(doc)?;
    serializer.write_top_level(&doc.nodes)?;
    Ok(serializer.finish())
}

pub fn serialize_to_string(doc: &ResultDocument) -> Result<String, XsltError> {
    let bytes = serialize(doc)?;
    String::from_utf8(bytes).map_err(|e| XsltError::Serialize(e.to_string()))
}

fn write_error(e: impl std::fmt::Display) -> XsltError {
    XsltError::Serialize(e.to_string())
}

/// A namespace declaration: `None` is the default namespace, an empty URI
/// undeclares it.
type Declaration = (Option<String>, String);

struct Serializer<'o> {
    writer: Writer<Vec<u8>>,
    output: &'o OutputSettings,
    /// Declarations made by each open element, outermost first.
    scopes: Vec<Vec<Declaration>>,
}

impl<'o> Serializer<'o> {
    fn new(output: &'o OutputSettings) -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            output,
            scopes: Vec::new(),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    fn write_event(&mut self, event: Event<'_>) -> Result<(), XsltError> {
        self.writer.write_event(event).map_err(write_error)
    }

    fn write_raw_text(&mut self, text: &str) -> Result<(), XsltError> {
        self.write_event(Event::Text(BytesText::from_escaped(text)))
    }

    fn write_prolog(&mut self, doc: &ResultDocument) -> Result<(), XsltError> {
        if !self.output.omit_xml_declaration {
            let standalone = self.output.standalone.map(|s| if s { "yes" } else { "no" });
            self.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), standalone)))?;
            self.write_raw_text("\n")?;
        }
        if let Some(system) = &self.output.doctype_system {
            let root = doc
                .document_element()
                .map(|e| e.name.to_string())
                .unwrap_or_default();
            let doctype = match &self.output.doctype_public {
                Some(public) => format!("{} PUBLIC \"{}\" \"{}\"", root, public, system),
                None => format!("{} SYSTEM \"{}\"", root, system),
            };
            self.write_event(Event::DocType(BytesText::from_escaped(doctype)))?;
            self.write_raw_text("\n")?;
        }
        Ok(())
    }

    fn write_top_level(&mut self, nodes: &[ResultNode]) -> Result<(), XsltError> {
        let mut first = true;
        for node in nodes {
            if self.output.indent {
                if matches!(node, ResultNode::Text(t) if t.trim().is_empty()) {
                    continue;
                }
                if !first && !matches!(node, ResultNode::Text(_)) {
                    self.write_raw_text("\n")?;
                }
            }
            self.write_node(node, 0, self.output.indent)?;
            first = false;
        }
        if nodes.iter().any(|n| matches!(n, ResultNode::Element(_))) {
            self.write_raw_text("\n")?;
        }
        Ok(())
    }

    fn write_node(&mut self, node: &ResultNode, depth: usize, indent: bool) -> Result<(), XsltError> {
        match node {
            ResultNode::Element(element) => self.write_element(element, depth, indent),
            ResultNode::Text(text) => {
                let escaped = partial_escape(text.as_str());
                self.write_event(Event::Text(BytesText::from_escaped(escaped)))
            }
            ResultNode::Comment(text) => {
                self.write_event(Event::Comment(BytesText::from_escaped(sanitize_comment(text))))
            }
            ResultNode::ProcessingInstruction { target, data } => {
                let content = if data.is_empty() {
                    target.clone()
                } else {
                    format!("{} {}", target, data.replace("?>", "? >"))
                };
                self.write_event(Event::PI(BytesPI::new(content)))
            }
        }
    }

    fn write_element(
        &mut self,
        element: &ResultElement,
        depth: usize,
        indent: bool,
    ) -> Result<(), XsltError> {
        let mut declarations: Vec<Declaration> = Vec::new();
        let tag = self.element_name(&element.name, &mut declarations);
        for (prefix, uri) in &element.namespaces {
            if prefix.as_deref() == Some("xml")
                || declarations.iter().any(|(p, _)| p == prefix)
            {
                continue;
            }
            if self.lookup(prefix.as_deref(), &declarations) != Some(uri.as_str()) {
                declarations.push((prefix.clone(), uri.clone()));
            }
        }
        let attributes: Vec<(String, &str)> = element
            .attributes
            .iter()
            .map(|(name, value)| (self.attribute_name(name, &mut declarations), value.as_str()))
            .collect();

        let mut start = BytesStart::new(tag.as_str());
        for (prefix, uri) in &declarations {
            let key = match prefix {
                Some(prefix) => format!("xmlns:{}", prefix),
                None => "xmlns".to_string(),
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        for (name, value) in &attributes {
            start.push_attribute(Attribute {
                key: QName(name.as_bytes()),
                value: Cow::Owned(escape_attribute(value).into_bytes()),
            });
        }

        let children: Vec<&ResultNode> = element
            .children
            .iter()
            .filter(|c| !matches!(c, ResultNode::Text(t) if t.is_empty()))
            .collect();
        if children.is_empty() {
            return self.write_event(Event::Empty(start));
        }

        // Whitespace is only added where it cannot change a string value.
        let element_only = children.iter().any(|c| !matches!(c, ResultNode::Text(_)))
            && children
                .iter()
                .all(|c| !matches!(c, ResultNode::Text(t) if !t.trim().is_empty()));
        let indent_children = indent && element_only && !preserves_space(element);

        self.write_event(Event::Start(start))?;
        self.scopes.push(declarations);
        for child in children {
            if indent_children {
                if matches!(child, ResultNode::Text(_)) {
                    continue;
                }
                self.write_raw_text(&format!("\n{}", INDENT.repeat(depth + 1)))?;
            }
            self.write_node(child, depth + 1, indent_children)?;
        }
        self.scopes.pop();
        if indent_children {
            self.write_raw_text(&format!("\n{}", INDENT.repeat(depth)))?;
        }
        self.write_event(Event::End(BytesEnd::new(tag.as_str())))
    }

    /// The URI bound to `prefix`, looking at the pending declarations first.
    /// An undeclared default namespace reads as `None`.
    fn lookup<'b>(&'b self, prefix: Option<&str>, pending: &'b [Declaration]) -> Option<&'b str> {
        pending
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|scope| scope.iter().rev()))
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    fn element_name(&self, name: &ResultName, declarations: &mut Vec<Declaration>) -> String {
        let Some(uri) = name.namespace.as_deref() else {
            if self.lookup(None, declarations).is_some() {
                declarations.push((None, String::new()));
            }
            return name.local.clone();
        };
        if uri == XML_NAMESPACE {
            return format!("xml:{}", name.local);
        }
        let prefix = name.prefix.clone();
        if self.lookup(prefix.as_deref(), declarations) == Some(uri) {
            return name.to_string();
        }
        let prefix = match prefix {
            Some(p) if self.is_free(&p, declarations) => Some(p),
            Some(_) => Some(self.fresh_prefix(declarations)),
            None => None,
        };
        declarations.push((prefix.clone(), uri.to_string()));
        qualified(prefix.as_deref(), &name.local)
    }

    /// Attributes need a prefix to be in a namespace; reuse one already bound
    /// to the URI when there is one.
    fn attribute_name(&self, name: &ResultName, declarations: &mut Vec<Declaration>) -> String {
        let Some(uri) = name.namespace.as_deref() else {
            return name.local.clone();
        };
        if uri == XML_NAMESPACE {
            return format!("xml:{}", name.local);
        }
        if let Some(prefix) = name.prefix.as_deref()
            && self.lookup(Some(prefix), declarations) == Some(uri)
        {
            return qualified(Some(prefix), &name.local);
        }
        if let Some(prefix) = self.prefix_for(uri, declarations) {
            return qualified(Some(&prefix), &name.local);
        }
        let prefix = match name.prefix.clone() {
            Some(p) if self.is_free(&p, declarations) => p,
            _ => self.fresh_prefix(declarations),
        };
        declarations.push((Some(prefix.clone()), uri.to_string()));
        qualified(Some(&prefix), &name.local)
    }

    /// A non-default prefix currently bound to `uri`.
    fn prefix_for(&self, uri: &str, pending: &[Declaration]) -> Option<String> {
        pending
            .iter()
            .chain(self.scopes.iter().flatten())
            .filter_map(|(p, u)| p.as_deref().filter(|_| u == uri))
            .find(|p| self.lookup(Some(*p), pending) == Some(uri))
            .map(str::to_string)
    }

    /// A prefix may be declared on this element unless it already is.
    fn is_free(&self, prefix: &str, pending: &[Declaration]) -> bool {
        !pending.iter().any(|(p, _)| p.as_deref() == Some(prefix))
    }

    fn fresh_prefix(&self, pending: &[Declaration]) -> String {
        (0..)
            .map(|i| format!("ns{}", i))
            .find(|p| self.lookup(Some(p.as_str()), pending).is_none())
            .unwrap_or_default()
    }
}

/// `xml:space="preserve"` turns indentation off for the whole subtree.
fn preserves_space(element: &ResultElement) -> bool {
    element.attributes.iter().any(|(name, value)| {
        name.namespace.as_deref() == Some(XML_NAMESPACE) && name.local == "space" && value == "preserve"
    })
}

/// Escapes an attribute value. Tabs and line breaks become character
/// references so attribute-value normalization leaves them intact.
fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c => out.push(c),
        }
    }
    out
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

/// Comments may not contain `--` or end with `-`.
fn sanitize_comment(text: &str) -> String {
    let mut out = text.replace("--", "- -");
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: ResultName, children: Vec<ResultNode>) -> ResultNode {
        let mut e = ResultElement::new(name);
        e.children = children;
        ResultNode::Element(e)
    }

    fn document(nodes: Vec<ResultNode>, indent: bool) -> ResultDocument {
        ResultDocument {
            output: OutputSettings {
                indent,
                ..OutputSettings::default()
            },
            nodes,
        }
    }

    const TEI: &str = "http://www.tei-c.org/ns/1.0";

    #[test]
    fn test_declares_namespaces_once() {
        let div = element(
            ResultName::namespaced(None, Some(TEI), "div"),
            vec![ResultNode::Text("x < y".to_string())],
        );
        let doc = document(vec![element(ResultName::namespaced(None, Some(TEI), "TEI"), vec![div])], false);
        let out = serialize_to_string(&doc).unwrap();
        assert_eq!(
            out,
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<TEI xmlns=\"{TEI}\"><div>x &lt; y</div></TEI>\n"
            )
        );
    }

    #[test]
    fn test_indents_element_only_content() {
        let p = element(
            ResultName::new("p"),
            vec![
                ResultNode::Text("a ".to_string()),
                element(ResultName::new("hi"), vec![ResultNode::Text("b".to_string())]),
            ],
        );
        let doc = document(vec![element(ResultName::new("body"), vec![p])], true);
        let out = serialize_to_string(&doc).unwrap();
        assert!(out.ends_with("<body>\n  <p>a <hi>b</hi></p>\n</body>\n"), "{}", out);
    }

    #[test]
    fn test_unprefixed_element_undeclares_default_namespace() {
        let inner = element(ResultName::new("plain"), vec![]);
        let doc = document(vec![element(ResultName::namespaced(None, Some(TEI), "TEI"), vec![inner])], false);
        let out = serialize_to_string(&doc).unwrap();
        assert!(out.contains("<plain xmlns=\"\"/>"), "{}", out);
    }

    #[test]
    fn test_namespaced_attribute_gets_a_prefix() {
        let mut e = ResultElement::new(ResultName::new("a"));
        e.attributes
            .push((ResultName::namespaced(None, Some("urn:x"), "k"), "v".to_string()));
        let doc = ResultDocument {
            output: OutputSettings {
                omit_xml_declaration: true,
                ..OutputSettings::default()
            },
            nodes: vec![ResultNode::Element(e)],
        };
        let out = serialize_to_string(&doc).unwrap();
        assert_eq!(out, "<a xmlns:ns0=\"urn:x\" ns0:k=\"v\"/>\n");
    }

    #[test]
    fn test_attribute_whitespace_survives_reparsing() {
        let mut e = ResultElement::new(ResultName::new("a"));
        e.attributes
            .push((ResultName::new("t"), "l1\nl2\tx\r\"q\" <&>".to_string()));
        let doc = document(vec![ResultNode::Element(e)], false);
        let out = serialize_to_string(&doc).unwrap();
        assert!(
            out.contains("t=\"l1&#10;l2&#9;x&#13;&quot;q&quot; &lt;&amp;&gt;\""),
            "{}",
            out
        );

        let parsed = roxmltree::Document::parse(&out).unwrap();
        assert_eq!(
            parsed.root_element().attribute("t"),
            Some("l1\nl2\tx\r\"q\" <&>")
        );
    }

    #[test]
    fn test_preserved_space_is_not_reindented() {
        let mut a = ResultElement::new(ResultName::new("a"));
        a.attributes.push((
            ResultName::namespaced(Some("xml"), Some(XML_NAMESPACE), "space"),
            "preserve".to_string(),
        ));
        a.children = vec![element(
            ResultName::new("b"),
            vec![element(ResultName::new("c"), vec![])],
        )];
        let doc = document(
            vec![element(ResultName::new("root"), vec![ResultNode::Element(a)])],
            true,
        );
        let out = serialize_to_string(&doc).unwrap();
        assert!(
            out.contains("<a xml:space=\"preserve\"><b><c/></b></a>"),
            "{}",
            out
        );
        assert!(out.contains("<root>\n  <a"), "{}", out);
    }

    #[test]
    fn test_comment_is_sanitized_and_text_method() {
        assert_eq!(sanitize_comment("a--b-"), "a- -b- ");
        let doc = ResultDocument {
            output: OutputSettings {
                method: OutputMethod::Text,
                ..OutputSettings::default()
            },
            nodes: vec![element(ResultName::new("a"), vec![ResultNode::Text("<t>".to_string())])],
        };
        assert_eq!(serialize(&doc).unwrap(), b"<t>".to_vec());
    }
}
