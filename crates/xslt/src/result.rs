//! The result tree produced by a transformation.

use crate::ast::OutputSettings;
use crate::error::ExecutionError;
use crate::output::OutputBuilder;
use cei2tei_xpath1::QName;
use std::fmt;

/// An element or attribute name in the result tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultName {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub local: String,
}

impl ResultName {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            namespace: None,
            local: local.into(),
        }
    }

    pub fn namespaced(
        prefix: Option<&str>,
        namespace: Option<&str>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            namespace: namespace.map(str::to_string),
            local: local.into(),
        }
    }

    /// Same expanded name (namespace and local part), prefixes ignored.
    pub fn same_as(&self, other: &ResultName) -> bool {
        self.local == other.local && self.namespace == other.namespace
    }
}

impl From<QName<'_>> for ResultName {
    fn from(q: QName<'_>) -> Self {
        ResultName::namespaced(q.prefix, q.namespace, q.local_part)
    }
}

impl fmt::Display for ResultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultElement {
    pub name: ResultName,
    /// Namespace nodes: `None` is the default namespace.
    pub namespaces: Vec<(Option<String>, String)>,
    pub attributes: Vec<(ResultName, String)>,
    pub children: Vec<ResultNode>,
}

impl ResultElement {
    pub fn new(name: ResultName) -> Self {
        Self {
            name,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.namespace.is_none() && name.local == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &ResultElement> {
        self.children.iter().filter_map(|c| match c {
            ResultNode::Element(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultNode {
    Element(ResultElement),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

impl ResultNode {
    /// Concatenated descendant text, as XPath would see it.
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            ResultNode::Element(e) => e.children.iter().for_each(|c| c.collect_text(out)),
            ResultNode::Text(t) => out.push_str(t),
            ResultNode::Comment(_) | ResultNode::ProcessingInstruction { .. } => {}
        }
    }
}

/// The complete output of one transformation, ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDocument {
    pub output: OutputSettings,
    pub nodes: Vec<ResultNode>,
}

impl ResultDocument {
    /// The first top-level element, if any.
    pub fn document_element(&self) -> Option<&ResultElement> {
        self.nodes.iter().find_map(|n| match n {
            ResultNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn text_content(&self) -> String {
        self.nodes.iter().map(ResultNode::string_value).collect()
    }
}

/// Builds an in-memory result tree. Also used for result tree fragments
/// and for the text of `xsl:attribute`, `xsl:comment` and friends.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<ResultElement>,
    nodes: Vec<ResultNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes any element still open and returns the top-level nodes.
    pub fn into_nodes(mut self) -> Vec<ResultNode> {
        while !self.stack.is_empty() {
            self.end_element();
        }
        self.nodes
    }

    pub fn into_text(self) -> String {
        self.into_nodes().iter().map(ResultNode::string_value).collect()
    }

    fn push_node(&mut self, node: ResultNode) {
        match self.stack.last_mut() {
            Some(element) => element.children.push(node),
            None => self.nodes.push(node),
        }
    }
}

impl OutputBuilder for TreeBuilder {
    fn start_element(&mut self, name: ResultName) {
        self.stack.push(ResultElement::new(name));
    }

    fn end_element(&mut self) {
        if let Some(element) = self.stack.pop() {
            self.push_node(ResultNode::Element(element));
        }
    }

    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        if let Some(element) = self.stack.last_mut() {
            let prefix = prefix.map(str::to_string);
            if !element.namespaces.iter().any(|(p, _)| *p == prefix) {
                element.namespaces.push((prefix, uri.to_string()));
            }
        }
    }

    fn add_attribute(&mut self, name: ResultName, value: &str) -> Result<(), ExecutionError> {
        let Some(element) = self.stack.last_mut() else {
            return Err(ExecutionError::Execution(format!(
                "attribute '{}' created outside of an element",
                name
            )));
        };
        if !element.children.is_empty() {
            return Err(ExecutionError::Execution(format!(
                "attribute '{}' added to <{}> after its children",
                name, element.name
            )));
        }
        match element.attributes.iter_mut().find(|(n, _)| n.same_as(&name)) {
            Some(existing) => existing.1 = value.to_string(),
            None => element.attributes.push((name, value.to_string())),
        }
        Ok(())
    }

    fn add_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let siblings = match self.stack.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.nodes,
        };
        match siblings.last_mut() {
            Some(ResultNode::Text(existing)) => existing.push_str(text),
            _ => siblings.push(ResultNode::Text(text.to_string())),
        }
    }

    fn add_comment(&mut self, text: &str) {
        self.push_node(ResultNode::Comment(text.to_string()));
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) {
        self.push_node(ResultNode::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
    }
}
