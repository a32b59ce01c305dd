//! `DataSourceNode` implementation for `roxmltree` documents.
use crate::datasource::{DataSourceNode, NamespaceBinding, NodeType, QName};
use crate::namespaces::XML_NAMESPACE;
use roxmltree::{Document, Node, ParsingOptions};
use std::hash::{Hash, Hasher};

/// Parses XML text the way every tool in the workspace expects: internal DTD
/// subsets are accepted so that entity declarations in charter exports resolve.
pub fn parse_document(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
}

/// Either a regular tree node or an attribute of an element.
///
/// roxmltree keeps attributes as data on their element rather than as
/// navigable nodes, so an attribute is addressed by its owner and index.
#[derive(Debug, Clone, Copy)]
pub enum XmlNode<'a, 'input> {
    Node(Node<'a, 'input>),
    Attribute { parent: Node<'a, 'input>, index: usize },
}

impl<'a> XmlNode<'a, 'a> {
    /// The root (document) node of a parsed document.
    pub fn root(doc: &'a Document<'a>) -> Self {
        XmlNode::Node(doc.root())
    }

    /// The underlying roxmltree node, `None` for attributes.
    pub fn inner(&self) -> Option<Node<'a, 'a>> {
        match self {
            XmlNode::Node(node) => Some(*node),
            XmlNode::Attribute { .. } => None,
        }
    }

    fn attribute(&self) -> Option<roxmltree::Attribute<'a, 'a>> {
        match self {
            XmlNode::Attribute { parent, index } => parent.attributes().nth(*index),
            XmlNode::Node(_) => None,
        }
    }
}

/// Reads the element prefix straight from the start tag in the source text.
/// roxmltree resolves names to URIs but does not keep the spelling.
fn element_prefix<'a>(node: Node<'a, 'a>) -> Option<&'a str> {
    let tag = node.tag_name();
    let namespace = tag.namespace()?;
    let text = node.document().input_text();
    let start = node.range().start;
    let spelled = text
        .get(start + 1..)
        .map(|rest| {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
                .unwrap_or(rest.len());
            &rest[..end]
        })
        .and_then(|qname| qname.split_once(':'))
        .filter(|(_, local)| *local == tag.name())
        .map(|(prefix, _)| prefix);

    match spelled {
        Some(prefix) if node.lookup_namespace_uri(Some(prefix)) == Some(namespace) => Some(prefix),
        Some(_) => node.lookup_prefix(namespace),
        None if node.lookup_namespace_uri(None) == Some(namespace) => None,
        None => node.lookup_prefix(namespace),
    }
}

impl PartialEq for XmlNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (XmlNode::Node(a), XmlNode::Node(b)) => a.id() == b.id(),
            (
                XmlNode::Attribute { parent: p1, index: i1 },
                XmlNode::Attribute { parent: p2, index: i2 },
            ) => p1.id() == p2.id() && i1 == i2,
            _ => false,
        }
    }
}

impl Eq for XmlNode<'_, '_> {}

impl PartialOrd for XmlNode<'_, '_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_, '_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (XmlNode::Node(a), XmlNode::Node(b)) => a.id().get().cmp(&b.id().get()),
            (
                XmlNode::Attribute { parent: p1, index: i1 },
                XmlNode::Attribute { parent: p2, index: i2 },
            ) => p1.id().get().cmp(&p2.id().get()).then(i1.cmp(i2)),
            // An element precedes its attributes, which precede its children.
            (XmlNode::Node(n), XmlNode::Attribute { parent, .. }) => {
                if n.id() == parent.id() {
                    Ordering::Less
                } else if n.id().get() > parent.id().get() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (XmlNode::Attribute { .. }, XmlNode::Node(_)) => other.cmp(self).reverse(),
        }
    }
}

impl Hash for XmlNode<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            XmlNode::Node(node) => {
                0u8.hash(state);
                node.id().hash(state);
            }
            XmlNode::Attribute { parent, index } => {
                1u8.hash(state);
                parent.id().hash(state);
                index.hash(state);
            }
        }
    }
}

impl<'a> DataSourceNode<'a> for XmlNode<'a, 'a> {
    fn node_type(&self) -> NodeType {
        match self {
            XmlNode::Node(node) => match node.node_type() {
                roxmltree::NodeType::Root => NodeType::Root,
                roxmltree::NodeType::Element => NodeType::Element,
                roxmltree::NodeType::Text => NodeType::Text,
                roxmltree::NodeType::Comment => NodeType::Comment,
                roxmltree::NodeType::PI => NodeType::ProcessingInstruction,
            },
            XmlNode::Attribute { .. } => NodeType::Attribute,
        }
    }

    fn name(&self) -> Option<QName<'a>> {
        match self {
            XmlNode::Node(node) if node.is_element() => {
                let tag = node.tag_name();
                Some(QName {
                    prefix: element_prefix(*node),
                    namespace: tag.namespace(),
                    local_part: tag.name(),
                })
            }
            XmlNode::Node(node) => node.pi().map(|pi| QName {
                prefix: None,
                namespace: None,
                local_part: pi.target,
            }),
            XmlNode::Attribute { parent, .. } => self.attribute().map(|attr| {
                let prefix = match attr.namespace() {
                    Some(XML_NAMESPACE) => Some("xml"),
                    Some(uri) => parent.lookup_prefix(uri),
                    None => None,
                };
                QName {
                    prefix,
                    namespace: attr.namespace(),
                    local_part: attr.name(),
                }
            }),
        }
    }

    fn string_value(&self) -> String {
        match self {
            XmlNode::Node(node) => match node.node_type() {
                roxmltree::NodeType::Root | roxmltree::NodeType::Element => node
                    .descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect(),
                roxmltree::NodeType::Text | roxmltree::NodeType::Comment => {
                    node.text().unwrap_or_default().to_string()
                }
                roxmltree::NodeType::PI => node
                    .pi()
                    .and_then(|pi| pi.value)
                    .unwrap_or_default()
                    .to_string(),
            },
            XmlNode::Attribute { .. } => self
                .attribute()
                .map(|attr| attr.value().to_string())
                .unwrap_or_default(),
        }
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self {
            XmlNode::Node(node) if node.is_element() => {
                let parent = *node;
                let count = node.attributes().len();
                Box::new((0..count).map(move |index| XmlNode::Attribute { parent, index }))
            }
            _ => Box::new(std::iter::empty()),
        }
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self {
            XmlNode::Node(node) => Box::new(node.children().map(XmlNode::Node)),
            XmlNode::Attribute { .. } => Box::new(std::iter::empty()),
        }
    }

    fn parent(&self) -> Option<Self> {
        match self {
            XmlNode::Node(node) => node.parent().map(XmlNode::Node),
            XmlNode::Attribute { parent, .. } => Some(XmlNode::Node(*parent)),
        }
    }

    fn namespaces(&self) -> Vec<NamespaceBinding<'a>> {
        match self {
            XmlNode::Node(node) if node.is_element() => node
                .namespaces()
                .filter(|ns| ns.uri() != XML_NAMESPACE)
                .map(|ns| NamespaceBinding {
                    prefix: ns.name(),
                    uri: ns.uri(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
