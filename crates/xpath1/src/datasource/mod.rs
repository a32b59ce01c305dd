//! Defines the core abstraction for a navigable, read-only document tree.
use std::fmt;
use std::hash::Hash;

/// A qualified name as it appears on a node of the source tree.
///
/// `namespace` is the resolved URI and is what name tests compare against;
/// `prefix` is kept only so that paths and copies can be written back the way
/// the document spelled them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub namespace: Option<&'a str>,
    pub local_part: &'a str,
}

impl fmt::Display for QName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Some(prefix) if !prefix.is_empty() => write!(f, "{}:{}", prefix, self.local_part),
            _ => f.write_str(self.local_part),
        }
    }
}

/// One in-scope namespace binding of an element. `prefix` is `None` for the
/// default namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceBinding<'a> {
    pub prefix: Option<&'a str>,
    pub uri: &'a str,
}

/// The type of a node, aligned with the XPath 1.0 data model (namespace nodes
/// are not modelled as separate nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The contract for a node in a read-only, hierarchical document.
///
/// The XPath engine and the XSLT processor are written exclusively against this
/// trait. `Ord` must follow document order: a node sorts before its attributes,
/// which sort before its children.
///
/// `'a` is the lifetime of the underlying document.
pub trait DataSourceNode<'a>:
    fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord
{
    fn node_type(&self) -> NodeType;

    /// The qualified name of an element or attribute, or the target of a
    /// processing instruction (with no namespace). `None` for other nodes.
    fn name(&self) -> Option<QName<'a>>;

    /// The XPath string value: the text of a text node, the value of an
    /// attribute, the concatenated descendant text of an element or root.
    fn string_value(&self) -> String;

    /// Attribute nodes of an element, in document order. Empty otherwise.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// Child nodes in document order. Empty for leaves and attributes.
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// The parent node. For an attribute this is its owner element.
    fn parent(&self) -> Option<Self>;

    /// All namespace bindings in scope on an element (the `xml` binding
    /// excluded). Empty for non-elements.
    fn namespaces(&self) -> Vec<NamespaceBinding<'a>>;
}
