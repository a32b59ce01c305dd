//! Defines the Abstract Syntax Tree (AST) for XPath 1.0 expressions.

use crate::error::XPathError;
use crate::namespaces::NamespaceMap;

/// The top-level expression that can be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    LocationPath(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    /// A primary expression narrowed by predicates, e.g. `$rows[2]` or `(//a)[1]`.
    Filter {
        primary: Box<Expression>,
        predicates: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

impl Expression {
    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }

    /// Binds every prefixed name test to its namespace URI.
    pub(crate) fn resolve_names(&mut self, namespaces: &NamespaceMap) -> Result<(), XPathError> {
        match self {
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => Ok(()),
            Expression::LocationPath(path) => path.resolve_names(namespaces),
            Expression::FunctionCall { args, .. } => args
                .iter_mut()
                .try_for_each(|arg| arg.resolve_names(namespaces)),
            Expression::Filter {
                primary,
                predicates,
            } => {
                primary.resolve_names(namespaces)?;
                predicates
                    .iter_mut()
                    .try_for_each(|p| p.resolve_names(namespaces))
            }
            Expression::BinaryOp { left, right, .. } => {
                left.resolve_names(namespaces)?;
                right.resolve_names(namespaces)
            }
            Expression::UnaryOp { expr, .. } => expr.resolve_names(namespaces),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
    // Set
    Union,
}

/// A location path such as `/cei:text//cei:tenor`, `@type` or `$var/item`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// Starting expression for paths like `$var/foo` or `key('k', .)/foo`.
    pub start_point: Option<Box<Expression>>,
    /// True if the path starts from the document root. Ignored when
    /// `start_point` is set.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

impl LocationPath {
    fn resolve_names(&mut self, namespaces: &NamespaceMap) -> Result<(), XPathError> {
        if let Some(start) = self.start_point.as_mut() {
            start.resolve_names(namespaces)?;
        }
        for step in &mut self.steps {
            step.node_test.resolve_names(namespaces)?;
            for predicate in &mut step.predicates {
                predicate.resolve_names(namespaces)?;
            }
        }
        Ok(())
    }
}

/// A single step, e.g. `child::cei:p[position() > 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl Step {
    pub fn new(axis: Axis, node_test: NodeTest) -> Self {
        Self {
            axis,
            node_test,
            predicates: Vec::new(),
        }
    }

    /// The implicit step inserted for `//`.
    pub fn descendant_or_self() -> Self {
        Self::new(Axis::DescendantOrSelf, NodeTest::NodeType(NodeTypeTest::Node))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    /// Reverse axes number their nodes in reverse document order.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding
        )
    }
}

/// A name test. `namespace` is filled in from `prefix` when the expression is
/// compiled; an unprefixed test only matches names in no namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTest {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub local: String,
}

impl NameTest {
    pub fn new(qname: &str) -> Self {
        match qname.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_string()),
                namespace: None,
                local: local.to_string(),
            },
            None => Self {
                prefix: None,
                namespace: None,
                local: qname.to_string(),
            },
        }
    }

    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A qualified name test (`foo`, `cei:tenor`).
    Name(NameTest),
    /// `*`, any name on the principal node type of the axis.
    Wildcard,
    /// `prefix:*`, any name in one namespace.
    NamespaceWildcard {
        prefix: String,
        namespace: Option<String>,
    },
    /// A node type test (`text()`, `node()`, ...).
    NodeType(NodeTypeTest),
}

impl NodeTest {
    fn resolve_names(&mut self, namespaces: &NamespaceMap) -> Result<(), XPathError> {
        match self {
            NodeTest::Name(test) => {
                if let Some(prefix) = &test.prefix {
                    let uri = namespaces
                        .resolve(prefix)
                        .ok_or_else(|| XPathError::UnboundPrefix(prefix.clone()))?;
                    test.namespace = Some(uri.to_string());
                }
                Ok(())
            }
            NodeTest::NamespaceWildcard { prefix, namespace } => {
                let uri = namespaces
                    .resolve(prefix)
                    .ok_or_else(|| XPathError::UnboundPrefix(prefix.clone()))?;
                *namespace = Some(uri.to_string());
                Ok(())
            }
            NodeTest::Wildcard | NodeTest::NodeType(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    /// `processing-instruction()` with an optional target literal.
    ProcessingInstruction(Option<String>),
}
