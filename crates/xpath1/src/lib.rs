//! Namespace-aware XPath 1.0 for the CEI to TEI tooling.
//!
//! Expressions are parsed once with [`parse_expression`], which also resolves
//! every prefixed name test against a [`NamespaceMap`], and are then evaluated
//! against any tree implementing [`DataSourceNode`]. The [`xml`] module provides
//! that implementation for `roxmltree` documents.

pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod functions;
pub mod namespaces;
pub mod operators;
pub mod parser;
pub mod xml;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NameTest, NodeTest, Step};
pub use datasource::{DataSourceNode, NamespaceBinding, NodeType, QName};
pub use engine::{
    EvaluationContext, KeyIndex, VariableScope, XPathValue, evaluate, format_number, string_to_number,
};
pub use error::XPathError;
pub use namespaces::NamespaceMap;
pub use parser::parse_expression;
pub use xml::{XmlNode, parse_document};
