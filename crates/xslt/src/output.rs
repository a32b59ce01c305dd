//! Defines the `OutputBuilder` trait, which decouples the XSLT executor
//! from the concrete result tree.

use crate::error::ExecutionError;
use crate::result::ResultName;

/// A trait that describes the semantic actions of building the output tree,
/// without exposing the underlying concrete node types.
pub trait OutputBuilder {
    fn start_element(&mut self, name: ResultName);
    fn end_element(&mut self);

    /// Adds a namespace node to the currently open element.
    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str);

    /// Sets an attribute on the currently open element. Fails once the element
    /// has children, or when no element is open.
    fn add_attribute(&mut self, name: ResultName, value: &str) -> Result<(), ExecutionError>;

    fn add_text(&mut self, text: &str);
    fn add_comment(&mut self, text: &str);
    fn add_processing_instruction(&mut self, target: &str, data: &str);
}
