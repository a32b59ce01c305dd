//! Handlers for `<xsl:variable>`, `<xsl:param>`, and `<xsl:with-param>`.

use crate::ast::{Instruction, VariableDecl, VariableValue};
use crate::compiler::Compiler;
use crate::error::XsltError;
use roxmltree::Node;

impl<'d, 'input> Compiler<'d, 'input> {
    /// Compiles any of the three binding elements: a name plus either a
    /// `select`, content, or nothing.
    pub(crate) fn handle_variable_decl(&mut self, node: Node<'d, 'input>) -> Result<VariableDecl, XsltError> {
        let name = self.required_attr(node, "name")?.to_string();
        let has_content = node
            .children()
            .any(|c| c.is_element() || (c.is_text() && c.text().is_some_and(|t| !t.trim().is_empty())));

        let value = match node.attribute("select") {
            Some(_) if has_content => {
                return Err(self.compilation_error(
                    node,
                    format!("variable '{}' has both a select attribute and content", name),
                ));
            }
            Some(select) => VariableValue::Select(self.xpath(node, select)?),
            None if has_content => VariableValue::Content(self.compile_body(node)?),
            None => VariableValue::Empty,
        };
        Ok(VariableDecl { name, value })
    }

    pub(crate) fn handle_variable(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        Ok(Instruction::Variable(self.handle_variable_decl(node)?))
    }
}
