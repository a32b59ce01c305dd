//! Compiles stylesheet source into a `CompiledStylesheet`.
//!
//! The stylesheet is parsed with `roxmltree`, so namespace declarations are
//! resolved by the parser; the handlers in `compiler_handlers` turn each XSLT
//! element into its executable form.

use crate::ast::{CompiledStylesheet, Template, TemplateRule};
use crate::avt::{AttributeValueTemplate, AvtError};
use crate::error::{Location, XsltError};
use crate::pattern::Pattern;
use cei2tei_xpath1::functions::is_known_function;
use cei2tei_xpath1::namespaces::XML_NAMESPACE;
use cei2tei_xpath1::{Expression, NamespaceMap, XPathError, parse_document, parse_expression};
use roxmltree::{Document, Node};
use std::collections::HashSet;

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Compiles a stylesheet from its source text.
pub fn compile(source: &str) -> Result<CompiledStylesheet, XsltError> {
    let doc = parse_document(source)?;
    let root = doc.root_element();
    let mut compiler = Compiler::new(&doc);

    if is_xslt(root, "stylesheet") || is_xslt(root, "transform") {
        compiler.handle_stylesheet(root)?;
    } else if root.attribute((XSLT_NAMESPACE, "version")).is_some() {
        // A literal result element as stylesheet: the whole document is the
        // template for the root node.
        compiler.handle_simplified_stylesheet(root)?;
    } else {
        return Err(XsltError::Compilation {
            message: format!(
                "root element <{}> is not xsl:stylesheet or xsl:transform",
                root.tag_name().name()
            ),
            location: compiler.location(root),
        });
    }
    Ok(compiler.finish())
}

pub(crate) fn is_xslt(node: Node, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSLT_NAMESPACE)
        && node.tag_name().name() == local
}

/// Compilation state shared by the handlers.
pub(crate) struct Compiler<'d, 'input> {
    pub(crate) doc: &'d Document<'input>,
    pub(crate) stylesheet: CompiledStylesheet,
    /// Namespace URIs that literal result elements do not copy.
    pub(crate) excluded_namespaces: HashSet<String>,
}

impl<'d, 'input> Compiler<'d, 'input> {
    fn new(doc: &'d Document<'input>) -> Self {
        let mut excluded_namespaces = HashSet::new();
        excluded_namespaces.insert(XSLT_NAMESPACE.to_string());
        excluded_namespaces.insert(XML_NAMESPACE.to_string());
        Self {
            doc,
            stylesheet: CompiledStylesheet::default(),
            excluded_namespaces,
        }
    }

    /// Orders every mode's rules so that the first match is the one to apply:
    /// highest priority first, later declarations before earlier ones.
    fn finish(mut self) -> CompiledStylesheet {
        for rules in self.stylesheet.rules.values_mut() {
            rules.sort_by(|a, b| {
                b.priority
                    .total_cmp(&a.priority)
                    .then(b.position.cmp(&a.position))
            });
        }
        self.stylesheet
    }

    pub(crate) fn location(&self, node: Node) -> Location {
        self.doc.text_pos_at(node.range().start).into()
    }

    pub(crate) fn compilation_error(&self, node: Node, message: impl Into<String>) -> XsltError {
        XsltError::Compilation {
            message: message.into(),
            location: self.location(node),
        }
    }

    pub(crate) fn unsupported(&self, node: Node, feature: impl Into<String>) -> XsltError {
        XsltError::Unsupported {
            feature: feature.into(),
            location: self.location(node),
        }
    }

    pub(crate) fn required_attr<'n>(&self, node: Node<'n, 'input>, name: &str) -> Result<&'n str, XsltError> {
        node.attribute(name).ok_or_else(|| {
            self.compilation_error(
                node,
                format!(
                    "<xsl:{}> requires a '{}' attribute",
                    node.tag_name().name(),
                    name
                ),
            )
        })
    }

    /// The prefixed namespace bindings in scope on a stylesheet element.
    pub(crate) fn namespaces_at(&self, node: Node) -> NamespaceMap {
        node.namespaces()
            .filter_map(|ns| ns.name().map(|prefix| (prefix, ns.uri())))
            .collect()
    }

    /// Parses an XPath expression found on `node`.
    pub(crate) fn xpath(&self, node: Node, text: &str) -> Result<Expression, XsltError> {
        let expr = parse_expression(text, &self.namespaces_at(node))
            .map_err(|source| self.xpath_error(node, text, source))?;
        check_functions(&expr).map_err(|source| self.xpath_error(node, text, source))?;
        Ok(expr)
    }

    pub(crate) fn pattern(&self, node: Node, text: &str) -> Result<Pattern, XsltError> {
        Pattern::parse(text, &self.namespaces_at(node))
            .map_err(|source| self.xpath_error(node, text, source))
    }

    pub(crate) fn avt(&self, node: Node, text: &str) -> Result<AttributeValueTemplate, XsltError> {
        AttributeValueTemplate::parse(text, &self.namespaces_at(node)).map_err(|e| match e {
            AvtError::Unbalanced(value) => {
                self.compilation_error(node, format!("unbalanced braces in '{}'", value))
            }
            AvtError::XPath(expression, source) => self.xpath_error(node, &expression, source),
        })
    }

    fn xpath_error(&self, node: Node, text: &str, source: XPathError) -> XsltError {
        XsltError::XPath {
            expression: text.to_string(),
            location: self.location(node),
            source,
        }
    }

    /// Registers a template; a `match` adds one rule per pattern alternative.
    pub(crate) fn add_template(
        &mut self,
        node: Node,
        template: Template,
        pattern: Option<Pattern>,
        mode: Option<String>,
        priority: Option<f64>,
        name: Option<String>,
    ) -> Result<(), XsltError> {
        let index = self.stylesheet.templates.len();
        self.stylesheet.templates.push(template);

        if let Some(name) = name
            && self.stylesheet.named_templates.insert(name.clone(), index).is_some()
        {
            return Err(self.compilation_error(
                node,
                format!("template '{}' is defined more than once", name),
            ));
        }

        if let Some(pattern) = pattern {
            let rules = self.stylesheet.rules.entry(mode).or_default();
            for alternative in pattern.alternatives() {
                rules.push(TemplateRule {
                    priority: priority.unwrap_or_else(|| alternative.default_priority()),
                    pattern: alternative,
                    position: index,
                    template: index,
                });
            }
        }
        Ok(())
    }
}

/// Rejects calls to functions the evaluator does not provide, so that a typo
/// fails when the stylesheet loads rather than on every document.
fn check_functions(expr: &Expression) -> Result<(), XPathError> {
    match expr {
        Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => Ok(()),
        Expression::FunctionCall { name, args } => {
            if !is_known_function(name) {
                return Err(XPathError::UnknownFunction(name.clone()));
            }
            args.iter().try_for_each(check_functions)
        }
        Expression::LocationPath(path) => {
            if let Some(start) = &path.start_point {
                check_functions(start)?;
            }
            path.steps
                .iter()
                .flat_map(|s| s.predicates.iter())
                .try_for_each(check_functions)
        }
        Expression::Filter {
            primary,
            predicates,
        } => {
            check_functions(primary)?;
            predicates.iter().try_for_each(check_functions)
        }
        Expression::BinaryOp { left, right, .. } => {
            check_functions(left)?;
            check_functions(right)
        }
        Expression::UnaryOp { expr, .. } => check_functions(expr),
    }
}
