pub(super) mod control_flow;
pub(super) mod stylesheet;
pub(super) mod variables;

use crate::ast::{Body, Instruction, NameContext};
use crate::compiler::{Compiler, XSLT_NAMESPACE};
use crate::error::XsltError;
use crate::result::ResultName;
use cei2tei_xpath1::{DataSourceNode, XmlNode};
use roxmltree::Node;

// Handlers for template bodies. They are implemented as methods on Compiler.

impl<'d, 'input> Compiler<'d, 'input> {
    /// Compiles the children of `parent` into a body. Whitespace-only text in
    /// the stylesheet is insignificant and dropped.
    pub(crate) fn compile_body(&mut self, parent: Node<'d, 'input>) -> Result<Body, XsltError> {
        self.compile_children(parent.children())
    }

    pub(crate) fn compile_children(
        &mut self,
        children: impl Iterator<Item = Node<'d, 'input>>,
    ) -> Result<Body, XsltError> {
        let mut body = Vec::new();
        for child in children {
            if child.is_text() {
                let text = child.text().unwrap_or_default();
                if !text.trim().is_empty() {
                    body.push(Instruction::Text(text.to_string()));
                }
            } else if child.is_element() {
                if let Some(instr) = self.compile_instruction(child)? {
                    body.push(instr);
                }
            }
        }
        Ok(body)
    }

    fn compile_instruction(&mut self, node: Node<'d, 'input>) -> Result<Option<Instruction>, XsltError> {
        if node.tag_name().namespace() != Some(XSLT_NAMESPACE) {
            return self.handle_literal_result_element(node).map(Some);
        }
        let instr = match node.tag_name().name() {
            "apply-templates" => self.handle_apply_templates(node)?,
            "call-template" => self.handle_call_template(node)?,
            "for-each" => self.handle_for_each(node)?,
            "if" => self.handle_if(node)?,
            "choose" => self.handle_choose(node)?,
            "variable" => self.handle_variable(node)?,
            "value-of" => Instruction::ValueOf {
                select: self.xpath(node, self.required_attr(node, "select")?)?,
            },
            "copy-of" => Instruction::CopyOf {
                select: self.xpath(node, self.required_attr(node, "select")?)?,
            },
            "text" => Instruction::Text(node.text().unwrap_or_default().to_string()),
            "element" => self.handle_element(node)?,
            "attribute" => self.handle_attribute(node)?,
            "comment" => Instruction::Comment {
                body: self.compile_body(node)?,
            },
            "processing-instruction" => Instruction::ProcessingInstruction {
                name: self.avt(node, self.required_attr(node, "name")?)?,
                body: self.compile_body(node)?,
            },
            "copy" => Instruction::Copy {
                attribute_sets: attribute_set_names(node.attribute("use-attribute-sets")),
                body: self.compile_body(node)?,
            },
            "message" => Instruction::Message {
                body: self.compile_body(node)?,
                terminate: node.attribute("terminate") == Some("yes"),
            },
            // Only relevant to processors that lack an instruction.
            "fallback" => return Ok(None),
            "param" => {
                return Err(self.compilation_error(
                    node,
                    "<xsl:param> is only allowed at the start of a template or at the top level",
                ));
            }
            "number" | "apply-imports" => {
                return Err(self.unsupported(node, format!("xsl:{}", node.tag_name().name())));
            }
            other => {
                return Err(self.compilation_error(node, format!("unknown instruction xsl:{}", other)));
            }
        };
        Ok(Some(instr))
    }

    pub(crate) fn handle_literal_result_element(
        &mut self,
        node: Node<'d, 'input>,
    ) -> Result<Instruction, XsltError> {
        let name = XmlNode::Node(node)
            .name()
            .map(ResultName::from)
            .ok_or_else(|| self.compilation_error(node, "literal result element without a name"))?;

        let mut excluded = self.excluded_namespaces.clone();
        if let Some(prefixes) = node.attribute((XSLT_NAMESPACE, "exclude-result-prefixes")) {
            excluded.extend(self.prefixes_to_uris(node, prefixes)?);
        }
        let namespaces = node
            .namespaces()
            .filter(|ns| !excluded.contains(ns.uri()))
            .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
            .collect();

        let mut attributes = Vec::new();
        for attr in node.attributes() {
            if attr.namespace() == Some(XSLT_NAMESPACE) {
                continue;
            }
            let prefix = attr.namespace().and_then(|uri| match uri {
                cei2tei_xpath1::namespaces::XML_NAMESPACE => Some("xml"),
                uri => node.lookup_prefix(uri),
            });
            let attr_name = ResultName::namespaced(prefix, attr.namespace(), attr.name());
            attributes.push((attr_name, self.avt(node, attr.value())?));
        }

        Ok(Instruction::LiteralElement {
            name,
            namespaces,
            attributes,
            attribute_sets: attribute_set_names(node.attribute((XSLT_NAMESPACE, "use-attribute-sets"))),
            body: self.compile_body(node)?,
        })
    }

    /// Resolves an `exclude-result-prefixes` list; `#default` names the
    /// default namespace.
    pub(crate) fn prefixes_to_uris(&self, node: Node, prefixes: &str) -> Result<Vec<String>, XsltError> {
        prefixes
            .split_whitespace()
            .map(|prefix| {
                let lookup = if prefix == "#default" { None } else { Some(prefix) };
                node.lookup_namespace_uri(lookup)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        self.compilation_error(node, format!("prefix '{}' is not declared", prefix))
                    })
            })
            .collect()
    }

    fn name_context(&self, node: Node) -> NameContext {
        NameContext {
            prefixes: self.namespaces_at(node),
            default_namespace: node.lookup_namespace_uri(None).map(str::to_string),
        }
    }

    fn handle_element(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        Ok(Instruction::Element {
            name: self.avt(node, self.required_attr(node, "name")?)?,
            namespace: node
                .attribute("namespace")
                .map(|ns| self.avt(node, ns))
                .transpose()?,
            context: self.name_context(node),
            attribute_sets: attribute_set_names(node.attribute("use-attribute-sets")),
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_attribute(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        Ok(Instruction::Attribute {
            name: self.avt(node, self.required_attr(node, "name")?)?,
            namespace: node
                .attribute("namespace")
                .map(|ns| self.avt(node, ns))
                .transpose()?,
            context: NameContext {
                // Unprefixed attribute names never take the default namespace.
                default_namespace: None,
                ..self.name_context(node)
            },
            body: self.compile_body(node)?,
        })
    }
}

fn attribute_set_names(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
