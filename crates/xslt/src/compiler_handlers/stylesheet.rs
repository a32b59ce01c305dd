//! Handlers for the `<xsl:stylesheet>` element and its top-level declarations.

use crate::ast::{KeyDefinition, OutputMethod, SpaceTest, Template};
use crate::compiler::{Compiler, XSLT_NAMESPACE, is_xslt};
use crate::error::XsltError;
use cei2tei_xpath1::NameTest;
use roxmltree::Node;

impl<'d, 'input> Compiler<'d, 'input> {
    pub(crate) fn handle_stylesheet(&mut self, root: Node<'d, 'input>) -> Result<(), XsltError> {
        for attr in ["exclude-result-prefixes", "extension-element-prefixes"] {
            if let Some(prefixes) = root.attribute(attr) {
                let uris = self.prefixes_to_uris(root, prefixes)?;
                self.excluded_namespaces.extend(uris);
            }
        }

        for child in root.children().filter(|c| c.is_element()) {
            if child.tag_name().namespace() != Some(XSLT_NAMESPACE) {
                // User-defined top-level elements carry data, not instructions.
                continue;
            }
            match child.tag_name().name() {
                "template" => self.handle_template(child)?,
                "variable" | "param" => {
                    let decl = self.handle_variable_decl(child)?;
                    self.stylesheet.globals.push(decl);
                }
                "output" => self.handle_output(child)?,
                "strip-space" => {
                    let tests = self.space_tests(child)?;
                    self.stylesheet.strip_space.extend(tests);
                }
                "preserve-space" => {
                    let tests = self.space_tests(child)?;
                    self.stylesheet.preserve_space.extend(tests);
                }
                "key" => self.handle_key(child)?,
                "attribute-set" => self.handle_attribute_set(child)?,
                "decimal-format" => {}
                "import" | "include" | "namespace-alias" => {
                    return Err(self.unsupported(child, format!("xsl:{}", child.tag_name().name())));
                }
                other => {
                    return Err(self.compilation_error(
                        child,
                        format!("xsl:{} is not allowed at the top level", other),
                    ));
                }
            }
        }
        Ok(())
    }

    /// A literal result element used as the whole stylesheet.
    pub(crate) fn handle_simplified_stylesheet(&mut self, root: Node<'d, 'input>) -> Result<(), XsltError> {
        let body = vec![self.handle_literal_result_element(root)?];
        let pattern = self.pattern(root, "/")?;
        self.add_template(
            root,
            Template {
                params: Vec::new(),
                body,
            },
            Some(pattern),
            None,
            None,
            None,
        )
    }

    fn handle_template(&mut self, node: Node<'d, 'input>) -> Result<(), XsltError> {
        let pattern = node
            .attribute("match")
            .map(|m| self.pattern(node, m))
            .transpose()?;
        let name = node.attribute("name").map(str::to_string);
        if pattern.is_none() && name.is_none() {
            return Err(self.compilation_error(node, "<xsl:template> needs a match or a name"));
        }
        let priority = match node.attribute("priority") {
            Some(p) => Some(p.trim().parse::<f64>().map_err(|_| {
                self.compilation_error(node, format!("invalid priority '{}'", p))
            })?),
            None => None,
        };

        // Parameters lead the body.
        let mut children = node
            .children()
            .filter(|c| c.is_element() || (c.is_text() && c.text().is_some_and(|t| !t.trim().is_empty())))
            .peekable();
        let mut params = Vec::new();
        while let Some(child) = children.next_if(|c| is_xslt(*c, "param")) {
            params.push(self.handle_variable_decl(child)?);
        }
        let body = self.compile_children(children)?;

        self.add_template(
            node,
            Template { params, body },
            pattern,
            node.attribute("mode").map(str::to_string),
            priority,
            name,
        )
    }

    fn handle_output(&mut self, node: Node<'d, 'input>) -> Result<(), XsltError> {
        let yes_no = |attr: &str| -> Result<Option<bool>, XsltError> {
            match node.attribute(attr) {
                None => Ok(None),
                Some("yes") => Ok(Some(true)),
                Some("no") => Ok(Some(false)),
                Some(other) => Err(self.compilation_error(
                    node,
                    format!("{} must be 'yes' or 'no', found '{}'", attr, other),
                )),
            }
        };
        let indent = yes_no("indent")?;
        let omit = yes_no("omit-xml-declaration")?;
        let standalone = yes_no("standalone")?;

        let output = &mut self.stylesheet.output;
        if let Some(indent) = indent {
            output.indent = indent;
        }
        if let Some(omit) = omit {
            output.omit_xml_declaration = omit;
        }
        if standalone.is_some() {
            output.standalone = standalone;
        }
        if let Some(public) = node.attribute("doctype-public") {
            output.doctype_public = Some(public.to_string());
        }
        if let Some(system) = node.attribute("doctype-system") {
            output.doctype_system = Some(system.to_string());
        }

        match node.attribute("method") {
            None | Some("xml") => {}
            Some("text") => self.stylesheet.output.method = OutputMethod::Text,
            Some(other) => return Err(self.unsupported(node, format!("output method '{}'", other))),
        }
        if let Some(encoding) = node.attribute("encoding")
            && !encoding.eq_ignore_ascii_case("utf-8")
        {
            return Err(self.unsupported(node, format!("output encoding '{}'", encoding)));
        }
        Ok(())
    }

    fn space_tests(&self, node: Node) -> Result<Vec<SpaceTest>, XsltError> {
        let elements = self.required_attr(node, "elements")?;
        let namespaces = self.namespaces_at(node);
        elements
            .split_whitespace()
            .map(|token| {
                if token == "*" {
                    return Ok(SpaceTest::Any);
                }
                let resolve = |prefix: &str| {
                    namespaces.resolve(prefix).map(str::to_string).ok_or_else(|| {
                        self.compilation_error(node, format!("prefix '{}' is not declared", prefix))
                    })
                };
                if let Some(prefix) = token.strip_suffix(":*") {
                    return Ok(SpaceTest::Namespace(resolve(prefix)?));
                }
                let mut test = NameTest::new(token);
                if let Some(prefix) = &test.prefix {
                    test.namespace = Some(resolve(prefix)?);
                }
                Ok(SpaceTest::Name(test))
            })
            .collect()
    }

    fn handle_key(&mut self, node: Node<'d, 'input>) -> Result<(), XsltError> {
        let key = KeyDefinition {
            name: self.required_attr(node, "name")?.to_string(),
            pattern: self.pattern(node, self.required_attr(node, "match")?)?,
            use_expr: self.xpath(node, self.required_attr(node, "use")?)?,
        };
        self.stylesheet.keys.push(key);
        Ok(())
    }

    fn handle_attribute_set(&mut self, node: Node<'d, 'input>) -> Result<(), XsltError> {
        let name = self.required_attr(node, "name")?.to_string();
        let mut body = Vec::new();
        for child in node.children().filter(|c| c.is_element()) {
            if !is_xslt(child, "attribute") {
                return Err(self.compilation_error(
                    child,
                    "<xsl:attribute-set> may only contain <xsl:attribute>",
                ));
            }
            body.push(self.handle_attribute(child)?);
        }
        // Later definitions of the same set add to it.
        self.stylesheet
            .attribute_sets
            .entry(name)
            .or_default()
            .extend(body);
        Ok(())
    }
}
