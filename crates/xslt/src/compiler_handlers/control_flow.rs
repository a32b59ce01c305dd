//! Handlers for `<xsl:if>`, `<xsl:choose>`, `<xsl:for-each>`, `<xsl:apply-templates>`,
//! `<xsl:call-template>` and their `<xsl:sort>` children.

use crate::ast::{Instruction, SortDataType, SortKey, SortOrder, When};
use crate::compiler::{Compiler, is_xslt};
use crate::error::XsltError;
use roxmltree::Node;

impl<'d, 'input> Compiler<'d, 'input> {
    pub(crate) fn handle_if(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        Ok(Instruction::If {
            test: self.xpath(node, self.required_attr(node, "test")?)?,
            body: self.compile_body(node)?,
        })
    }

    pub(crate) fn handle_choose(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        let mut whens = Vec::new();
        let mut otherwise = None;
        for child in node.children().filter(|c| c.is_element()) {
            if is_xslt(child, "when") {
                if otherwise.is_some() {
                    return Err(self.compilation_error(child, "<xsl:when> after <xsl:otherwise>"));
                }
                whens.push(When {
                    test: self.xpath(child, self.required_attr(child, "test")?)?,
                    body: self.compile_body(child)?,
                });
            } else if is_xslt(child, "otherwise") && otherwise.is_none() {
                otherwise = Some(self.compile_body(child)?);
            } else {
                return Err(self.compilation_error(
                    child,
                    "<xsl:choose> may only contain <xsl:when> and one <xsl:otherwise>",
                ));
            }
        }
        if whens.is_empty() {
            return Err(self.compilation_error(node, "<xsl:choose> needs at least one <xsl:when>"));
        }
        Ok(Instruction::Choose { whens, otherwise })
    }

    pub(crate) fn handle_for_each(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        let select = self.xpath(node, self.required_attr(node, "select")?)?;
        let sort_keys = self.compile_sort_keys(node)?;
        let body = self.compile_children(node.children().filter(|c| !is_xslt(*c, "sort")))?;
        Ok(Instruction::ForEach {
            select,
            sort_keys,
            body,
        })
    }

    pub(crate) fn handle_apply_templates(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        let select = node
            .attribute("select")
            .map(|s| self.xpath(node, s))
            .transpose()?;
        let mut params = Vec::new();
        for child in node.children().filter(|c| c.is_element()) {
            if is_xslt(child, "with-param") {
                params.push(self.handle_variable_decl(child)?);
            } else if !is_xslt(child, "sort") {
                return Err(self.compilation_error(
                    child,
                    "<xsl:apply-templates> may only contain <xsl:sort> and <xsl:with-param>",
                ));
            }
        }
        Ok(Instruction::ApplyTemplates {
            select,
            mode: node.attribute("mode").map(str::to_string),
            sort_keys: self.compile_sort_keys(node)?,
            params,
        })
    }

    pub(crate) fn handle_call_template(&mut self, node: Node<'d, 'input>) -> Result<Instruction, XsltError> {
        let name = self.required_attr(node, "name")?.to_string();
        let mut params = Vec::new();
        for child in node.children().filter(|c| c.is_element()) {
            if is_xslt(child, "with-param") {
                params.push(self.handle_variable_decl(child)?);
            } else {
                return Err(self.compilation_error(
                    child,
                    "<xsl:call-template> may only contain <xsl:with-param>",
                ));
            }
        }
        Ok(Instruction::CallTemplate { name, params })
    }

    fn compile_sort_keys(&mut self, node: Node<'d, 'input>) -> Result<Vec<SortKey>, XsltError> {
        let mut keys = Vec::new();
        for sort in node.children().filter(|c| is_xslt(*c, "sort")) {
            let order = match sort.attribute("order").unwrap_or("ascending") {
                "ascending" => SortOrder::Ascending,
                "descending" => SortOrder::Descending,
                other => {
                    return Err(self.compilation_error(sort, format!("invalid sort order '{}'", other)));
                }
            };
            let data_type = match sort.attribute("data-type").unwrap_or("text") {
                "text" => SortDataType::Text,
                "number" => SortDataType::Number,
                other => {
                    return Err(self.compilation_error(sort, format!("invalid sort data-type '{}'", other)));
                }
            };
            keys.push(SortKey {
                select: self.xpath(sort, sort.attribute("select").unwrap_or("."))?,
                order,
                data_type,
            });
        }
        Ok(keys)
    }
}
