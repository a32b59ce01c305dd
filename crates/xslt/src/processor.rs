use crate::ast::{CompiledStylesheet, OutputSettings};
use crate::compiler;
use crate::error::{ExecutionError, XsltError};
use crate::executor::TemplateExecutor;
use crate::executor_handlers::copy::copy_node;
use crate::result::{ResultDocument, TreeBuilder};
use crate::serialize;
use cei2tei_xpath1::datasource::DataSourceNode;
use cei2tei_xpath1::XmlNode;
use roxmltree::Document;
use std::fs;
use std::path::Path;

/// A compiled stylesheet. Immutable once loaded, so one instance can be
/// shared by any number of threads.
#[derive(Debug)]
pub struct Stylesheet {
    compiled: CompiledStylesheet,
}

impl Stylesheet {
    pub fn from_source(source: &str) -> Result<Self, XsltError> {
        Ok(Self {
            compiled: compiler::compile(source)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, XsltError> {
        let source = fs::read_to_string(path)?;
        Self::from_source(&source)
    }

    pub fn output(&self) -> &OutputSettings {
        &self.compiled.output
    }

    pub fn compiled(&self) -> &CompiledStylesheet {
        &self.compiled
    }

    /// Applies the stylesheet to a parsed document.
    pub fn transform(&self, doc: &Document) -> Result<ResultDocument, ExecutionError> {
        self.transform_node(XmlNode::root(doc))
    }

    /// Applies the stylesheet to any tree that implements `DataSourceNode`,
    /// starting at `root`.
    pub fn transform_node<'a, N: DataSourceNode<'a> + 'a>(
        &self,
        root: N,
    ) -> Result<ResultDocument, ExecutionError> {
        let mut executor = TemplateExecutor::new(&self.compiled, root)?;
        let nodes = executor.build_tree()?;
        Ok(ResultDocument {
            output: self.compiled.output.clone(),
            nodes,
        })
    }

    /// Transforms and serializes in one step.
    pub fn transform_to_string(&self, doc: &Document) -> Result<String, XsltError> {
        let result = self.transform(doc)?;
        serialize::serialize_to_string(&result)
    }
}

/// Copies a source subtree into a standalone result document, e.g. to
/// serialize one element of a larger file with its namespaces in scope.
pub fn copy_to_document<'a, N: DataSourceNode<'a>>(
    node: N,
    output: OutputSettings,
) -> Result<ResultDocument, ExecutionError> {
    let mut builder = TreeBuilder::new();
    copy_node(node, &mut builder, &|_| false)?;
    Ok(ResultDocument {
        output,
        nodes: builder.into_nodes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::XSLT_NAMESPACE;
    use crate::result::ResultNode;
    use cei2tei_xpath1::parse_document;

    const CEI: &str = "http://www.monasterium.net/NS/cei";
    const TEI: &str = "http://www.tei-c.org/ns/1.0";

    fn stylesheet(body: &str) -> Stylesheet {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSLT_NAMESPACE}" xmlns:cei="{CEI}" xmlns:tei="{TEI}" exclude-result-prefixes="cei tei">
                 <xsl:output indent="no" omit-xml-declaration="yes"/>
                 {body}
               </xsl:stylesheet>"#
        );
        Stylesheet::from_source(&source).unwrap()
    }

    fn run(sheet: &Stylesheet, input: &str) -> String {
        let doc = parse_document(input).unwrap();
        sheet.transform_to_string(&doc).unwrap().trim_end().to_string()
    }

    /// Deep recursion needs more stack than a test thread has by default.
    fn with_deep_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Stylesheet>();
    }

    #[test]
    fn test_identity_transform() {
        let sheet = stylesheet(
            r#"<xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>"#,
        );
        let input = format!(r#"<cei:text xmlns:cei="{CEI}" type="charter"><cei:p>a<!--c--><?pi x?></cei:p></cei:text>"#);
        assert_eq!(run(&sheet, &input), input);
    }

    #[test]
    fn test_tenor_becomes_tei_div() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><tei:TEI><xsl:apply-templates select="//cei:tenor"/></tei:TEI></xsl:template>
               <xsl:template match="cei:tenor"><tei:div type="tenor"><xsl:value-of select="normalize-space(.)"/></tei:div></xsl:template>"#,
        );
        let input = format!(r#"<cei:text xmlns:cei="{CEI}"><cei:body><cei:tenor>  Nos   Rudolfus </cei:tenor></cei:body></cei:text>"#);
        assert_eq!(
            run(&sheet, &input),
            format!(r#"<tei:TEI xmlns:tei="{TEI}"><tei:div type="tenor">Nos Rudolfus</tei:div></tei:TEI>"#)
        );
    }

    #[test]
    fn test_for_each_sort_and_position() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><out><xsl:for-each select="//item"><xsl:sort select="@n" data-type="number" order="descending"/><i pos="{position()}"><xsl:value-of select="."/></i></xsl:for-each></out></xsl:template>"#,
        );
        let input = r#"<list><item n="2">b</item><item n="10">c</item><item n="1">a</item></list>"#;
        assert_eq!(
            run(&sheet, input),
            r#"<out><i pos="1">c</i><i pos="2">b</i><i pos="3">a</i></out>"#
        );
    }

    #[test]
    fn test_variables_params_and_named_templates() {
        let sheet = stylesheet(
            r#"<xsl:variable name="suffix" select="concat('-', $base)"/>
               <xsl:variable name="base">x</xsl:variable>
               <xsl:template match="/">
                 <r>
                   <xsl:call-template name="greet"><xsl:with-param name="who" select="string(/a/@who)"/></xsl:call-template>
                   <xsl:call-template name="greet"/>
                 </r>
               </xsl:template>
               <xsl:template name="greet">
                 <xsl:param name="who" select="'nobody'"/>
                 <xsl:variable name="msg" select="concat('hi ', $who, $suffix)"/>
                 <g><xsl:value-of select="$msg"/></g>
               </xsl:template>"#,
        );
        assert_eq!(
            run(&sheet, r#"<a who="ana"/>"#),
            "<r><g>hi ana-x</g><g>hi nobody-x</g></r>"
        );
    }

    #[test]
    fn test_choose_element_attribute_and_copy_of_fragment() {
        let sheet = stylesheet(
            r#"<xsl:template match="/">
                 <xsl:variable name="frag"><b>bold</b></xsl:variable>
                 <xsl:element name="tei:{name(*)}">
                   <xsl:attribute name="n"><xsl:value-of select="count(//*)"/></xsl:attribute>
                   <xsl:choose>
                     <xsl:when test="/a/@flag = 'yes'"><xsl:copy-of select="$frag"/></xsl:when>
                     <xsl:otherwise>none</xsl:otherwise>
                   </xsl:choose>
                 </xsl:element>
               </xsl:template>"#,
        );
        assert_eq!(
            run(&sheet, r#"<a flag="yes"><c/></a>"#),
            format!(r#"<tei:a xmlns:tei="{TEI}" n="2"><b>bold</b></tei:a>"#)
        );
        assert_eq!(
            run(&sheet, r#"<a flag="no"/>"#),
            format!(r#"<tei:a xmlns:tei="{TEI}" n="1">none</tei:a>"#)
        );
    }

    #[test]
    fn test_keys_and_modes() {
        let sheet = stylesheet(
            r#"<xsl:key name="person" match="person" use="@id"/>
               <xsl:template match="/"><r><xsl:apply-templates select="//ref" mode="resolve"/></r></xsl:template>
               <xsl:template match="ref" mode="resolve"><n><xsl:value-of select="key('person', @to)"/></n></xsl:template>"#,
        );
        let input = r#"<d><person id="p1">Ana</person><person id="p2">Bo</person><ref to="p2"/><ref to="p1"/></d>"#;
        assert_eq!(run(&sheet, input), "<r><n>Bo</n><n>Ana</n></r>");
    }

    #[test]
    fn test_strip_space_and_builtin_rules() {
        let sheet = stylesheet(
            r#"<xsl:strip-space elements="*"/><xsl:preserve-space elements="keep"/>
               <xsl:template match="keep">[<xsl:apply-templates/>]</xsl:template>"#,
        );
        let input = "<a>\n  <b>x</b>\n  <keep> </keep>\n</a>";
        assert_eq!(run(&sheet, input), "x[ ]");
    }

    #[test]
    fn test_terminating_message_fails_the_document() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><xsl:message terminate="yes">bad <xsl:value-of select="name(*)"/></xsl:message></xsl:template>"#,
        );
        let doc = parse_document("<oops/>").unwrap();
        match sheet.transform(&doc) {
            Err(ExecutionError::Terminated(message)) => assert_eq!(message, "bad oops"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><xsl:call-template name="loop"/></xsl:template>
               <xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>"#,
        );
        let outcome = with_deep_stack(move || {
            let doc = parse_document("<a/>").unwrap();
            matches!(sheet.transform(&doc), Err(ExecutionError::Execution(_)))
        });
        assert!(outcome);
    }

    #[test]
    fn test_deeply_nested_document_is_copied() {
        let sheet = stylesheet(
            r#"<xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>"#,
        );
        let input = format!("{}x{}", "<d>".repeat(600), "</d>".repeat(600));
        let output = with_deep_stack(move || run(&sheet, &input));
        assert_eq!(output, format!("{}x{}", "<d>".repeat(600), "</d>".repeat(600)));
    }

    #[test]
    fn test_attribute_after_content_is_an_error() {
        let sheet = stylesheet(
            r#"<xsl:template match="/"><e>text<xsl:attribute name="late">1</xsl:attribute></e></xsl:template>"#,
        );
        let doc = parse_document("<a/>").unwrap();
        assert!(sheet.transform(&doc).is_err());
    }

    #[test]
    fn test_copy_to_document() {
        let input = format!(r#"<cei:charter xmlns:cei="{CEI}"><cei:text><cei:p>x</cei:p></cei:text></cei:charter>"#);
        let doc = parse_document(&input).unwrap();
        let text = doc
            .descendants()
            .find(|n| n.tag_name().name() == "text")
            .unwrap();
        let result = copy_to_document(XmlNode::Node(text), OutputSettings::default()).unwrap();
        assert!(matches!(&result.nodes[0], ResultNode::Element(e) if e.name.local == "text"));
        let out = serialize::serialize_to_string(&result).unwrap();
        assert!(out.contains(&format!(r#"<cei:text xmlns:cei="{CEI}">"#)), "{}", out);
    }
}
