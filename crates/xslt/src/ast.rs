//! The compiled, executable form of a stylesheet.

use crate::avt::AttributeValueTemplate;
use crate::pattern::Pattern;
use crate::result::ResultName;
use cei2tei_xpath1::{Expression, NamespaceMap, NameTest};
use std::collections::HashMap;

/// A sequence of instructions, the body of a template or of an instruction.
pub type Body = Vec<Instruction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    Text,
}

/// Settings from `xsl:output`. Output is indented unless the stylesheet
/// says `indent="no"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub method: OutputMethod,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            method: OutputMethod::Xml,
            indent: true,
            omit_xml_declaration: false,
            standalone: None,
            doctype_public: None,
            doctype_system: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDataType {
    Text,
    Number,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub select: Expression,
    pub order: SortOrder,
    pub data_type: SortDataType,
}

/// How a variable, parameter or `xsl:with-param` gets its value.
#[derive(Debug, Clone)]
pub enum VariableValue {
    Select(Expression),
    /// Content that builds a result tree fragment.
    Content(Body),
    /// Neither `select` nor content: the empty string.
    Empty,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub value: VariableValue,
}

#[derive(Debug, Clone)]
pub struct When {
    pub test: Expression,
    pub body: Body,
}

/// Namespace context for names computed at run time by `xsl:element` and
/// `xsl:attribute`.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub prefixes: NamespaceMap,
    pub default_namespace: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// Literal text from the stylesheet or `xsl:text`.
    Text(String),
    LiteralElement {
        name: ResultName,
        /// Namespace nodes copied to the result (excluded prefixes removed).
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(ResultName, AttributeValueTemplate)>,
        attribute_sets: Vec<String>,
        body: Body,
    },
    ValueOf {
        select: Expression,
    },
    ApplyTemplates {
        select: Option<Expression>,
        mode: Option<String>,
        sort_keys: Vec<SortKey>,
        params: Vec<VariableDecl>,
    },
    CallTemplate {
        name: String,
        params: Vec<VariableDecl>,
    },
    ForEach {
        select: Expression,
        sort_keys: Vec<SortKey>,
        body: Body,
    },
    If {
        test: Expression,
        body: Body,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<Body>,
    },
    Element {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        context: NameContext,
        attribute_sets: Vec<String>,
        body: Body,
    },
    Attribute {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        context: NameContext,
        body: Body,
    },
    Comment {
        body: Body,
    },
    ProcessingInstruction {
        name: AttributeValueTemplate,
        body: Body,
    },
    Copy {
        attribute_sets: Vec<String>,
        body: Body,
    },
    CopyOf {
        select: Expression,
    },
    Variable(VariableDecl),
    Message {
        body: Body,
        terminate: bool,
    },
}

/// A template's parameters and body.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub params: Vec<VariableDecl>,
    pub body: Body,
}

/// One match rule. A template whose pattern is a union contributes one rule
/// per alternative, each with its own default priority.
#[derive(Debug, Clone)]
pub struct TemplateRule {
    pub pattern: Pattern,
    pub priority: f64,
    /// Declaration order; later rules win ties.
    pub position: usize,
    pub template: usize,
}

#[derive(Debug, Clone)]
pub struct KeyDefinition {
    pub name: String,
    pub pattern: Pattern,
    pub use_expr: Expression,
}

/// An `xsl:strip-space` or `xsl:preserve-space` name test.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceTest {
    Any,
    Namespace(String),
    Name(NameTest),
}

#[derive(Debug, Default)]
pub struct CompiledStylesheet {
    pub output: OutputSettings,
    /// All template bodies; rules and named templates refer to them by index.
    pub templates: Vec<Template>,
    /// Rules per mode, sorted so that the first match wins.
    pub rules: HashMap<Option<String>, Vec<TemplateRule>>,
    pub named_templates: HashMap<String, usize>,
    pub globals: Vec<VariableDecl>,
    pub keys: Vec<KeyDefinition>,
    pub attribute_sets: HashMap<String, Body>,
    pub strip_space: Vec<SpaceTest>,
    pub preserve_space: Vec<SpaceTest>,
}
