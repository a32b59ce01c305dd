//! A structural XML Schema validator.
//!
//! Covers element and attribute structure: global and local element
//! declarations, `ref`, named and anonymous complex types, `sequence`,
//! `choice`, `all`, model groups, occurrence bounds, wildcards, mixed content,
//! `complexContent` derivation, `simpleContent`, required and prohibited
//! attributes, attribute groups and `anyAttribute`. Simple types are accepted
//! without checking their facets. Local `include`/`import` locations are
//! followed; remote ones are skipped.

use crate::validate::{FragmentValidator, ValidationOutcome};
use log::warn;
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Derivation chains longer than this are treated as a loop.
const MAX_DERIVATION_DEPTH: usize = 64;
/// Errors collected per fragment before giving up.
const MAX_ERRORS: usize = 50;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot read schema '{path}': {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("schema is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("invalid schema: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            local: local.to_string(),
        }
    }

    fn of(node: Node) -> Self {
        let tag = node.tag_name();
        Self::new(tag.namespace(), tag.name())
    }

    fn is_xsd(&self, local: &str) -> bool {
        self.namespace.as_deref() == Some(XSD_NAMESPACE) && self.local == local
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone)]
enum TypeDef {
    AnyType,
    Simple,
    Complex(Box<ComplexType>),
    Named(ExpandedName),
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: ExpandedName,
    type_def: TypeDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeUse {
    Optional,
    Required,
    Prohibited,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: ExpandedName,
    usage: AttributeUse,
}

#[derive(Debug, Clone, Default)]
struct AttributeSet {
    attributes: Vec<AttributeDecl>,
    groups: Vec<ExpandedName>,
    any: Option<Wildcard>,
}

#[derive(Debug, Clone)]
enum Derivation {
    None,
    Extension(ExpandedName),
    Restriction(ExpandedName),
}

#[derive(Debug, Clone)]
struct ComplexType {
    mixed: bool,
    content: Content,
    attributes: AttributeSet,
    derivation: Derivation,
}

#[derive(Debug, Clone)]
enum Content {
    Empty,
    Simple,
    Elements(Particle),
}

#[derive(Debug, Clone)]
struct Particle {
    min: usize,
    /// `None` is unbounded.
    max: Option<usize>,
    term: Term,
}

#[derive(Debug, Clone)]
enum Term {
    Element(Box<ElementDecl>),
    ElementRef(ExpandedName),
    Group(ExpandedName),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
    Any(Wildcard),
}

/// Namespace constraint of `xs:any`.
#[derive(Debug, Clone)]
enum Wildcard {
    Any,
    /// Any namespace except the given target namespace and no namespace.
    Other(Option<String>),
    List(Vec<Option<String>>),
}

impl Wildcard {
    fn allows(&self, namespace: Option<&str>) -> bool {
        match self {
            Wildcard::Any => true,
            Wildcard::Other(target) => namespace.is_some() && namespace != target.as_deref(),
            Wildcard::List(allowed) => allowed.iter().any(|ns| ns.as_deref() == namespace),
        }
    }
}

/// A compiled schema, possibly assembled from several local files.
#[derive(Debug, Default)]
pub struct XsdSchema {
    elements: HashMap<ExpandedName, ElementDecl>,
    complex_types: HashMap<ExpandedName, ComplexType>,
    simple_types: HashSet<ExpandedName>,
    groups: HashMap<ExpandedName, Particle>,
    attribute_groups: HashMap<ExpandedName, AttributeSet>,
}

impl XsdSchema {
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let mut loader = Loader::default();
        loader.load_file(path)?;
        loader.finish()
    }

    pub fn from_source(source: &str) -> Result<Self, SchemaError> {
        let mut loader = Loader::default();
        loader.load_source(source, None)?;
        loader.finish()
    }

    /// Names of the global element declarations.
    pub fn global_elements(&self) -> impl Iterator<Item = &ExpandedName> {
        self.elements.keys()
    }

    /// Validates the document element of `doc`.
    pub fn validate_document(&self, doc: &Document) -> Vec<String> {
        let root = doc.root_element();
        let mut validation = Validation {
            schema: self,
            errors: Vec::new(),
        };
        let name = ExpandedName::of(root);
        match self.elements.get(&name) {
            Some(decl) => validation.element(root, decl, &format!("/{}", display_name(root))),
            None => validation.error(format!("/{}", display_name(root)), format!("no global declaration for element {}", name)),
        }
        validation.errors
    }

    fn resolve_type<'s>(&'s self, type_def: &'s TypeDef) -> ResolvedType<'s> {
        match type_def {
            TypeDef::AnyType => ResolvedType::Any,
            TypeDef::Simple => ResolvedType::Simple,
            TypeDef::Complex(ct) => ResolvedType::Complex(ct),
            TypeDef::Named(name) => match self.complex_types.get(name) {
                Some(ct) => ResolvedType::Complex(ct),
                None if name.is_xsd("anyType") => ResolvedType::Any,
                None => ResolvedType::Simple,
            },
        }
    }

    /// Content and attribute sets after following the derivation chain.
    fn effective<'s>(&'s self, ct: &'s ComplexType, depth: usize) -> Result<Effective<'s>, String> {
        if depth > MAX_DERIVATION_DEPTH {
            return Err("complex type derivation does not terminate".to_string());
        }
        let own = Effective::from_content(&ct.content, ct.mixed, &ct.attributes);
        let (base_name, extends) = match &ct.derivation {
            Derivation::None => return Ok(own),
            Derivation::Extension(base) => (base, true),
            Derivation::Restriction(base) => (base, false),
        };
        let Some(base) = self.complex_types.get(base_name) else {
            // Derived from xs:anyType or from a simple type.
            return Ok(own);
        };
        let mut effective = self.effective(base, depth + 1)?;
        effective.attributes.push(&ct.attributes);
        effective.mixed |= ct.mixed;
        if extends {
            effective.content = match (effective.content, own.content) {
                (EffectiveContent::Elements(mut parts), EffectiveContent::Elements(more)) => {
                    parts.extend(more);
                    EffectiveContent::Elements(parts)
                }
                (EffectiveContent::Empty, own) => own,
                (base, _) => base,
            };
        } else {
            effective.content = own.content;
        }
        Ok(effective)
    }
}

impl FragmentValidator for XsdSchema {
    fn validate(&self, fragment: &str) -> ValidationOutcome {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        match Document::parse_with_options(fragment, options) {
            Ok(doc) => {
                let errors = self.validate_document(&doc);
                if errors.is_empty() {
                    ValidationOutcome::Valid
                } else {
                    ValidationOutcome::Invalid(errors)
                }
            }
            Err(e) => ValidationOutcome::Invalid(vec![format!("fragment is not well-formed: {}", e)]),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

#[derive(Default)]
struct Loader {
    schema: XsdSchema,
    visited: HashSet<PathBuf>,
}

/// Per-document defaults that shape how local names are qualified.
struct SchemaDocument {
    target_namespace: Option<String>,
    elements_qualified: bool,
    attributes_qualified: bool,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<(), SchemaError> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.visited.insert(canonical) {
            return Ok(());
        }
        let source = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_source(&source, path.parent())
    }

    fn load_source(&mut self, source: &str, base: Option<&Path>) -> Result<(), SchemaError> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(source, options)?;
        let root = doc.root_element();
        if !is_xsd(root, "schema") {
            return Err(SchemaError::Invalid(format!(
                "root element is {}, expected xs:schema",
                ExpandedName::of(root)
            )));
        }
        let context = SchemaDocument {
            target_namespace: root.attribute("targetNamespace").map(str::to_string),
            elements_qualified: root.attribute("elementFormDefault") == Some("qualified"),
            attributes_qualified: root.attribute("attributeFormDefault") == Some("qualified"),
        };

        for child in xsd_children(root) {
            match child.tag_name().name() {
                "element" => {
                    let name = context.global_name(child)?;
                    let type_def = context.element_type(child)?;
                    self.schema.elements.insert(name.clone(), ElementDecl { name, type_def });
                }
                "complexType" => {
                    let name = context.global_name(child)?;
                    let ct = context.complex_type(child)?;
                    self.schema.complex_types.insert(name, ct);
                }
                "simpleType" => {
                    let name = context.global_name(child)?;
                    self.schema.simple_types.insert(name);
                }
                "group" => {
                    let name = context.global_name(child)?;
                    let model = xsd_children(child)
                        .find(|c| matches!(c.tag_name().name(), "sequence" | "choice" | "all"))
                        .ok_or_else(|| SchemaError::Invalid(format!("group {} has no model", name)))?;
                    let particle = context.particle(model)?;
                    self.schema.groups.insert(name, particle);
                }
                "attributeGroup" => {
                    let name = context.global_name(child)?;
                    let set = context.attribute_set(child)?;
                    self.schema.attribute_groups.insert(name, set);
                }
                "include" | "import" => self.follow(child, base)?,
                "attribute" | "annotation" | "notation" => {}
                other => warn!("Ignoring schema declaration xs:{}", other),
            }
        }
        Ok(())
    }

    fn follow(&mut self, node: Node, base: Option<&Path>) -> Result<(), SchemaError> {
        let Some(location) = node.attribute("schemaLocation") else {
            return Ok(());
        };
        if location.contains("://") {
            warn!("Not fetching remote schema '{}'", location);
            return Ok(());
        }
        let path = match base {
            Some(base) => base.join(location),
            None => PathBuf::from(location),
        };
        self.load_file(&path)
    }

    fn finish(self) -> Result<XsdSchema, SchemaError> {
        let schema = self.schema;
        let mut checker = ReferenceCheck { schema: &schema };
        for decl in schema.elements.values() {
            checker.type_def(&decl.type_def)?;
        }
        for ct in schema.complex_types.values() {
            checker.complex_type(ct)?;
        }
        for particle in schema.groups.values() {
            checker.particle(particle)?;
        }
        for set in schema.attribute_groups.values() {
            checker.attribute_set(set)?;
        }
        Ok(schema)
    }
}

impl SchemaDocument {
    fn global_name(&self, node: Node) -> Result<ExpandedName, SchemaError> {
        let local = required(node, "name")?;
        Ok(ExpandedName::new(self.target_namespace.as_deref(), local))
    }

    fn local_element_name(&self, node: Node) -> Result<ExpandedName, SchemaError> {
        let local = required(node, "name")?;
        let qualified = match node.attribute("form") {
            Some(form) => form == "qualified",
            None => self.elements_qualified,
        };
        let namespace = if qualified { self.target_namespace.as_deref() } else { None };
        Ok(ExpandedName::new(namespace, local))
    }

    fn element_type(&self, node: Node) -> Result<TypeDef, SchemaError> {
        if let Some(type_name) = node.attribute("type") {
            let name = resolve_qname(node, type_name)?;
            if name.namespace.as_deref() == Some(XSD_NAMESPACE) {
                return Ok(if name.local == "anyType" { TypeDef::AnyType } else { TypeDef::Simple });
            }
            return Ok(TypeDef::Named(name));
        }
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "complexType" => return Ok(TypeDef::Complex(Box::new(self.complex_type(child)?))),
                "simpleType" => return Ok(TypeDef::Simple),
                _ => {}
            }
        }
        Ok(TypeDef::AnyType)
    }

    fn complex_type(&self, node: Node) -> Result<ComplexType, SchemaError> {
        let mut ct = ComplexType {
            mixed: node.attribute("mixed") == Some("true"),
            content: Content::Empty,
            attributes: AttributeSet::default(),
            derivation: Derivation::None,
        };
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "sequence" | "choice" | "all" | "group" => ct.content = Content::Elements(self.particle(child)?),
                "simpleContent" => {
                    ct.content = Content::Simple;
                    if let Some(derivation) = xsd_children(child).next() {
                        ct.derivation = self.derivation(derivation)?;
                        self.collect_attributes(derivation, &mut ct.attributes)?;
                    }
                }
                "complexContent" => {
                    if child.attribute("mixed") == Some("true") {
                        ct.mixed = true;
                    }
                    if let Some(derivation) = xsd_children(child).next() {
                        ct.derivation = self.derivation(derivation)?;
                        for part in xsd_children(derivation) {
                            if matches!(part.tag_name().name(), "sequence" | "choice" | "all" | "group") {
                                ct.content = Content::Elements(self.particle(part)?);
                            }
                        }
                        self.collect_attributes(derivation, &mut ct.attributes)?;
                    }
                }
                _ => {}
            }
        }
        self.collect_attributes(node, &mut ct.attributes)?;
        Ok(ct)
    }

    fn derivation(&self, node: Node) -> Result<Derivation, SchemaError> {
        let base = resolve_qname(node, required(node, "base")?)?;
        match node.tag_name().name() {
            "extension" => Ok(Derivation::Extension(base)),
            "restriction" => Ok(Derivation::Restriction(base)),
            other => Err(SchemaError::Invalid(format!("unexpected xs:{} in type content", other))),
        }
    }

    fn particle(&self, node: Node) -> Result<Particle, SchemaError> {
        let min = match node.attribute("minOccurs") {
            Some(value) => parse_occurs(value)?,
            None => 1,
        };
        let max = match node.attribute("maxOccurs") {
            Some("unbounded") => None,
            Some(value) => Some(parse_occurs(value)?),
            None => Some(1),
        };
        let term = match node.tag_name().name() {
            "element" => match node.attribute("ref") {
                Some(reference) => Term::ElementRef(resolve_qname(node, reference)?),
                None => Term::Element(Box::new(ElementDecl {
                    name: self.local_element_name(node)?,
                    type_def: self.element_type(node)?,
                })),
            },
            "group" => Term::Group(resolve_qname(node, required(node, "ref")?)?),
            "sequence" => Term::Sequence(self.particles(node)?),
            "choice" => Term::Choice(self.particles(node)?),
            "all" => Term::All(self.particles(node)?),
            "any" => Term::Any(self.wildcard(node)),
            other => return Err(SchemaError::Invalid(format!("xs:{} is not a particle", other))),
        };
        Ok(Particle { min, max, term })
    }

    fn particles(&self, node: Node) -> Result<Vec<Particle>, SchemaError> {
        xsd_children(node)
            .filter(|c| c.tag_name().name() != "annotation")
            .map(|c| self.particle(c))
            .collect()
    }

    fn wildcard(&self, node: Node) -> Wildcard {
        match node.attribute("namespace").unwrap_or("##any") {
            "##any" => Wildcard::Any,
            "##other" => Wildcard::Other(self.target_namespace.clone()),
            list => Wildcard::List(
                list.split_whitespace()
                    .map(|token| match token {
                        "##local" => None,
                        "##targetNamespace" => self.target_namespace.clone(),
                        uri => Some(uri.to_string()),
                    })
                    .collect(),
            ),
        }
    }

    fn attribute_set(&self, node: Node) -> Result<AttributeSet, SchemaError> {
        let mut set = AttributeSet::default();
        self.collect_attributes(node, &mut set)?;
        Ok(set)
    }

    fn collect_attributes(&self, node: Node, set: &mut AttributeSet) -> Result<(), SchemaError> {
        for child in xsd_children(node) {
            match child.tag_name().name() {
                "attribute" => {
                    let name = match child.attribute("ref") {
                        Some(reference) => resolve_qname(child, reference)?,
                        None => {
                            let qualified = match child.attribute("form") {
                                Some(form) => form == "qualified",
                                None => self.attributes_qualified,
                            };
                            let namespace = if qualified { self.target_namespace.as_deref() } else { None };
                            ExpandedName::new(namespace, required(child, "name")?)
                        }
                    };
                    let usage = match child.attribute("use") {
                        Some("required") => AttributeUse::Required,
                        Some("prohibited") => AttributeUse::Prohibited,
                        _ => AttributeUse::Optional,
                    };
                    set.attributes.push(AttributeDecl { name, usage });
                }
                "attributeGroup" => set.groups.push(resolve_qname(child, required(child, "ref")?)?),
                "anyAttribute" => set.any = Some(self.wildcard(child)),
                _ => {}
            }
        }
        Ok(())
    }
}

struct ReferenceCheck<'s> {
    schema: &'s XsdSchema,
}

impl ReferenceCheck<'_> {
    fn type_def(&mut self, type_def: &TypeDef) -> Result<(), SchemaError> {
        match type_def {
            TypeDef::Complex(ct) => self.complex_type(ct),
            TypeDef::Named(name)
                if !self.schema.complex_types.contains_key(name) && !self.schema.simple_types.contains(name) =>
            {
                Err(SchemaError::Invalid(format!("type {} is not declared", name)))
            }
            _ => Ok(()),
        }
    }

    fn complex_type(&mut self, ct: &ComplexType) -> Result<(), SchemaError> {
        if let Content::Elements(particle) = &ct.content {
            self.particle(particle)?;
        }
        self.attribute_set(&ct.attributes)
    }

    fn particle(&mut self, particle: &Particle) -> Result<(), SchemaError> {
        match &particle.term {
            Term::Element(decl) => self.type_def(&decl.type_def),
            Term::ElementRef(name) if !self.schema.elements.contains_key(name) => {
                Err(SchemaError::Invalid(format!("element {} is not declared", name)))
            }
            Term::Group(name) if !self.schema.groups.contains_key(name) => {
                Err(SchemaError::Invalid(format!("group {} is not declared", name)))
            }
            Term::Sequence(parts) | Term::Choice(parts) | Term::All(parts) => {
                parts.iter().try_for_each(|p| self.particle(p))
            }
            _ => Ok(()),
        }
    }

    fn attribute_set(&mut self, set: &AttributeSet) -> Result<(), SchemaError> {
        match set.groups.iter().find(|g| !self.schema.attribute_groups.contains_key(*g)) {
            Some(missing) => Err(SchemaError::Invalid(format!("attribute group {} is not declared", missing))),
            None => Ok(()),
        }
    }
}

fn is_xsd(node: Node, local: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(XSD_NAMESPACE) && node.tag_name().name() == local
}

fn xsd_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().namespace() == Some(XSD_NAMESPACE))
}

fn required<'a>(node: Node<'a, '_>, attr: &str) -> Result<&'a str, SchemaError> {
    node.attribute(attr).ok_or_else(|| {
        SchemaError::Invalid(format!(
            "xs:{} is missing the '{}' attribute",
            node.tag_name().name(),
            attr
        ))
    })
}

fn resolve_qname(node: Node, qname: &str) -> Result<ExpandedName, SchemaError> {
    let qname = qname.trim();
    let (prefix, local) = match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    };
    let namespace = node.lookup_namespace_uri(prefix);
    if prefix.is_some() && namespace.is_none() {
        return Err(SchemaError::Invalid(format!("prefix in '{}' is not declared", qname)));
    }
    Ok(ExpandedName::new(namespace, local))
}

fn parse_occurs(value: &str) -> Result<usize, SchemaError> {
    value
        .trim()
        .parse()
        .map_err(|_| SchemaError::Invalid(format!("invalid occurrence bound '{}'", value)))
}

// ============================================================================
// Validation
// ============================================================================

enum ResolvedType<'s> {
    Any,
    Simple,
    Complex(&'s ComplexType),
}

enum EffectiveContent<'s> {
    Empty,
    Simple,
    /// Parts matched one after the other.
    Elements(Vec<&'s Particle>),
}

struct Effective<'s> {
    mixed: bool,
    content: EffectiveContent<'s>,
    attributes: Vec<&'s AttributeSet>,
}

impl<'s> Effective<'s> {
    fn from_content(content: &'s Content, mixed: bool, attributes: &'s AttributeSet) -> Self {
        let content = match content {
            Content::Empty => EffectiveContent::Empty,
            Content::Simple => EffectiveContent::Simple,
            Content::Elements(particle) => EffectiveContent::Elements(vec![particle]),
        };
        Self {
            mixed,
            content,
            attributes: vec![attributes],
        }
    }
}

/// How a matched child element is validated further.
#[derive(Clone, Copy)]
enum Binding<'s> {
    Declared(&'s ElementDecl),
    Lax,
}

/// Possible end positions of a match, each with the bindings that got there.
type Matches<'s> = Vec<(usize, Vec<Binding<'s>>)>;

struct Validation<'s> {
    schema: &'s XsdSchema,
    errors: Vec<String>,
}

impl<'s> Validation<'s> {
    fn error(&mut self, path: String, message: String) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(format!("{}: {}", path, message));
        }
    }

    fn element(&mut self, node: Node, decl: &'s ElementDecl, path: &str) {
        match self.schema.resolve_type(&decl.type_def) {
            ResolvedType::Any => self.lax_children(node, path),
            ResolvedType::Simple => {
                self.attributes(node, &[], path);
                if let Some(child) = node.children().find(|c| c.is_element()) {
                    self.error(path.to_string(), format!("element {} not allowed in simple content", display_name(child)));
                }
            }
            ResolvedType::Complex(ct) => match self.schema.effective(ct, 0) {
                Ok(effective) => self.complex(node, &effective, path),
                Err(message) => self.error(path.to_string(), message),
            },
        }
    }

    fn lax_children(&mut self, node: Node, path: &str) {
        let schema = self.schema;
        for child in node.children().filter(|c| c.is_element()) {
            let child_path = format!("{}/{}", path, display_name(child));
            match schema.elements.get(&ExpandedName::of(child)) {
                Some(decl) => self.element(child, decl, &child_path),
                None => self.lax_children(child, &child_path),
            }
        }
    }

    fn attributes(&mut self, node: Node, sets: &[&'s AttributeSet], path: &str) {
        let schema = self.schema;
        let mut declared: Vec<&'s AttributeDecl> = Vec::new();
        let mut wildcards: Vec<&'s Wildcard> = Vec::new();
        let mut pending: Vec<&'s AttributeSet> = sets.to_vec();
        let mut seen_groups: HashSet<&'s ExpandedName> = HashSet::new();
        while let Some(set) = pending.pop() {
            declared.extend(set.attributes.iter());
            wildcards.extend(set.any.iter());
            for group in &set.groups {
                if seen_groups.insert(group)
                    && let Some(group_set) = schema.attribute_groups.get(group)
                {
                    pending.push(group_set);
                }
            }
        }

        for attr in node.attributes() {
            if attr.namespace() == Some(XSI_NAMESPACE) {
                continue;
            }
            let name = ExpandedName::new(attr.namespace(), attr.name());
            match declared.iter().find(|d| d.name == name) {
                Some(decl) if decl.usage == AttributeUse::Prohibited => {
                    self.error(path.to_string(), format!("attribute {} is prohibited", name));
                }
                Some(_) => {}
                None if wildcards.iter().any(|w| w.allows(attr.namespace())) => {}
                None => self.error(path.to_string(), format!("attribute {} is not allowed", name)),
            }
        }
        for decl in declared.iter().filter(|d| d.usage == AttributeUse::Required) {
            let present = node.attributes().any(|a| ExpandedName::new(a.namespace(), a.name()) == decl.name);
            if !present {
                self.error(path.to_string(), format!("required attribute {} is missing", decl.name));
            }
        }
    }

    fn complex(&mut self, node: Node, effective: &Effective<'s>, path: &str) {
        self.attributes(node, &effective.attributes, path);

        let text_allowed = effective.mixed || matches!(effective.content, EffectiveContent::Simple);
        if !text_allowed
            && node
                .children()
                .any(|c| c.is_text() && c.text().is_some_and(|t| !t.trim().is_empty()))
        {
            self.error(path.to_string(), "text is not allowed in element-only content".to_string());
        }

        let children: Vec<Node> = node.children().filter(|c| c.is_element()).collect();
        match &effective.content {
            EffectiveContent::Empty | EffectiveContent::Simple => {
                if let Some(child) = children.first() {
                    self.error(path.to_string(), format!("element {} is not allowed here", display_name(*child)));
                }
            }
            EffectiveContent::Elements(parts) => {
                let matches = self.sequence(parts.iter().copied(), &children, 0);
                match matches.into_iter().find(|(end, _)| *end == children.len()) {
                    Some((_, bindings)) => {
                        for (child, binding) in children.iter().zip(bindings) {
                            let child_path = format!("{}/{}", path, display_name(*child));
                            match binding {
                                Binding::Declared(decl) => self.element(*child, decl, &child_path),
                                Binding::Lax => self.lax_children(*child, &child_path),
                            }
                        }
                    }
                    None => {
                        let reached = self
                            .sequence(parts.iter().copied(), &children, 0)
                            .iter()
                            .map(|(end, _)| *end)
                            .max();
                        let message = match reached {
                            Some(end) if end < children.len() => {
                                format!("element {} is not expected here", display_name(children[end]))
                            }
                            _ => "content is incomplete".to_string(),
                        };
                        self.error(path.to_string(), message);
                    }
                }
            }
        }
    }

    fn sequence<I>(&self, parts: I, children: &[Node], start: usize) -> Matches<'s>
    where
        I: IntoIterator<Item = &'s Particle>,
    {
        let mut states: Matches<'s> = vec![(start, Vec::new())];
        for part in parts {
            let mut next = Vec::new();
            for (pos, bindings) in &states {
                for (end, more) in self.particle(part, children, *pos) {
                    let mut combined = bindings.clone();
                    combined.extend(more);
                    push_unique(&mut next, (end, combined));
                }
            }
            if next.is_empty() {
                return next;
            }
            states = next;
        }
        states
    }

    fn particle(&self, particle: &'s Particle, children: &[Node], start: usize) -> Matches<'s> {
        let mut results: Matches<'s> = Vec::new();
        if particle.min == 0 {
            results.push((start, Vec::new()));
        }
        let max = particle.max.unwrap_or(usize::MAX);
        let mut frontier: Matches<'s> = vec![(start, Vec::new())];
        let mut count = 0;
        while count < max && !frontier.is_empty() {
            count += 1;
            let mut next = Vec::new();
            for (pos, bindings) in &frontier {
                for (end, more) in self.term(&particle.term, children, *pos) {
                    // Past the minimum, only repetitions that consume input count.
                    if end == *pos && count > particle.min {
                        continue;
                    }
                    let mut combined = bindings.clone();
                    combined.extend(more);
                    push_unique(&mut next, (end, combined));
                }
            }
            if count >= particle.min {
                for state in &next {
                    push_unique(&mut results, state.clone());
                }
            }
            frontier = next;
        }
        results
    }

    fn term(&self, term: &'s Term, children: &[Node], start: usize) -> Matches<'s> {
        match term {
            Term::Element(decl) => self.element_term(decl, children, start),
            Term::ElementRef(name) => match self.schema.elements.get(name) {
                Some(decl) => self.element_term(decl, children, start),
                None => Vec::new(),
            },
            Term::Group(name) => match self.schema.groups.get(name) {
                Some(particle) => self.particle(particle, children, start),
                None => Vec::new(),
            },
            Term::Sequence(parts) => self.sequence(parts.iter(), children, start),
            Term::Choice(parts) => {
                let mut results = Vec::new();
                for part in parts {
                    for state in self.particle(part, children, start) {
                        push_unique(&mut results, state);
                    }
                }
                results
            }
            Term::All(parts) => {
                let mut results = Vec::new();
                self.all(parts, &mut vec![false; parts.len()], children, start, Vec::new(), &mut results);
                results
            }
            Term::Any(wildcard) => match children.get(start) {
                Some(child) if wildcard.allows(child.tag_name().namespace()) => {
                    let binding = match self.schema.elements.get(&ExpandedName::of(*child)) {
                        Some(decl) => Binding::Declared(decl),
                        None => Binding::Lax,
                    };
                    vec![(start + 1, vec![binding])]
                }
                _ => Vec::new(),
            },
        }
    }

    fn element_term(&self, decl: &'s ElementDecl, children: &[Node], start: usize) -> Matches<'s> {
        match children.get(start) {
            Some(child) if ExpandedName::of(*child) == decl.name => {
                vec![(start + 1, vec![Binding::Declared(decl)])]
            }
            _ => Vec::new(),
        }
    }

    /// Each part of an `xs:all` at most once, in any order.
    fn all(
        &self,
        parts: &'s [Particle],
        used: &mut [bool],
        children: &[Node],
        pos: usize,
        bindings: Vec<Binding<'s>>,
        results: &mut Matches<'s>,
    ) {
        let complete = parts.iter().zip(used.iter()).all(|(p, u)| *u || p.min == 0);
        if complete {
            push_unique(results, (pos, bindings.clone()));
        }
        for index in 0..parts.len() {
            if used[index] {
                continue;
            }
            let single = &parts[index];
            for (end, more) in self.term(&single.term, children, pos) {
                if end == pos {
                    continue;
                }
                let mut combined = bindings.clone();
                combined.extend(more);
                used[index] = true;
                self.all(parts, used, children, end, combined, results);
                used[index] = false;
            }
        }
    }
}

fn push_unique<'s>(matches: &mut Matches<'s>, state: (usize, Vec<Binding<'s>>)) {
    if !matches.iter().any(|(end, _)| *end == state.0) {
        matches.push(state);
    }
}

/// The element name as the document spells it, for messages.
fn display_name(node: Node) -> String {
    let tag = node.tag_name();
    match tag.namespace().and_then(|ns| node.lookup_prefix(ns)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, tag.name()),
        _ => tag.name().to_string(),
    }
}
