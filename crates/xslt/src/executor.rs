//! Applies a `CompiledStylesheet` to a source tree.
//!
//! The executor implements the XSLT "push" model: starting at the root node it
//! finds the best template rule for each node, runs its body, and writes the
//! result through an `OutputBuilder`. The handlers for individual instructions
//! live in `executor_handlers`.

use crate::ast::{
    CompiledStylesheet, Instruction, SortDataType, SortKey, SortOrder, SpaceTest, Template,
    TemplateRule, VariableDecl, VariableValue,
};
use crate::avt::{AttributeValueTemplate, AvtPart};
use crate::error::ExecutionError;
use crate::executor_handlers::{
    apply_templates, call_template, control_flow, copy, for_each, literals, variables,
};
use crate::output::OutputBuilder;
use crate::pattern::key_values;
use crate::result::{ResultNode, TreeBuilder};
use cei2tei_xpath1::datasource::{DataSourceNode, NodeType, QName};
use cei2tei_xpath1::namespaces::XML_NAMESPACE;
use cei2tei_xpath1::{
    Axis, EvaluationContext, Expression, KeyIndex, VariableScope, XPathError, XPathValue, axes,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Nesting limit for template invocations. Runaway recursion in a stylesheet
/// fails the document instead of overflowing the worker's stack.
pub const MAX_TEMPLATE_DEPTH: usize = 3000;

/// The value bound to a variable or parameter.
#[derive(Debug, Clone)]
pub(crate) enum Binding<N> {
    Value(XPathValue<N>),
    /// A result tree fragment built from the variable's content.
    Fragment(Vec<ResultNode>),
}

impl<'a, N: DataSourceNode<'a>> Binding<N> {
    /// What an XPath expression sees when it reads the variable. A fragment
    /// is only usable through its string value.
    fn to_xpath(&self) -> XPathValue<N> {
        match self {
            Binding::Value(value) => value.clone(),
            Binding::Fragment(nodes) => {
                XPathValue::String(nodes.iter().map(ResultNode::string_value).collect())
            }
        }
    }
}

/// A stateful executor that builds a result tree by processing a
/// `CompiledStylesheet` against a generic `DataSourceNode`.
pub struct TemplateExecutor<'s, 'a, N: DataSourceNode<'a>> {
    pub(crate) stylesheet: &'s CompiledStylesheet,
    root_node: N,
    keys: KeyIndex<N>,
    globals: HashMap<String, Binding<N>>,
    /// Local variables and parameters, innermost last.
    locals: Vec<(String, Binding<N>)>,
    /// Start of the current template's frame within `locals`; bindings below
    /// it belong to callers and are not visible.
    frame_base: usize,
    depth: usize,
    _marker: PhantomData<&'a ()>,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> VariableScope<N> for TemplateExecutor<'s, 'a, N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.binding(name).map(Binding::to_xpath)
    }
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> TemplateExecutor<'s, 'a, N> {
    /// Prepares an executor for one source tree: indexes `xsl:key`
    /// declarations and evaluates global variables.
    pub fn new(stylesheet: &'s CompiledStylesheet, root_node: N) -> Result<Self, ExecutionError> {
        let mut executor = Self {
            stylesheet,
            root_node,
            keys: KeyIndex::new(),
            globals: HashMap::new(),
            locals: Vec::new(),
            frame_base: 0,
            depth: 0,
            _marker: PhantomData,
        };
        executor.keys = executor.build_keys()?;
        executor.evaluate_globals()?;
        Ok(executor)
    }

    /// The main public entry point: applies templates to the root node and
    /// returns the top-level result nodes.
    pub fn build_tree(&mut self) -> Result<Vec<ResultNode>, ExecutionError> {
        let mut builder = TreeBuilder::new();
        let root = self.root_node;
        self.apply_templates_to_nodes(&[root], None, &[], &mut builder)?;
        Ok(builder.into_nodes())
    }

    fn build_keys(&self) -> Result<KeyIndex<N>, ExecutionError> {
        let mut index = KeyIndex::new();
        if self.stylesheet.keys.is_empty() {
            return Ok(index);
        }
        let no_variables: HashMap<String, XPathValue<N>> = HashMap::new();
        let no_keys = KeyIndex::new();

        let mut nodes = vec![self.root_node];
        for node in axes::collect(Axis::Descendant, self.root_node) {
            nodes.push(node);
            nodes.extend(node.attributes());
        }

        for key in &self.stylesheet.keys {
            let table = index.entry(key.name.clone()).or_insert_with(HashMap::new);
            for &node in &nodes {
                let e_ctx = EvaluationContext::new(node, self.root_node, &no_variables, &no_keys);
                if !key.pattern.matches(node, &e_ctx)? {
                    continue;
                }
                let value = cei2tei_xpath1::evaluate(&key.use_expr, &e_ctx)?;
                for key_value in key_values(value) {
                    let matched: &mut Vec<N> = table.entry(key_value).or_default();
                    if matched.last() != Some(&node) {
                        matched.push(node);
                    }
                }
            }
        }
        Ok(index)
    }

    /// Globals may refer to each other in any order. Each pass evaluates what
    /// it can; a pass that makes no progress reports the first failure.
    fn evaluate_globals(&mut self) -> Result<(), ExecutionError> {
        let mut pending: Vec<&'s VariableDecl> = self.stylesheet.globals.iter().collect();
        let root = self.root_node;
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut first_error = None;
            for decl in pending.iter().copied() {
                match self.evaluate_binding(&decl.value, root, 1, 1) {
                    Ok(binding) => {
                        self.globals.insert(decl.name.clone(), binding);
                    }
                    Err(e @ ExecutionError::XPath(XPathError::UnknownVariable(_))) => {
                        first_error.get_or_insert(e);
                        deferred.push(decl);
                    }
                    Err(e) => return Err(e),
                }
            }
            if deferred.len() == pending.len() {
                return Err(first_error.unwrap_or_else(|| {
                    ExecutionError::Execution("global variables could not be evaluated".to_string())
                }));
            }
            pending = deferred;
        }
        Ok(())
    }

    fn binding(&self, name: &str) -> Option<&Binding<N>> {
        self.locals[self.frame_base..]
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
            .or_else(|| self.globals.get(name))
    }

    /// The result tree fragment bound to `name`, if that is what it holds.
    pub(crate) fn fragment(&self, name: &str) -> Option<&[ResultNode]> {
        match self.binding(name) {
            Some(Binding::Fragment(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub(crate) fn bind_local(&mut self, name: String, binding: Binding<N>) {
        self.locals.push((name, binding));
    }

    /// Evaluates an XPath expression with `context_node` as context and
    /// current node.
    pub(crate) fn evaluate(
        &self,
        expr: &Expression,
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<XPathValue<N>, ExecutionError> {
        let e_ctx = EvaluationContext::new(context_node, self.root_node, self, &self.keys)
            .at(context_position, context_size);
        Ok(cei2tei_xpath1::evaluate(expr, &e_ctx)?)
    }

    /// Evaluates an AVT and returns the resulting string.
    pub(crate) fn evaluate_avt(
        &self,
        avt: &AttributeValueTemplate,
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<String, ExecutionError> {
        let mut result = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(s) => result.push_str(s),
                AvtPart::Expr(expression) => {
                    let value =
                        self.evaluate(expression, context_node, context_position, context_size)?;
                    result.push_str(&value.to_string());
                }
            }
        }
        Ok(result)
    }

    pub(crate) fn evaluate_binding(
        &mut self,
        value: &'s VariableValue,
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<Binding<N>, ExecutionError> {
        match value {
            VariableValue::Select(expr) => Ok(Binding::Value(self.evaluate(
                expr,
                context_node,
                context_position,
                context_size,
            )?)),
            VariableValue::Content(body) => {
                let mut fragment = TreeBuilder::new();
                self.execute_body(body, context_node, context_position, context_size, &mut fragment)?;
                Ok(Binding::Fragment(fragment.into_nodes()))
            }
            VariableValue::Empty => Ok(Binding::Value(XPathValue::String(String::new()))),
        }
    }

    /// Evaluates `xsl:with-param` values in the caller's scope.
    pub(crate) fn evaluate_params(
        &mut self,
        params: &'s [VariableDecl],
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<Vec<(String, Binding<N>)>, ExecutionError> {
        params
            .iter()
            .map(|param| {
                let binding =
                    self.evaluate_binding(&param.value, context_node, context_position, context_size)?;
                Ok((param.name.clone(), binding))
            })
            .collect()
    }

    /// Runs the instructions of a body; variables it declares go out of scope
    /// at its end.
    pub(crate) fn execute_body(
        &mut self,
        body: &'s [Instruction],
        context_node: N,
        context_position: usize,
        context_size: usize,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let scope = self.locals.len();
        for instruction in body {
            self.execute_instruction(instruction, context_node, context_position, context_size, builder)?;
        }
        self.locals.truncate(scope);
        Ok(())
    }

    /// Produces the text of a body, as needed by `xsl:attribute`,
    /// `xsl:comment`, `xsl:processing-instruction` and `xsl:message`.
    pub(crate) fn execute_body_to_text(
        &mut self,
        body: &'s [Instruction],
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<String, ExecutionError> {
        let mut text = TreeBuilder::new();
        self.execute_body(body, context_node, context_position, context_size, &mut text)?;
        Ok(text.into_text())
    }

    fn execute_instruction(
        &mut self,
        instruction: &'s Instruction,
        context_node: N,
        context_position: usize,
        context_size: usize,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match instruction {
            Instruction::Text(text) => builder.add_text(text),
            Instruction::ValueOf { select } => {
                let value = self.evaluate(select, context_node, context_position, context_size)?;
                builder.add_text(&value.to_string());
            }
            Instruction::LiteralElement {
                name,
                namespaces,
                attributes,
                attribute_sets,
                body,
            } => literals::handle_literal_element(
                self,
                name,
                namespaces,
                attributes,
                attribute_sets,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::Element {
                name,
                namespace,
                context,
                attribute_sets,
                body,
            } => literals::handle_element(
                self,
                name,
                namespace.as_ref(),
                context,
                attribute_sets,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::Attribute {
                name,
                namespace,
                context,
                body,
            } => literals::handle_attribute(
                self,
                name,
                namespace.as_ref(),
                context,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::Comment { body } => literals::handle_comment(
                self,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::ProcessingInstruction { name, body } => {
                literals::handle_processing_instruction(
                    self,
                    name,
                    body,
                    context_node,
                    context_position,
                    context_size,
                    builder,
                )?
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                sort_keys,
                params,
            } => apply_templates::handle_apply_templates(
                self,
                select.as_ref(),
                mode.as_deref(),
                sort_keys,
                params,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::CallTemplate { name, params } => call_template::handle_call_template(
                self,
                name,
                params,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::ForEach {
                select,
                sort_keys,
                body,
            } => for_each::handle_for_each(
                self,
                select,
                sort_keys,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::If { test, body } => {
                let condition = self
                    .evaluate(test, context_node, context_position, context_size)?
                    .to_bool();
                control_flow::handle_if(
                    self,
                    condition,
                    body,
                    context_node,
                    context_position,
                    context_size,
                    builder,
                )?
            }
            Instruction::Choose { whens, otherwise } => control_flow::handle_choose(
                self,
                whens,
                otherwise.as_deref(),
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::Message { body, terminate } => control_flow::handle_message(
                self,
                body,
                *terminate,
                context_node,
                context_position,
                context_size,
            )?,
            Instruction::Copy {
                attribute_sets,
                body,
            } => copy::handle_copy(
                self,
                attribute_sets,
                body,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::CopyOf { select } => copy::handle_copy_of(
                self,
                select,
                context_node,
                context_position,
                context_size,
                builder,
            )?,
            Instruction::Variable(decl) => variables::handle_variable(
                self,
                decl,
                context_node,
                context_position,
                context_size,
            )?,
        }
        Ok(())
    }

    /// Processes each node with its best-matching rule in `mode`, falling
    /// back to the built-in rules.
    pub(crate) fn apply_templates_to_nodes(
        &mut self,
        nodes: &[N],
        mode: Option<&str>,
        params: &[(String, Binding<N>)],
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let context_size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let context_position = i + 1;
            match self.find_matching_rule(node, mode, context_position, context_size)? {
                Some(rule) => {
                    let stylesheet = self.stylesheet;
                    let template = &stylesheet.templates[rule.template];
                    self.invoke_template(template, params, node, context_position, context_size, builder)?;
                }
                None => self.apply_builtin_template(node, mode, builder)?,
            }
        }
        Ok(())
    }

    fn apply_builtin_template(
        &mut self,
        node: N,
        mode: Option<&str>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match node.node_type() {
            NodeType::Root | NodeType::Element => {
                let children = self.strip_whitespace(node.children().collect());
                self.apply_templates_to_nodes(&children, mode, &[], builder)?;
            }
            NodeType::Text | NodeType::Attribute => builder.add_text(&node.string_value()),
            NodeType::Comment | NodeType::ProcessingInstruction => {}
        }
        Ok(())
    }

    fn find_matching_rule(
        &self,
        node: N,
        mode: Option<&str>,
        context_position: usize,
        context_size: usize,
    ) -> Result<Option<&'s TemplateRule>, ExecutionError> {
        let stylesheet = self.stylesheet;
        let Some(rules) = stylesheet.rules.get(&mode.map(str::to_string)) else {
            return Ok(None);
        };
        let e_ctx = EvaluationContext::new(node, self.root_node, self, &self.keys)
            .at(context_position, context_size);
        for rule in rules {
            if rule.pattern.matches(node, &e_ctx)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    /// Runs a template in a fresh variable frame. Parameters take the passed
    /// value, or their default evaluated in the new frame.
    pub(crate) fn invoke_template(
        &mut self,
        template: &'s Template,
        params: &[(String, Binding<N>)],
        context_node: N,
        context_position: usize,
        context_size: usize,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(ExecutionError::Execution(format!(
                "template nesting exceeded {} levels",
                MAX_TEMPLATE_DEPTH
            )));
        }
        self.depth += 1;
        let saved_base = self.frame_base;
        let saved_len = self.locals.len();
        self.frame_base = saved_len;

        let result = self.run_template(template, params, context_node, context_position, context_size, builder);

        self.locals.truncate(saved_len);
        self.frame_base = saved_base;
        self.depth -= 1;
        result
    }

    fn run_template(
        &mut self,
        template: &'s Template,
        params: &[(String, Binding<N>)],
        context_node: N,
        context_position: usize,
        context_size: usize,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        for param in &template.params {
            let binding = match params.iter().find(|(name, _)| *name == param.name) {
                Some((_, passed)) => passed.clone(),
                None => self.evaluate_binding(&param.value, context_node, context_position, context_size)?,
            };
            self.bind_local(param.name.clone(), binding);
        }
        self.execute_body(&template.body, context_node, context_position, context_size, builder)
    }

    /// Evaluates `select` to a node-set with stripped whitespace removed.
    pub(crate) fn select_nodes(
        &self,
        select: &Expression,
        instruction: &str,
        context_node: N,
        context_position: usize,
        context_size: usize,
    ) -> Result<Vec<N>, ExecutionError> {
        let nodes = self
            .evaluate(select, context_node, context_position, context_size)?
            .into_node_set(instruction)?;
        Ok(self.strip_whitespace(nodes))
    }

    pub(crate) fn strip_whitespace(&self, mut nodes: Vec<N>) -> Vec<N> {
        if !self.stylesheet.strip_space.is_empty() {
            nodes.retain(|&n| !self.is_stripped(n));
        }
        nodes
    }

    /// Whether `node` is a whitespace-only text node removed from the source
    /// tree by `xsl:strip-space`.
    pub(crate) fn is_stripped(&self, node: N) -> bool {
        if node.node_type() != NodeType::Text || self.stylesheet.strip_space.is_empty() {
            return false;
        }
        if !node
            .string_value()
            .chars()
            .all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
        {
            return false;
        }
        let Some(parent) = node.parent() else {
            return false;
        };
        let Some(name) = parent.name() else {
            return false;
        };
        let strip = best_space_match(&self.stylesheet.strip_space, &name);
        let preserve = best_space_match(&self.stylesheet.preserve_space, &name);
        strip > preserve && !xml_space_preserve(parent)
    }

    /// Sorts `nodes` by the given keys. The sort is stable, so nodes with
    /// equal keys keep document order.
    pub(crate) fn sort_nodes(&self, nodes: Vec<N>, sort_keys: &[SortKey]) -> Result<Vec<N>, ExecutionError> {
        if sort_keys.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (i, &node) in nodes.iter().enumerate() {
            let mut values = Vec::with_capacity(sort_keys.len());
            for key in sort_keys {
                let value = self.evaluate(&key.select, node, i + 1, size)?;
                values.push(match key.data_type {
                    SortDataType::Number => SortValue::Number(value.to_number()),
                    SortDataType::Text => SortValue::Text(value.to_string()),
                });
            }
            keyed.push((values, node));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for (key, (va, vb)) in sort_keys.iter().zip(a.iter().zip(b)) {
                let ordering = va.compare(vb);
                let ordering = match key.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, node)| node).collect())
    }
}

enum SortValue {
    Text(String),
    Number(f64),
}

impl SortValue {
    /// NaN sorts before every number.
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// How specifically a whitespace rule names an element: a full name beats
/// `prefix:*`, which beats `*`.
fn best_space_match(tests: &[SpaceTest], name: &QName) -> Option<u8> {
    tests
        .iter()
        .filter_map(|test| match test {
            SpaceTest::Any => Some(0),
            SpaceTest::Namespace(uri) => (name.namespace == Some(uri.as_str())).then_some(1),
            SpaceTest::Name(test) => test.matches(name.namespace, name.local_part).then_some(2),
        })
        .max()
}

/// The nearest `xml:space` on the element or its ancestors.
fn xml_space_preserve<'a, N: DataSourceNode<'a>>(element: N) -> bool {
    std::iter::successors(Some(element), |n| n.parent())
        .find_map(|n| {
            n.attributes().find_map(|attr| {
                let name = attr.name()?;
                (name.namespace == Some(XML_NAMESPACE) && name.local_part == "space")
                    .then(|| attr.string_value())
            })
        })
        .is_some_and(|value| value == "preserve")
}
