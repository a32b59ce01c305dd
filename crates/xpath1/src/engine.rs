//! The evaluation engine for executing a parsed XPath AST against a generic `DataSourceNode`.

use super::ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::{axes, functions, operators};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Represents the possible result types of an XPath expression evaluation.
///
/// Node-sets are always kept in document order without duplicates.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue<N> {
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// Coerces the XPath value to a boolean as per XPath 1.0 rules.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
        }
    }

    /// Coerces the XPath value to a number as per XPath 1.0 rules.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::NodeSet(nodes) => nodes
                .first()
                .map(|n| string_to_number(&n.string_value()))
                .unwrap_or(f64::NAN),
        }
    }

    pub fn into_node_set(self, function: &str) -> Result<Vec<N>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError(format!(
                "{} expects a node-set, found {}",
                function,
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::String(_) => "string",
            XPathValue::Number(_) => "number",
            XPathValue::Boolean(_) => "boolean",
        }
    }
}

impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    /// Coerces the XPath value to a string as per XPath 1.0 rules.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => match nodes.first() {
                Some(node) => f.write_str(&node.string_value()),
                None => Ok(()),
            },
            XPathValue::String(s) => f.write_str(s),
            XPathValue::Number(n) => f.write_str(&format_number(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Converts a number to its XPath string form: integers carry no fraction,
/// and there is never an exponent.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// Parses the XPath `Number` production; anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let well_formed = !digits.is_empty()
        && digits != "."
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if well_formed {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Resolves `$name` references during evaluation.
pub trait VariableScope<N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>>;
}

impl<N: Clone> VariableScope<N> for HashMap<String, XPathValue<N>> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.get(name).cloned()
    }
}

/// Pre-computed `xsl:key` tables: key name, then key value, then matching
/// nodes in document order.
pub type KeyIndex<N> = HashMap<String, HashMap<String, Vec<N>>>;

/// A container for all state needed during expression evaluation.
/// `'a` is the lifetime of the underlying data source.
/// `'d` is the lifetime of the evaluation context itself.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    /// The XSLT current node, returned by `current()`. It stays fixed while
    /// predicates move the context node.
    pub current_node: N,
    pub context_position: usize, // 1-based index
    pub context_size: usize,
    pub variables: &'d dyn VariableScope<N>,
    pub keys: &'d KeyIndex<N>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    pub fn new(
        context_node: N,
        root_node: N,
        variables: &'d dyn VariableScope<N>,
        keys: &'d KeyIndex<N>,
    ) -> Self {
        Self {
            context_node,
            root_node,
            current_node: context_node,
            context_position: 1,
            context_size: 1,
            variables,
            keys,
            _marker: PhantomData,
        }
    }

    /// Sets the position and size of the context node within its node list.
    pub fn at(mut self, position: usize, size: usize) -> Self {
        self.context_position = position;
        self.context_size = size;
        self
    }

    /// A context for a predicate: same variables and current node, new focus.
    pub fn with_focus(&self, node: N, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            root_node: self.root_node,
            current_node: self.current_node,
            context_position: position,
            context_size: size,
            variables: self.variables,
            keys: self.keys,
            _marker: PhantomData,
        }
    }
}

/// Evaluates a compiled expression and returns a concrete `XPathValue`.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            let nodes = evaluate_location_path(path, e_ctx)?;
            Ok(XPathValue::NodeSet(nodes))
        }
        Expression::Variable(name) => e_ctx
            .variables
            .lookup(name)
            .ok_or_else(|| XPathError::UnknownVariable(name.clone())),
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx)
        }
        Expression::Filter {
            primary,
            predicates,
        } => {
            let nodes = evaluate(primary, e_ctx)?.into_node_set("a filter expression")?;
            Ok(XPathValue::NodeSet(apply_predicates(nodes, predicates, e_ctx)?))
        }
        Expression::BinaryOp { left, op, right } => match op {
            BinaryOperator::Or => Ok(XPathValue::Boolean(
                evaluate(left, e_ctx)?.to_bool() || evaluate(right, e_ctx)?.to_bool(),
            )),
            BinaryOperator::And => Ok(XPathValue::Boolean(
                evaluate(left, e_ctx)?.to_bool() && evaluate(right, e_ctx)?.to_bool(),
            )),
            _ => {
                let left_val = evaluate(left, e_ctx)?;
                let right_val = evaluate(right, e_ctx)?;
                operators::evaluate(*op, left_val, right_val)
            }
        },
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-val.to_number())),
            }
        }
    }
}

fn evaluate_location_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut current_nodes = if let Some(start_expr) = &path.start_point {
        evaluate(start_expr, e_ctx)?.into_node_set("a path step")?
    } else if path.is_absolute {
        vec![e_ctx.root_node]
    } else {
        vec![e_ctx.context_node]
    };

    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Evaluates one step from every context node and merges the results into
/// document order.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut results = Vec::new();
    for &node in context_nodes {
        let mut candidates = axes::collect(step.axis, node);
        candidates.retain(|n| matches_node_test(n, &step.node_test, step.axis));
        let selected = apply_predicates(candidates, &step.predicates, e_ctx)?;
        results.extend(selected);
    }
    if step.axis.is_reverse() || context_nodes.len() > 1 {
        results.sort();
        results.dedup();
    }
    Ok(results)
}

pub fn matches_node_test<'a, N>(node: &N, test: &NodeTest, axis: Axis) -> bool
where
    N: DataSourceNode<'a>,
{
    let principal = if axis == Axis::Attribute {
        NodeType::Attribute
    } else {
        NodeType::Element
    };
    match test {
        NodeTest::Wildcard => node.node_type() == principal,
        NodeTest::Name(name_test) => {
            node.node_type() == principal
                && node
                    .name()
                    .is_some_and(|q| name_test.matches(q.namespace, q.local_part))
        }
        NodeTest::NamespaceWildcard { namespace, .. } => {
            node.node_type() == principal
                && node
                    .name()
                    .is_some_and(|q| q.namespace == namespace.as_deref())
        }
        NodeTest::NodeType(ntt) => match ntt {
            NodeTypeTest::Text => node.node_type() == NodeType::Text,
            NodeTypeTest::Comment => node.node_type() == NodeType::Comment,
            NodeTypeTest::ProcessingInstruction(target) => {
                node.node_type() == NodeType::ProcessingInstruction
                    && target.as_deref().is_none_or(|t| {
                        node.name().is_some_and(|q| q.local_part == t)
                    })
            }
            NodeTypeTest::Node => true,
        },
    }
}

/// Filters `nodes` (in axis order) through each predicate in turn.
pub fn apply_predicates<'a, N>(
    nodes: Vec<N>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut final_nodes = nodes;
    for predicate in predicates {
        let context_size = final_nodes.len();
        let mut kept = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.iter().enumerate() {
            let predicate_ctx = e_ctx.with_focus(*node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(*node);
            }
        }
        final_nodes = kept;
    }
    Ok(final_nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceMap;
    use crate::parser::parse_expression;
    use crate::xml::{XmlNode, parse_document};

    const DOC: &str = r#"<cei:text xmlns:cei="http://www.monasterium.net/NS/cei">
        <cei:body>
            <cei:p n="1">Alpha</cei:p>
            <cei:p n="2">Beta</cei:p>
            <cei:div><cei:p n="3">Gamma</cei:p></cei:div>
        </cei:body>
    </cei:text>"#;

    fn namespaces() -> NamespaceMap {
        NamespaceMap::new().with("c", "http://www.monasterium.net/NS/cei")
    }

    fn eval<'a>(
        doc: &'a roxmltree::Document<'a>,
        vars: &HashMap<String, XPathValue<XmlNode<'a, 'a>>>,
        xpath: &str,
    ) -> XPathValue<XmlNode<'a, 'a>> {
        let root = XmlNode::root(doc);
        let keys = KeyIndex::new();
        let ctx = EvaluationContext::new(root, root, vars, &keys);
        let expr = parse_expression(xpath, &namespaces()).unwrap();
        evaluate(&expr, &ctx).unwrap()
    }

    fn strings(value: XPathValue<XmlNode<'_, '_>>) -> Vec<String> {
        match value {
            XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
            other => panic!("expected a node-set, got {:?}", other),
        }
    }

    #[test]
    fn test_descendants_come_back_in_document_order() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        assert_eq!(strings(eval(&doc, &vars, "//c:p")), ["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_unprefixed_test_does_not_match_namespaced_element() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        assert!(strings(eval(&doc, &vars, "//p")).is_empty());
    }

    #[test]
    fn test_positional_predicate_is_per_context_node() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        // The first c:p child of every parent, not the first of the whole set.
        assert_eq!(strings(eval(&doc, &vars, "//c:p[1]")), ["Alpha", "Gamma"]);
        assert_eq!(strings(eval(&doc, &vars, "(//c:p)[1]")), ["Alpha"]);
        assert_eq!(strings(eval(&doc, &vars, "//c:p[last()]")), ["Beta", "Gamma"]);
    }

    #[test]
    fn test_reverse_axis_positions() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        let nearest = eval(&doc, &vars, "//c:p[@n='3']/ancestor::*[1]");
        let XPathValue::NodeSet(nodes) = nearest else {
            panic!("expected a node-set");
        };
        assert_eq!(nodes[0].name().unwrap().local_part, "div");
        assert_eq!(
            strings(eval(&doc, &vars, "//c:p[@n='2']/preceding-sibling::c:p[1]")),
            ["Alpha"]
        );
    }

    #[test]
    fn test_attribute_selection_and_comparison() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        assert_eq!(strings(eval(&doc, &vars, "//c:p[@n > 1]")), ["Beta", "Gamma"]);
        assert_eq!(strings(eval(&doc, &vars, "//c:p/@n")), ["1", "2", "3"]);
        assert_eq!(eval(&doc, &vars, "count(//@n)"), XPathValue::Number(3.0));
    }

    #[test]
    fn test_union_is_sorted_and_deduplicated() {
        let doc = parse_document(DOC).unwrap();
        let vars = HashMap::new();
        assert_eq!(
            strings(eval(&doc, &vars, "//c:div/c:p | //c:p[1] | //c:p[@n='2']")),
            ["Alpha", "Beta", "Gamma"]
        );
    }

    #[test]
    fn test_variables() {
        let doc = parse_document(DOC).unwrap();
        let mut vars = HashMap::new();
        vars.insert("label".to_string(), XPathValue::String("x".to_string()));
        assert_eq!(eval(&doc, &vars, "concat($label, '!')"), XPathValue::String("x!".to_string()));

        let root = XmlNode::root(&doc);
        let keys = KeyIndex::new();
        let ctx = EvaluationContext::new(root, root, &vars, &keys);
        let expr = parse_expression("$missing", &namespaces()).unwrap();
        assert_eq!(
            evaluate(&expr, &ctx).unwrap_err(),
            XPathError::UnknownVariable("missing".to_string())
        );
    }

    #[test]
    fn test_path_from_variable_node_set() {
        let doc = parse_document(DOC).unwrap();
        let bodies = eval(&doc, &HashMap::new(), "//c:body");
        let mut vars = HashMap::new();
        vars.insert("body".to_string(), bodies);
        assert_eq!(strings(eval(&doc, &vars, "$body/c:p[2]")), ["Beta"]);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1000000000000000000000");
    }

    #[test]
    fn test_string_to_number_is_strict() {
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number("-.5"), -0.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("+1").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("").is_nan());
    }
}
