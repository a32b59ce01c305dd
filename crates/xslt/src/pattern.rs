//! A dedicated engine for evaluating XSLT `match` patterns.
//!
//! Patterns are parsed with the XPath parser and then checked against the
//! pattern grammar: unions of paths using only the child and attribute axes,
//! optionally anchored at `/`, `id(...)` or `key(...)`.
use cei2tei_xpath1::ast::{Axis, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
use cei2tei_xpath1::datasource::{DataSourceNode, NodeType};
use cei2tei_xpath1::engine::{apply_predicates, matches_node_test};
use cei2tei_xpath1::{EvaluationContext, NamespaceMap, XPathError, XPathValue, axes, evaluate};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    /// `/`: the previous step matches the parent.
    Child,
    /// `//`: the previous step matches some ancestor.
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
struct MatchStep {
    separator: Separator,
    axis: Axis,
    node_test: NodeTest,
    predicates: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    Relative,
    Root,
    /// An `id()` or `key()` call whose nodes start the path.
    Nodes(Expression),
}

/// A single location path within a pattern, e.g. `/cei:text//cei:p`.
#[derive(Debug, Clone, PartialEq)]
struct PathPattern {
    anchor: Anchor,
    steps: Vec<MatchStep>,
}

/// A compiled representation of an XSLT match pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// A pattern can be a union of multiple paths, e.g. `cei:p|cei:ab`.
    paths: Vec<PathPattern>,
    original_text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_text)
    }
}

impl Pattern {
    pub fn parse(text: &str, namespaces: &NamespaceMap) -> Result<Pattern, XPathError> {
        let expr = cei2tei_xpath1::parse_expression(text, namespaces)?;
        let mut paths = Vec::new();
        collect_alternatives(expr, &mut paths)
            .map_err(|message| XPathError::XPathParse(text.to_string(), message))?;
        Ok(Pattern {
            paths,
            original_text: text.trim().to_string(),
        })
    }

    /// Splits a union pattern into one pattern per alternative.
    pub fn alternatives(&self) -> Vec<Pattern> {
        self.paths
            .iter()
            .map(|p| Pattern {
                paths: vec![p.clone()],
                original_text: self.original_text.clone(),
            })
            .collect()
    }

    /// The default priority of a single-alternative pattern.
    pub fn default_priority(&self) -> f64 {
        match self.paths.as_slice() {
            [path] => path.default_priority(),
            paths => paths
                .iter()
                .map(PathPattern::default_priority)
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Evaluates if a given node matches this compiled pattern. `e_ctx`
    /// supplies variables and keys for predicates and anchors.
    pub fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        for path in &self.paths {
            if path.matches(node, e_ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn collect_alternatives(expr: Expression, out: &mut Vec<PathPattern>) -> Result<(), String> {
    match expr {
        Expression::BinaryOp {
            left,
            op: cei2tei_xpath1::BinaryOperator::Union,
            right,
        } => {
            collect_alternatives(*left, out)?;
            collect_alternatives(*right, out)
        }
        Expression::LocationPath(path) => {
            out.push(convert_path(path)?);
            Ok(())
        }
        call @ Expression::FunctionCall { .. } => {
            out.push(PathPattern {
                anchor: anchor_call(call)?,
                steps: Vec::new(),
            });
            Ok(())
        }
        other => Err(format!("'{:?}' is not allowed in a match pattern", other)),
    }
}

fn anchor_call(call: Expression) -> Result<Anchor, String> {
    match &call {
        Expression::FunctionCall { name, .. } if name == "id" || name == "key" => {
            Ok(Anchor::Nodes(call))
        }
        Expression::FunctionCall { name, .. } => {
            Err(format!("function '{}' cannot start a match pattern", name))
        }
        _ => Err("invalid pattern anchor".to_string()),
    }
}

fn convert_path(path: LocationPath) -> Result<PathPattern, String> {
    let anchor = match path.start_point {
        Some(start) => anchor_call(*start)?,
        None if path.is_absolute => Anchor::Root,
        None => Anchor::Relative,
    };

    let mut steps = Vec::new();
    let mut separator = Separator::Child;
    for step in path.steps {
        if step == Step::descendant_or_self() {
            separator = Separator::Descendant;
            continue;
        }
        match step.axis {
            Axis::Child | Axis::Attribute => {}
            other => return Err(format!("axis {:?} is not allowed in a match pattern", other)),
        }
        steps.push(MatchStep {
            separator,
            axis: step.axis,
            node_test: step.node_test,
            predicates: step.predicates,
        });
        separator = Separator::Child;
    }
    if separator == Separator::Descendant {
        return Err("a match pattern cannot end with '//'".to_string());
    }
    Ok(PathPattern { anchor, steps })
}

impl PathPattern {
    fn default_priority(&self) -> f64 {
        match (&self.anchor, self.steps.as_slice()) {
            (Anchor::Relative, [step]) if step.predicates.is_empty() => match &step.node_test {
                NodeTest::Name(_) => 0.0,
                NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(Some(_))) => 0.0,
                NodeTest::NamespaceWildcard { .. } => -0.25,
                NodeTest::Wildcard | NodeTest::NodeType(_) => -0.5,
            },
            _ => 0.5,
        }
    }

    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        if self.steps.is_empty() {
            return match &self.anchor {
                Anchor::Root => Ok(node.node_type() == NodeType::Root),
                Anchor::Nodes(expr) => Ok(anchor_nodes(expr, e_ctx)?.contains(&node)),
                Anchor::Relative => Ok(false),
            };
        }
        self.matches_from(self.steps.len() - 1, node, e_ctx)
    }

    /// Matches steps `0..=index` right to left, `node` standing for step `index`.
    fn matches_from<'a, N>(
        &self,
        index: usize,
        node: N,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let step = &self.steps[index];
        if !step.matches(node, e_ctx)? {
            return Ok(false);
        }
        let Some(parent) = node.parent() else {
            return Ok(false);
        };

        if index == 0 {
            return match (&self.anchor, step.separator) {
                (Anchor::Relative, _) => Ok(true),
                (Anchor::Root, Separator::Child) => Ok(parent.node_type() == NodeType::Root),
                (Anchor::Root, Separator::Descendant) => Ok(true),
                (Anchor::Nodes(expr), separator) => {
                    let anchors = anchor_nodes(expr, e_ctx)?;
                    match separator {
                        Separator::Child => Ok(anchors.contains(&parent)),
                        Separator::Descendant => {
                            Ok(axes::collect(Axis::AncestorOrSelf, parent)
                                .iter()
                                .any(|a| anchors.contains(a)))
                        }
                    }
                }
            };
        }

        match step.separator {
            Separator::Child => self.matches_from(index - 1, parent, e_ctx),
            Separator::Descendant => {
                for ancestor in axes::collect(Axis::AncestorOrSelf, parent) {
                    if self.matches_from(index - 1, ancestor, e_ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn anchor_nodes<'a, N>(expr: &Expression, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let root_ctx = e_ctx.with_focus(e_ctx.root_node, 1, 1);
    evaluate(expr, &root_ctx)?.into_node_set("a pattern anchor")
}

impl MatchStep {
    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let node_type = node.node_type();
        let on_axis = match self.axis {
            Axis::Attribute => node_type == NodeType::Attribute,
            _ => !matches!(node_type, NodeType::Attribute | NodeType::Root),
        };
        if !on_axis || !matches_node_test(&node, &self.node_test, self.axis) {
            return Ok(false);
        }
        if self.predicates.is_empty() {
            return Ok(true);
        }

        // Predicate positions count the siblings that pass the node test.
        let Some(parent) = node.parent() else {
            return Ok(false);
        };
        let mut candidates = axes::collect(self.axis, parent);
        candidates.retain(|n| matches_node_test(n, &self.node_test, self.axis));
        let survivors = apply_predicates(candidates, &self.predicates, e_ctx)?;
        Ok(survivors.contains(&node))
    }
}

/// Evaluates `value` for a node the way `xsl:key` collects its values.
pub(crate) fn key_values<'a, N>(value: XPathValue<N>) -> Vec<String>
where
    N: DataSourceNode<'a>,
{
    match value {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    }
}
