//! Built-in implementations of the XPath 1.0 core library and the XSLT 1.0
//! additions the transformer needs (`current`, `key`, `generate-id`, ...).

use super::engine::{EvaluationContext, XPathValue};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use crate::namespaces::XML_NAMESPACE;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Every function name `evaluate_function` understands.
pub const KNOWN_FUNCTIONS: &[&str] = &[
    "boolean",
    "ceiling",
    "concat",
    "contains",
    "count",
    "current",
    "false",
    "floor",
    "function-available",
    "generate-id",
    "id",
    "key",
    "lang",
    "last",
    "local-name",
    "name",
    "namespace-uri",
    "normalize-space",
    "not",
    "number",
    "position",
    "round",
    "starts-with",
    "string",
    "string-length",
    "substring",
    "substring-after",
    "substring-before",
    "sum",
    "system-property",
    "translate",
    "true",
];

pub fn is_known_function(name: &str) -> bool {
    KNOWN_FUNCTIONS.contains(&name)
}

/// Dispatches a function call to the correct implementation.
pub fn evaluate_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    match name {
        // Node-set
        "last" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Number(e_ctx.context_size as f64))
        }
        "position" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Number(e_ctx.context_position as f64))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let nodes = single(args).into_node_set(name)?;
            Ok(XPathValue::Number(nodes.len() as f64))
        }
        "local-name" => {
            let node = optional_node(name, args, e_ctx)?;
            Ok(XPathValue::String(
                node.and_then(|n| n.name())
                    .map(|q| q.local_part.to_string())
                    .unwrap_or_default(),
            ))
        }
        "name" => {
            let node = optional_node(name, args, e_ctx)?;
            Ok(XPathValue::String(
                node.and_then(|n| n.name())
                    .map(|q| q.to_string())
                    .unwrap_or_default(),
            ))
        }
        "namespace-uri" => {
            let node = optional_node(name, args, e_ctx)?;
            Ok(XPathValue::String(
                node.and_then(|n| n.name())
                    .and_then(|q| q.namespace)
                    .unwrap_or_default()
                    .to_string(),
            ))
        }
        "id" => func_id(args, e_ctx),
        "key" => func_key(args, e_ctx),
        "generate-id" => {
            let node = optional_node(name, args, e_ctx)?;
            Ok(XPathValue::String(node.map(generate_id).unwrap_or_default()))
        }
        "current" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::NodeSet(vec![e_ctx.current_node]))
        }

        // String
        "string" => {
            arity(name, &args, 0, 1)?;
            Ok(XPathValue::String(string_arg_or_context(args, e_ctx)))
        }
        "concat" => {
            if args.len() < 2 {
                return Err(XPathError::function(name, "expects at least 2 arguments"));
            }
            Ok(XPathValue::String(args.iter().map(|a| a.to_string()).collect()))
        }
        "starts-with" => {
            let (s, prefix) = two_strings(name, args)?;
            Ok(XPathValue::Boolean(s.starts_with(&prefix)))
        }
        "contains" => {
            let (s, needle) = two_strings(name, args)?;
            Ok(XPathValue::Boolean(s.contains(&needle)))
        }
        "substring-before" => {
            let (s, sep) = two_strings(name, args)?;
            Ok(XPathValue::String(
                s.find(&sep).map(|i| s[..i].to_string()).unwrap_or_default(),
            ))
        }
        "substring-after" => {
            let (s, sep) = two_strings(name, args)?;
            Ok(XPathValue::String(
                s.find(&sep)
                    .map(|i| s[i + sep.len()..].to_string())
                    .unwrap_or_default(),
            ))
        }
        "substring" => func_substring(args),
        "string-length" => {
            arity(name, &args, 0, 1)?;
            let s = string_arg_or_context(args, e_ctx);
            Ok(XPathValue::Number(s.chars().count() as f64))
        }
        "normalize-space" => {
            arity(name, &args, 0, 1)?;
            let s = string_arg_or_context(args, e_ctx);
            Ok(XPathValue::String(normalize_space(&s)))
        }
        "translate" => {
            arity(name, &args, 3, 3)?;
            let mut it = args.into_iter().map(|a| a.to_string());
            let (s, from, to) = (
                it.next().unwrap_or_default(),
                it.next().unwrap_or_default(),
                it.next().unwrap_or_default(),
            );
            Ok(XPathValue::String(translate(&s, &from, &to)))
        }

        // Boolean
        "boolean" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Boolean(single(args).to_bool()))
        }
        "not" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Boolean(!single(args).to_bool()))
        }
        "true" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Boolean(true))
        }
        "false" => {
            arity(name, &args, 0, 0)?;
            Ok(XPathValue::Boolean(false))
        }
        "lang" => {
            arity(name, &args, 1, 1)?;
            let wanted = single(args).to_string();
            Ok(XPathValue::Boolean(lang_matches(e_ctx.context_node, &wanted)))
        }

        // Number
        "number" => {
            arity(name, &args, 0, 1)?;
            let n = match args.into_iter().next() {
                Some(arg) => arg.to_number(),
                None => XPathValue::NodeSet(vec![e_ctx.context_node]).to_number(),
            };
            Ok(XPathValue::Number(n))
        }
        "sum" => {
            arity(name, &args, 1, 1)?;
            let nodes = single(args).into_node_set(name)?;
            let total = nodes
                .iter()
                .map(|n| crate::engine::string_to_number(&n.string_value()))
                .sum();
            Ok(XPathValue::Number(total))
        }
        "floor" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Number(single(args).to_number().floor()))
        }
        "ceiling" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Number(single(args).to_number().ceil()))
        }
        "round" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Number(xpath_round(single(args).to_number())))
        }

        // XSLT
        "system-property" => {
            arity(name, &args, 1, 1)?;
            let property = single(args).to_string();
            let local = property.rsplit(':').next().unwrap_or_default();
            Ok(match local {
                "version" => XPathValue::Number(1.0),
                "vendor" => XPathValue::String(env!("CARGO_PKG_NAME").to_string()),
                _ => XPathValue::String(String::new()),
            })
        }
        "function-available" => {
            arity(name, &args, 1, 1)?;
            Ok(XPathValue::Boolean(is_known_function(&single(args).to_string())))
        }
        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

// --- Argument helpers ---

fn arity<N>(function: &str, args: &[XPathValue<N>], min: usize, max: usize) -> Result<(), XPathError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(XPathError::function(
            function,
            format!("expects {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}

/// The only argument of a function whose arity has been checked.
fn single<N>(args: Vec<XPathValue<N>>) -> XPathValue<N> {
    args.into_iter()
        .next()
        .unwrap_or(XPathValue::String(String::new()))
}

fn two_strings<'a, N: DataSourceNode<'a>>(
    function: &str,
    args: Vec<XPathValue<N>>,
) -> Result<(String, String), XPathError> {
    arity(function, &args, 2, 2)?;
    let mut it = args.into_iter().map(|a| a.to_string());
    Ok((it.next().unwrap_or_default(), it.next().unwrap_or_default()))
}

fn string_arg_or_context<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> String {
    match args.into_iter().next() {
        Some(arg) => arg.to_string(),
        None => e_ctx.context_node.string_value(),
    }
}

/// The first node of an optional node-set argument, defaulting to the context node.
fn optional_node<'a, N: DataSourceNode<'a>>(
    function: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Option<N>, XPathError> {
    arity(function, &args, 0, 1)?;
    match args.into_iter().next() {
        Some(arg) => Ok(arg.into_node_set(function)?.into_iter().next()),
        None => Ok(Some(e_ctx.context_node)),
    }
}

// --- Implementations ---

/// XPath `round`: halves round towards positive infinity.
pub fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn translate(s: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    s.chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect()
}

fn func_substring<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    arity("substring", &args, 2, 3)?;
    let s = args[0].to_string();
    let start = xpath_round(args[1].to_number());
    let end = match args.get(2) {
        Some(len) => start + xpath_round(len.to_number()),
        None => f64::INFINITY,
    };
    // Positions are 1-based; NaN bounds select nothing.
    let result = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(XPathValue::String(result))
}

fn func_id<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    arity("id", &args, 1, 1)?;
    let tokens: Vec<String> = match single(args) {
        XPathValue::NodeSet(nodes) => nodes
            .iter()
            .flat_map(|n| {
                n.string_value()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect(),
        other => other
            .to_string()
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    };
    let wanted: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    if wanted.is_empty() {
        return Ok(XPathValue::NodeSet(vec![]));
    }

    // Without DTD attribute types, `id` and `xml:id` are treated as ID attributes.
    let mut results = Vec::new();
    let mut descendants = Vec::new();
    crate::axes::collect_descendant_nodes(e_ctx.root_node, &mut descendants);
    for node in descendants {
        if node.node_type() != NodeType::Element {
            continue;
        }
        let is_match = node.attributes().any(|attr| {
            attr.name().is_some_and(|q| {
                q.local_part == "id" && matches!(q.namespace, None | Some(XML_NAMESPACE))
            }) && wanted.contains(attr.string_value().as_str())
        });
        if is_match {
            results.push(node);
        }
    }
    Ok(XPathValue::NodeSet(results))
}

fn func_key<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    arity("key", &args, 2, 2)?;
    let mut it = args.into_iter();
    let key_name = it.next().map(|a| a.to_string()).unwrap_or_default();
    let lookup = it.next().unwrap_or(XPathValue::NodeSet(vec![]));

    let table = e_ctx
        .keys
        .get(&key_name)
        .ok_or_else(|| XPathError::function("key", format!("no key named '{}'", key_name)))?;

    let values: Vec<String> = match lookup {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    };
    let mut results: Vec<N> = values
        .iter()
        .filter_map(|v| table.get(v))
        .flatten()
        .copied()
        .collect();
    results.sort();
    results.dedup();
    Ok(XPathValue::NodeSet(results))
}

/// A stable identifier for a node, valid as an XML name.
pub fn generate_id<'a, N: DataSourceNode<'a>>(node: N) -> String {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    format!("id{:x}", hasher.finish())
}

fn lang_matches<'a, N: DataSourceNode<'a>>(node: N, wanted: &str) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        let declared = n.attributes().find(|attr| {
            attr.name()
                .is_some_and(|q| q.local_part == "lang" && q.namespace == Some(XML_NAMESPACE))
        });
        if let Some(attr) = declared {
            let lang = attr.string_value().to_lowercase();
            let wanted = wanted.to_lowercase();
            return lang == wanted
                || lang
                    .strip_prefix(&wanted)
                    .is_some_and(|rest| rest.starts_with('-'));
        }
        current = n.parent();
    }
    false
}
