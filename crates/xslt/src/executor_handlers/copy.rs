//! Handlers for `xsl:copy` and `xsl:copy-of`.

use crate::ast::Instruction;
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::executor_handlers::literals::apply_attribute_sets;
use crate::output::OutputBuilder;
use crate::result::{ResultName, ResultNode};
use cei2tei_xpath1::datasource::{DataSourceNode, NodeType};
use cei2tei_xpath1::{Expression, XPathValue};

pub(crate) fn handle_copy_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    // A variable holding a result tree fragment copies the fragment itself.
    if let Expression::Variable(name) = select
        && let Some(fragment) = executor.fragment(name)
    {
        for node in fragment {
            copy_result_node(node, builder)?;
        }
        return Ok(());
    }

    match executor.evaluate(select, context_node, context_position, context_size)? {
        XPathValue::NodeSet(nodes) => {
            let stripped = |n: N| executor.is_stripped(n);
            for node in nodes {
                copy_node(node, builder, &stripped)?;
            }
        }
        other => builder.add_text(&other.to_string()),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_copy<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    attribute_sets: &[String],
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    match context_node.node_type() {
        NodeType::Element => {
            builder.start_element(node_name(context_node)?);
            for ns in context_node.namespaces() {
                builder.add_namespace(ns.prefix, ns.uri);
            }
            apply_attribute_sets(
                executor,
                attribute_sets,
                context_node,
                context_position,
                context_size,
                builder,
            )?;
            executor.execute_body(body, context_node, context_position, context_size, builder)?;
            builder.end_element();
        }
        // Copying the root node just processes the body.
        NodeType::Root => {
            executor.execute_body(body, context_node, context_position, context_size, builder)?;
        }
        // Leaf nodes are copied whole; the body does not apply.
        _ => copy_node(context_node, builder, &|_| false)?,
    }
    Ok(())
}

/// Deep-copies a source node, with its namespaces and attributes, into the
/// result. Text nodes for which `stripped` holds are left out.
pub(crate) fn copy_node<'a, N: DataSourceNode<'a>>(
    node: N,
    builder: &mut dyn OutputBuilder,
    stripped: &dyn Fn(N) -> bool,
) -> Result<(), ExecutionError> {
    match node.node_type() {
        NodeType::Element => {
            builder.start_element(node_name(node)?);
            for ns in node.namespaces() {
                builder.add_namespace(ns.prefix, ns.uri);
            }
            for attr in node.attributes() {
                builder.add_attribute(node_name(attr)?, &attr.string_value())?;
            }
            for child in node.children() {
                copy_node(child, builder, stripped)?;
            }
            builder.end_element();
        }
        NodeType::Root => {
            for child in node.children() {
                copy_node(child, builder, stripped)?;
            }
        }
        NodeType::Text => {
            if !stripped(node) {
                builder.add_text(&node.string_value());
            }
        }
        NodeType::Attribute => builder.add_attribute(node_name(node)?, &node.string_value())?,
        NodeType::Comment => builder.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            let target = node.name().map(|q| q.local_part).unwrap_or_default();
            builder.add_processing_instruction(target, &node.string_value());
        }
    }
    Ok(())
}

fn copy_result_node(node: &ResultNode, builder: &mut dyn OutputBuilder) -> Result<(), ExecutionError> {
    match node {
        ResultNode::Element(element) => {
            builder.start_element(element.name.clone());
            for (prefix, uri) in &element.namespaces {
                builder.add_namespace(prefix.as_deref(), uri);
            }
            for (name, value) in &element.attributes {
                builder.add_attribute(name.clone(), value)?;
            }
            for child in &element.children {
                copy_result_node(child, builder)?;
            }
            builder.end_element();
        }
        ResultNode::Text(text) => builder.add_text(text),
        ResultNode::Comment(text) => builder.add_comment(text),
        ResultNode::ProcessingInstruction { target, data } => {
            builder.add_processing_instruction(target, data)
        }
    }
    Ok(())
}

fn node_name<'a, N: DataSourceNode<'a>>(node: N) -> Result<ResultName, ExecutionError> {
    node.name()
        .map(ResultName::from)
        .ok_or_else(|| ExecutionError::Execution(format!("cannot copy unnamed node {:?}", node)))
}
