//! Handlers for instructions that construct result nodes: literal result
//! elements, `xsl:element`, `xsl:attribute`, `xsl:comment` and
//! `xsl:processing-instruction`.

use crate::ast::{Instruction, NameContext};
use crate::avt::AttributeValueTemplate;
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::output::OutputBuilder;
use crate::result::ResultName;
use cei2tei_xpath1::datasource::DataSourceNode;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_literal_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &ResultName,
    namespaces: &[(Option<String>, String)],
    attributes: &[(ResultName, AttributeValueTemplate)],
    attribute_sets: &[String],
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    builder.start_element(name.clone());
    for (prefix, uri) in namespaces {
        builder.add_namespace(prefix.as_deref(), uri);
    }
    // Attribute sets first so that the element's own attributes win.
    apply_attribute_sets(
        executor,
        attribute_sets,
        context_node,
        context_position,
        context_size,
        builder,
    )?;
    for (attr_name, avt) in attributes {
        let value = executor.evaluate_avt(avt, context_node, context_position, context_size)?;
        builder.add_attribute(attr_name.clone(), &value)?;
    }
    executor.execute_body(body, context_node, context_position, context_size, builder)?;
    builder.end_element();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    context: &NameContext,
    attribute_sets: &[String],
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let qname = executor.evaluate_avt(name, context_node, context_position, context_size)?;
    let namespace = namespace
        .map(|avt| executor.evaluate_avt(avt, context_node, context_position, context_size))
        .transpose()?;
    let result_name = resolve_name(&qname, namespace, context)?;

    builder.start_element(result_name);
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
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_attribute<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    context: &NameContext,
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let qname = executor.evaluate_avt(name, context_node, context_position, context_size)?;
    if qname == "xmlns" {
        return Err(ExecutionError::Execution(
            "xsl:attribute cannot create a namespace declaration".to_string(),
        ));
    }
    let namespace = namespace
        .map(|avt| executor.evaluate_avt(avt, context_node, context_position, context_size))
        .transpose()?;
    let result_name = resolve_name(&qname, namespace, context)?;
    let value = executor.execute_body_to_text(body, context_node, context_position, context_size)?;
    builder.add_attribute(result_name, &value)
}

pub(crate) fn handle_comment<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let text = executor.execute_body_to_text(body, context_node, context_position, context_size)?;
    builder.add_comment(&text);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_processing_instruction<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &AttributeValueTemplate,
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let target = executor.evaluate_avt(name, context_node, context_position, context_size)?;
    if !is_ncname(&target) || target.eq_ignore_ascii_case("xml") {
        return Err(ExecutionError::Execution(format!(
            "'{}' is not a valid processing-instruction target",
            target
        )));
    }
    let data = executor.execute_body_to_text(body, context_node, context_position, context_size)?;
    builder.add_processing_instruction(&target, data.trim_start());
    Ok(())
}

/// Runs the `xsl:attribute` instructions of the named attribute sets.
pub(crate) fn apply_attribute_sets<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    names: &[String],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    for name in names {
        let Some(set) = stylesheet.attribute_sets.get(name) else {
            return Err(ExecutionError::Execution(format!(
                "unknown attribute set '{}'",
                name
            )));
        };
        executor.execute_body(set, context_node, context_position, context_size, builder)?;
    }
    Ok(())
}

/// Turns a computed `prefix:local` name into a result name. An explicit
/// namespace wins; otherwise the prefix is resolved against the bindings in
/// scope where the instruction was written.
fn resolve_name(
    qname: &str,
    namespace: Option<String>,
    context: &NameContext,
) -> Result<ResultName, ExecutionError> {
    let qname = qname.trim();
    let (prefix, local) = match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    };
    if !is_ncname(local) || prefix.is_some_and(|p| !is_ncname(p)) {
        return Err(ExecutionError::Execution(format!(
            "'{}' is not a valid name",
            qname
        )));
    }

    let namespace = match (namespace, prefix) {
        (Some(uri), _) => Some(uri).filter(|uri| !uri.is_empty()),
        (None, Some("xml")) => Some(cei2tei_xpath1::namespaces::XML_NAMESPACE.to_string()),
        (None, Some(prefix)) => Some(
            context
                .prefixes
                .resolve(prefix)
                .ok_or_else(|| {
                    ExecutionError::Execution(format!("prefix '{}' is not declared", prefix))
                })?
                .to_string(),
        ),
        (None, None) => context.default_namespace.clone(),
    };
    // A prefix without a namespace cannot be serialized.
    let prefix = prefix.filter(|_| namespace.is_some());
    Ok(ResultName::namespaced(prefix, namespace.as_deref(), local))
}

fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
