use crate::ast::{SortKey, VariableDecl};
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::output::OutputBuilder;
use cei2tei_xpath1::Expression;
use cei2tei_xpath1::datasource::DataSourceNode;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_apply_templates<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: Option<&Expression>,
    mode: Option<&str>,
    sort_keys: &[SortKey],
    params: &'s [VariableDecl],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let nodes = match select {
        Some(select) => executor.select_nodes(
            select,
            "xsl:apply-templates",
            context_node,
            context_position,
            context_size,
        )?,
        None => executor.strip_whitespace(context_node.children().collect()),
    };
    let nodes = executor.sort_nodes(nodes, sort_keys)?;
    let passed = executor.evaluate_params(params, context_node, context_position, context_size)?;
    executor.apply_templates_to_nodes(&nodes, mode, &passed, builder)
}
