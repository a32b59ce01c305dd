use crate::ast::{Instruction, SortKey};
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::output::OutputBuilder;
use cei2tei_xpath1::Expression;
use cei2tei_xpath1::datasource::DataSourceNode;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_for_each<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    sort_keys: &[SortKey],
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let nodes = executor.select_nodes(
        select,
        "xsl:for-each",
        context_node,
        context_position,
        context_size,
    )?;
    let nodes = executor.sort_nodes(nodes, sort_keys)?;
    let inner_context_size = nodes.len();
    for (i, node) in nodes.into_iter().enumerate() {
        executor.execute_body(body, node, i + 1, inner_context_size, builder)?;
    }
    Ok(())
}
