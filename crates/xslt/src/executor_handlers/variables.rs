use crate::ast::VariableDecl;
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use cei2tei_xpath1::datasource::DataSourceNode;

/// Binds a local variable; it stays visible until the enclosing body ends.
pub(crate) fn handle_variable<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    decl: &'s VariableDecl,
    context_node: N,
    context_position: usize,
    context_size: usize,
) -> Result<(), ExecutionError> {
    let binding = executor.evaluate_binding(&decl.value, context_node, context_position, context_size)?;
    executor.bind_local(decl.name.clone(), binding);
    Ok(())
}
