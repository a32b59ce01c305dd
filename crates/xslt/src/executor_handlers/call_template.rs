use crate::ast::VariableDecl;
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::output::OutputBuilder;
use cei2tei_xpath1::datasource::DataSourceNode;

/// Calls a named template with the caller's focus. Parameters the template
/// does not declare are ignored.
#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_call_template<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    params: &'s [VariableDecl],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    let Some(&index) = stylesheet.named_templates.get(name) else {
        return Err(ExecutionError::Execution(format!(
            "call to unknown named template '{}'",
            name
        )));
    };
    let template = &stylesheet.templates[index];
    let passed = executor.evaluate_params(params, context_node, context_position, context_size)?;
    executor.invoke_template(
        template,
        &passed,
        context_node,
        context_position,
        context_size,
        builder,
    )
}
