use crate::ast::{Instruction, When};
use crate::error::ExecutionError;
use crate::executor::TemplateExecutor;
use crate::output::OutputBuilder;
use cei2tei_xpath1::datasource::DataSourceNode;

pub(crate) fn handle_if<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    condition: bool,
    body: &'s [Instruction],
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    if condition {
        executor.execute_body(body, context_node, context_position, context_size, builder)?;
    }
    Ok(())
}

pub(crate) fn handle_choose<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    whens: &'s [When],
    otherwise: Option<&'s [Instruction]>,
    context_node: N,
    context_position: usize,
    context_size: usize,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    for when_block in whens {
        if executor
            .evaluate(&when_block.test, context_node, context_position, context_size)?
            .to_bool()
        {
            return executor.execute_body(
                &when_block.body,
                context_node,
                context_position,
                context_size,
                builder,
            );
        }
    }
    if let Some(otherwise_body) = otherwise {
        executor.execute_body(otherwise_body, context_node, context_position, context_size, builder)?;
    }
    Ok(())
}

/// `xsl:message` goes to the log. With `terminate="yes"` the transformation
/// of the current document fails.
pub(crate) fn handle_message<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &'s [Instruction],
    terminate: bool,
    context_node: N,
    context_position: usize,
    context_size: usize,
) -> Result<(), ExecutionError> {
    let text = executor.execute_body_to_text(body, context_node, context_position, context_size)?;
    if terminate {
        log::warn!("xsl:message (terminating): {}", text);
        return Err(ExecutionError::Terminated(text));
    }
    log::info!("xsl:message: {}", text);
    Ok(())
}
