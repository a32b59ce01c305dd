//! Handlers for the instructions of a template body. Each takes the executor
//! and the current focus (context node, position and size).

pub(crate) mod apply_templates;
pub(crate) mod call_template;
pub(crate) mod control_flow;
pub(crate) mod copy;
pub(crate) mod for_each;
pub(crate) mod literals;
pub(crate) mod variables;
