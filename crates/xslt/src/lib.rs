//! XSLT 1.0 processor producing XML result trees.
//!
//! A stylesheet is compiled once into an immutable [`Stylesheet`] that can be
//! shared across threads, then applied to any number of source documents.
//! Results are in-memory trees that [`serialize`] writes out as XML or text.

pub mod ast;
pub mod avt;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod output;
pub mod pattern;
pub mod processor;
pub mod result;
pub mod serialize;

mod compiler_handlers;
mod executor_handlers;

pub use ast::{OutputMethod, OutputSettings};
pub use error::{ExecutionError, Location, XsltError};
pub use processor::{Stylesheet, copy_to_document};
pub use result::{ResultDocument, ResultElement, ResultName, ResultNode};
pub use serialize::{serialize, serialize_to_string};
