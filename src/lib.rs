//! Batch tooling for migrating charter records from CEI to TEI.
//!
//! - [`pipeline`] transforms a corpus with one XSLT stylesheet on a pool of
//!   workers and reports the documents that failed.
//! - [`discovery`] lists the element and attribute paths a corpus uses.
//! - [`compare`] checks that selected text survived the transformation.
//! - [`validate`] validates a random sample against an XML Schema.

pub mod compare;
pub mod config;
pub mod corpus;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod stylesheet;
pub mod validate;

pub use config::Settings;
pub use corpus::{CorpusListing, CorpusWalker};
pub use error::{ItemError, PipelineError};
pub use pipeline::{BatchConfig, BatchSummary, OutcomeRecord, WorkItem, run};
