//! Batch transformation of a corpus.
//!
//! [`run`] loads the stylesheet, walks the input tree, mirrors its directories
//! under the output root, transforms every matching document on a fixed pool
//! of workers and writes a CSV report of the documents that failed.
//!
//! ```ignore
//! use cei2tei::pipeline::{BatchConfig, run};
//!
//! let summary = run(&BatchConfig::new("data/cei", "data/tei", "cei2tei.xsl"))?;
//! println!("{} of {} converted", summary.succeeded, summary.dispatched);
//! ```

pub(crate) mod concurrency;
pub mod report;
pub mod worker;

use crate::corpus::CorpusWalker;
use crate::error::{ItemError, PipelineError};
use crate::stylesheet;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::runtime::Builder;

pub use worker::apply;

/// Stack size for runtime threads. Deeply recursive stylesheets need far more
/// than the platform default.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub stylesheet: PathBuf,
    pub report_path: PathBuf,
    pub worker_count: usize,
    pub suffix: String,
}

impl BatchConfig {
    /// A config with the default report name, worker count and suffix.
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        stylesheet: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            stylesheet: stylesheet.into(),
            report_path: PathBuf::from("error_log.csv"),
            worker_count: 4,
            suffix: ".xml".to_string(),
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

/// One document to transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in the walk; outcomes are reported in this order.
    pub index: usize,
    pub input_path: PathBuf,
    /// Mirrored directory that receives the output file.
    pub output_dir: PathBuf,
    /// Input path relative to the input root.
    pub relative_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeRecord {
    Succeeded {
        relative_path: PathBuf,
        output_path: PathBuf,
    },
    Failed {
        relative_path: PathBuf,
        input_path: PathBuf,
        error: ItemError,
    },
}

impl OutcomeRecord {
    pub fn relative_path(&self) -> &Path {
        match self {
            OutcomeRecord::Succeeded { relative_path, .. } | OutcomeRecord::Failed { relative_path, .. } => {
                relative_path
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeRecord::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One record per dispatched item, in walk order.
    pub outcomes: Vec<OutcomeRecord>,
    /// The failure report, when one was written.
    pub report: Option<PathBuf>,
}

impl BatchSummary {
    pub fn failures(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Turns a corpus listing into work items, one per file, in walk order.
pub fn plan(input_root: &Path, output_root: &Path, files: &[PathBuf]) -> Vec<WorkItem> {
    files
        .iter()
        .enumerate()
        .map(|(index, relative)| WorkItem {
            index,
            input_path: input_root.join(relative),
            output_dir: match relative.parent() {
                Some(parent) => output_root.join(parent),
                None => output_root.to_path_buf(),
            },
            relative_path: relative.clone(),
        })
        .collect()
}

/// Transforms a whole corpus.
///
/// Configuration problems (worker count, stylesheet, input root) fail before
/// anything is dispatched. Failures of single documents never fail the run;
/// they are counted and written to the report.
pub fn run(config: &BatchConfig) -> Result<BatchSummary, PipelineError> {
    let total_start = Instant::now();
    if config.worker_count == 0 {
        return Err(PipelineError::config("worker count must be at least 1"));
    }
    let stylesheet = stylesheet::load(&config.stylesheet)?;
    let listing = CorpusWalker::new(&config.input_root, &config.suffix).walk()?;

    fs::create_dir_all(&config.output_root)?;
    // Documents below a directory that cannot be mirrored fail on their own.
    for dir in &listing.directories {
        let target = config.output_root.join(dir);
        if let Err(e) = fs::create_dir_all(&target) {
            warn!("[BATCH] Cannot create output directory '{}': {}", target.display(), e);
        }
    }

    let items = plan(&config.input_root, &config.output_root, &listing.files);
    let dispatched = items.len();
    info!(
        "[BATCH] Dispatching {} documents from '{}' to {} workers.",
        dispatched,
        config.input_root.display(),
        config.worker_count
    );

    let rt = Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(WORKER_STACK_SIZE)
        .build()?;
    let outcomes = rt.block_on(concurrency::dispatch(items, stylesheet, config.worker_count))?;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    let report = if failed > 0 {
        report::write(&config.report_path, &outcomes)?;
        Some(config.report_path.clone())
    } else {
        report::remove_stale(&config.report_path)?;
        None
    };

    info!(
        "[BATCH] Finished in {:.2?}: {} succeeded, {} failed.",
        total_start.elapsed(),
        dispatched - failed,
        failed
    );
    Ok(BatchSummary {
        dispatched,
        succeeded: dispatched - failed,
        failed,
        outcomes,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_mirrors_parent_directories() {
        let files = vec![PathBuf::from("top.xml"), PathBuf::from("a/b/deep.xml")];
        let items = plan(Path::new("/in"), Path::new("/out"), &files);
        assert_eq!(items[0].output_dir, PathBuf::from("/out"));
        assert_eq!(items[1].output_dir, PathBuf::from("/out/a/b"));
        assert_eq!(items[1].input_path, PathBuf::from("/in/a/b/deep.xml"));
        assert_eq!(items[1].index, 1);
    }

    #[test]
    fn test_zero_workers_is_a_config_error() {
        let config = BatchConfig::new("in", "out", "t.xsl").with_workers(0);
        assert!(matches!(run(&config), Err(PipelineError::Config(_))));
    }
}
