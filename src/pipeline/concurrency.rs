// src/pipeline/concurrency.rs
//!
//! Fan-out/fan-in pool for the batch transformation.
//!
//! ```text
//! Producer -> bounded channel -> Workers (N) -> channel -> Coordinator
//!    |                             |                          |
//! WorkItems                 transform + write           collect, re-order
//! ```
//!
//! Workers run on tokio's blocking pool because parsing, transforming and
//! writing are CPU and filesystem bound. The coordinator awaits every worker
//! before it returns; that join is the only synchronization point.

use crate::error::{ItemError, PipelineError};
use crate::pipeline::worker::apply;
use crate::pipeline::{OutcomeRecord, WorkItem};
use cei2tei_xslt::Stylesheet;
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;

// ============================================================================
// Type Aliases for Channel Types
// ============================================================================

/// Outcome sent from a worker to the coordinator, tagged with dispatch index.
pub(crate) type IndexedOutcome = (usize, OutcomeRecord);

pub(crate) type WorkItemSender = async_channel::Sender<WorkItem>;
pub(crate) type WorkItemReceiver = async_channel::Receiver<WorkItem>;
pub(crate) type OutcomeSender = async_channel::Sender<IndexedOutcome>;
pub(crate) type OutcomeReceiver = async_channel::Receiver<IndexedOutcome>;

/// Items buffered per worker before the producer waits.
const QUEUE_DEPTH_PER_WORKER: usize = 2;

// ============================================================================
// Producer
// ============================================================================

/// Feeds work items to the workers. The bounded channel provides the
/// backpressure; closing happens when `tx` is dropped at the end.
pub(crate) async fn producer_task(items: Vec<WorkItem>, tx: WorkItemSender) {
    info!("[PRODUCER] Dispatching {} items.", items.len());
    for item in items {
        if item.index % 100 == 0 {
            debug!("[PRODUCER] Sending item #{}...", item.index);
        }
        if tx.send(item).await.is_err() {
            warn!("[PRODUCER] Work channel closed, stopping producer.");
            break;
        }
    }
    info!("[PRODUCER] Finished dispatching.");
}

// ============================================================================
// Workers
// ============================================================================

/// Spawns `num_threads` blocking workers sharing one compiled stylesheet.
///
/// A panic inside a transformation is caught and reported as a failed outcome
/// for that item, so one bad document cannot take a worker slot down.
pub(crate) fn spawn_workers(
    num_threads: usize,
    stylesheet: &Arc<Stylesheet>,
    rx: WorkItemReceiver,
    tx: OutcomeSender,
) -> Vec<task::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(num_threads);

    for worker_id in 0..num_threads {
        let rx_clone = rx.clone();
        let tx_clone = tx.clone();
        let stylesheet = Arc::clone(stylesheet);

        let worker_handle = task::spawn_blocking(move || {
            info!("[WORKER-{}] Started.", worker_id);
            let mut processed = 0usize;

            while let Ok(item) = rx_clone.recv_blocking() {
                let item_start = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply(&item, &stylesheet)))
                    .unwrap_or_else(|payload| OutcomeRecord::Failed {
                        relative_path: item.relative_path.clone(),
                        input_path: item.input_path.clone(),
                        error: ItemError::Transform(format!(
                            "transformation panicked: {}",
                            panic_message(payload.as_ref())
                        )),
                    });

                match &outcome {
                    OutcomeRecord::Succeeded { output_path, .. } => debug!(
                        "[WORKER-{}] #{} {} -> {} in {:?}",
                        worker_id,
                        item.index,
                        item.relative_path.display(),
                        output_path.display(),
                        item_start.elapsed()
                    ),
                    OutcomeRecord::Failed { error, .. } => warn!(
                        "[WORKER-{}] #{} {} failed ({}): {}",
                        worker_id,
                        item.index,
                        item.relative_path.display(),
                        error.kind(),
                        error
                    ),
                }
                processed += 1;

                if tx_clone.send_blocking((item.index, outcome)).is_err() {
                    warn!("[WORKER-{}] Consumer channel closed.", worker_id);
                    break;
                }
            }
            info!("[WORKER-{}] Shutting down after {} items.", worker_id, processed);
        });
        handles.push(worker_handle);
    }
    drop(rx);
    drop(tx);
    handles
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drains the outcome channel until every worker has dropped its sender.
pub(crate) async fn collect_outcomes(rx: OutcomeReceiver, expected: usize) -> Vec<IndexedOutcome> {
    let mut outcomes = Vec::with_capacity(expected);
    while let Ok(outcome) = rx.recv().await {
        outcomes.push(outcome);
        if outcomes.len() % 1000 == 0 {
            info!("[BATCH] {}/{} documents processed.", outcomes.len(), expected);
        }
    }
    outcomes
}

/// Runs every item through the pool and returns the outcomes in dispatch
/// order, exactly one per item.
pub(crate) async fn dispatch(
    items: Vec<WorkItem>,
    stylesheet: Arc<Stylesheet>,
    worker_count: usize,
) -> Result<Vec<OutcomeRecord>, PipelineError> {
    let expected = items.len();
    let (tx1, rx1) = async_channel::bounded::<WorkItem>(worker_count * QUEUE_DEPTH_PER_WORKER);
    let (tx2, rx2) = async_channel::bounded::<IndexedOutcome>(worker_count * QUEUE_DEPTH_PER_WORKER);

    let producer_handle = task::spawn(producer_task(items, tx1));
    let worker_handles = spawn_workers(worker_count, &stylesheet, rx1, tx2);

    let mut outcomes = collect_outcomes(rx2, expected).await;

    producer_handle
        .await
        .map_err(|e| PipelineError::Internal(format!("producer task failed: {}", e)))?;
    for handle in worker_handles {
        handle
            .await
            .map_err(|e| PipelineError::Internal(format!("worker task failed: {}", e)))?;
    }

    if outcomes.len() != expected {
        return Err(PipelineError::Internal(format!(
            "dispatched {} items but received {} outcomes",
            expected,
            outcomes.len()
        )));
    }
    outcomes.sort_by_key(|(index, _)| *index);
    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn identity() -> Arc<Stylesheet> {
        Arc::new(
            Stylesheet::from_source(
                r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                     <xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>
                   </xsl:stylesheet>"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_outcomes_come_back_in_dispatch_order() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let items: Vec<WorkItem> = (0..20)
            .map(|i| {
                let name = format!("{:02}.xml", i);
                let body = if i % 5 == 0 { "<broken>".to_string() } else { format!("<n>{}</n>", i) };
                fs::write(input.path().join(&name), body).unwrap();
                WorkItem {
                    index: i,
                    input_path: input.path().join(&name),
                    output_dir: output.path().to_path_buf(),
                    relative_path: PathBuf::from(name),
                }
            })
            .collect();

        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let outcomes = rt.block_on(dispatch(items, identity(), 3)).unwrap();

        assert_eq!(outcomes.len(), 20);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.relative_path(), PathBuf::from(format!("{:02}.xml", i)));
            assert_eq!(outcome.is_success(), i % 5 != 0);
        }
    }

    #[test]
    fn test_empty_dispatch() {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let outcomes = rt.block_on(dispatch(Vec::new(), identity(), 2)).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_producer_stops_when_workers_are_gone() {
        let (tx, rx) = async_channel::bounded::<WorkItem>(1);
        drop(rx);
        let items = vec![WorkItem {
            index: 0,
            input_path: PathBuf::from("x.xml"),
            output_dir: PathBuf::from("out"),
            relative_path: PathBuf::from("x.xml"),
        }];
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(producer_task(items, tx));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
