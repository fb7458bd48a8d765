use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use cinegraph_common::config::RetryConfig;

use super::{Pipeline, PipelineError, Stage};
use crate::retry::Backoff;
use crate::store::{GraphStore, WriteOp};

/// The writes produced by one chunk of source rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// Source rows folded into `ops`.
    pub rows: u64,
    pub ops: Vec<WriteOp>,
}

/// Committed totals across the batches of one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub rows: u64,
    pub applied: u64,
    pub skipped: u64,
}

impl Pipeline {
    /// Commit batches with up to `loader.workers` in flight. Movie batches
    /// always commit one at a time, in file order.
    ///
    /// Every batch that committed is counted in `totals`, even when the call
    /// fails. After the first failure no new batches start; batches already
    /// in flight are allowed to finish.
    pub(crate) async fn commit(
        &self,
        stage: Stage,
        batches: Vec<Batch>,
        totals: &mut BatchTotals,
    ) -> Result<(), PipelineError> {
        let workers = self.workers(stage);
        let retry = self.config.retry.batches.clone();

        let mut pending = batches.into_iter().filter(|b| !b.ops.is_empty());
        let mut in_flight: JoinSet<Result<(u64, crate::store::BatchOutcome), PipelineError>> =
            JoinSet::new();
        let mut first_error: Option<PipelineError> = None;

        loop {
            while first_error.is_none() && in_flight.len() < workers {
                let Some(batch) = pending.next() else { break };
                let store = Arc::clone(&self.store);
                let retry = retry.clone();
                in_flight.spawn(async move {
                    let rows = batch.rows;
                    let outcome = commit_with_retry(store, batch.ops, &retry, stage).await?;
                    Ok((rows, outcome))
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Worker(e.to_string())),
            };

            match result {
                Ok((rows, outcome)) => {
                    totals.rows += rows;
                    totals.applied += outcome.applied;
                    totals.skipped += outcome.skipped;
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        tracing::warn!(stage = stage.as_str(), error = %e, "Additional batch failure");
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn workers(&self, stage: Stage) -> usize {
        match stage {
            // A movie id repeated across chunks must keep last-write-wins.
            Stage::Movies => 1,
            _ => self.config.loader.workers.max(1),
        }
    }
}

async fn commit_with_retry(
    store: Arc<dyn GraphStore>,
    ops: Vec<WriteOp>,
    retry: &RetryConfig,
    stage: Stage,
) -> Result<crate::store::BatchOutcome, PipelineError> {
    let mut backoff = Backoff::new(retry);

    loop {
        let start = Instant::now();
        match store.execute_batch(ops.clone()).await {
            Ok(outcome) => {
                metrics::histogram!("pipeline.batch.latency", "stage" => stage.as_str())
                    .record(start.elapsed().as_secs_f64());
                return Ok(outcome);
            }
            Err(e) => match backoff.next_wait() {
                Some(wait) => {
                    tracing::warn!(
                        stage = stage.as_str(),
                        attempt = backoff.attempts(),
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Batch commit failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                None => {
                    return Err(PipelineError::BatchCommit {
                        stage,
                        attempts: backoff.attempts(),
                        detail: e.to_string(),
                    });
                }
            },
        }
    }
}
