use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{channel, Sender};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::adapters::ProcessorStatus;
use super::error::PayoutError;
use super::models::Processor;
use super::state_machine::DisbursementStateMachine;

/// key: payout-reconciliation -> background worker for processor callbacks
#[derive(Debug, Clone)]
pub enum ReconciliationJob {
    StatusChanged {
        processor: Processor,
        correlation_id: String,
        status: ProcessorStatus,
    },
    SyncRequested {
        processor: Processor,
        correlation_id: String,
    },
}

/// Redelivery schedule for jobs that hit a not-yet-recorded payment or a transient failure.
const MAX_ATTEMPTS: u32 = 6;
const BASE_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

struct QueuedJob {
    job: ReconciliationJob,
    attempt: u32,
}

enum JobDisposition {
    Done,
    Redeliver,
}

/// key: payout-reconciliation-handle -> enqueue interface
#[derive(Clone)]
pub struct ReconciliationHandle {
    sender: Sender<QueuedJob>,
}

impl ReconciliationHandle {
    pub async fn dispatch(&self, job: ReconciliationJob) -> Result<()> {
        self.sender
            .send(QueuedJob { job, attempt: 1 })
            .await
            .map_err(|err| anyhow!("failed to enqueue payout reconciliation job: {err}"))
    }
}

impl ReconciliationJob {
    fn correlation_id(&self) -> &str {
        match self {
            ReconciliationJob::StatusChanged { correlation_id, .. }
            | ReconciliationJob::SyncRequested { correlation_id, .. } => correlation_id,
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_BACKOFF)
}

pub fn start_reconciliation_worker(
    machine: Arc<DisbursementStateMachine>,
) -> (ReconciliationHandle, JoinHandle<()>) {
    let (tx, mut rx) = channel::<QueuedJob>(64);
    // weak so the worker still stops once every handle is dropped
    let requeue = tx.downgrade();
    let worker = tokio::spawn(async move {
        while let Some(QueuedJob { job, attempt }) = rx.recv().await {
            if let JobDisposition::Done = handle_job(&machine, &job).await {
                continue;
            }
            if attempt >= MAX_ATTEMPTS {
                error!(
                    attempt,
                    correlation_id = job.correlation_id(),
                    "dropping payout reconciliation job after repeated failures"
                );
                continue;
            }
            let Some(sender) = requeue.upgrade() else {
                warn!(
                    correlation_id = job.correlation_id(),
                    "payout reconciliation shutting down; job not redelivered"
                );
                continue;
            };
            let delay = backoff(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                correlation_id = job.correlation_id(),
                "redelivering payout reconciliation job"
            );
            tokio::spawn(async move {
                time::sleep(delay).await;
                let attempt = attempt + 1;
                if sender.send(QueuedJob { job, attempt }).await.is_err() {
                    warn!(attempt, "payout reconciliation worker stopped before redelivery");
                }
            });
        }
    });

    (ReconciliationHandle { sender: tx }, worker)
}

fn retryable(err: &PayoutError) -> bool {
    matches!(
        err,
        PayoutError::NotFound { .. } | PayoutError::TransientProcessor { .. } | PayoutError::Store(_)
    )
}

async fn handle_job(machine: &DisbursementStateMachine, job: &ReconciliationJob) -> JobDisposition {
    match job {
        ReconciliationJob::StatusChanged {
            processor,
            correlation_id,
            status,
        } => match machine
            .apply_processor_event(*processor, correlation_id, status.clone())
            .await
        {
            Ok(outcome) => {
                info!(
                    payment_id = %outcome.payment().id,
                    state = %outcome.payment().state,
                    applied = outcome.is_applied(),
                    %correlation_id,
                    "processor status reconciled"
                );
                JobDisposition::Done
            }
            Err(err) if retryable(&err) => {
                warn!(
                    ?err,
                    processor = %processor,
                    %correlation_id,
                    "processor status not reconciled yet"
                );
                JobDisposition::Redeliver
            }
            Err(err) => {
                error!(
                    ?err,
                    processor = %processor,
                    %correlation_id,
                    "failed to reconcile processor status"
                );
                JobDisposition::Done
            }
        },
        ReconciliationJob::SyncRequested {
            processor,
            correlation_id,
        } => {
            let payment = match machine
                .store()
                .payment_by_correlation_id(*processor, correlation_id)
                .await
            {
                Ok(Some(payment)) => payment,
                Ok(None) => {
                    warn!(
                        processor = %processor,
                        %correlation_id,
                        "sync request references unknown payment"
                    );
                    return JobDisposition::Redeliver;
                }
                Err(err) => {
                    error!(?err, %correlation_id, "failed to load payment for sync");
                    return JobDisposition::Redeliver;
                }
            };
            match machine.sync(payment.id).await {
                Ok(_) => JobDisposition::Done,
                Err(err) => {
                    error!(
                        ?err,
                        payment_id = %payment.id,
                        "processor-requested sync failed"
                    );
                    if retryable(&err) {
                        JobDisposition::Redeliver
                    } else {
                        JobDisposition::Done
                    }
                }
            }
        }
    }
}
