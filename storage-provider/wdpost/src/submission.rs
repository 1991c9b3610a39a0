use std::{panic::AssertUnwindSafe, sync::Arc};

use cid::Cid;
use codec::Encode;
use futures::FutureExt;
use primitives_proofs::{methods::SUBMIT_WINDOWED_POST, ActorId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{cancellable, ChainError, WindowPoStError},
    ports::ChainPort,
    types::{
        GeneratedPoSt, Message, MessageReceipt, MessageState, PendingMessage, PoStPartition,
        SendOptions, SubmissionBatch, SubmitWindowedPoStParams, WindowKey,
    },
};

/// Final state of a single batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// The message was included and executed successfully.
    Confirmed(MessageReceipt),
    /// The message was included but its execution failed.
    ExecutionFailed(MessageReceipt),
    /// The message never made it into the message pool.
    PushFailed(ChainError),
    /// The message was pushed but its receipt could not be retrieved.
    WaitFailed(ChainError),
    /// Processing stopped because of a cancellation, the message may still land on-chain.
    Abandoned,
}

impl BatchOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BatchOutcome::Confirmed(_))
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// Position of the batch in the submission order.
    pub index: usize,
    pub batch: SubmissionBatch,
    /// Present when the batch's message was pushed.
    pub message: Option<PendingMessage>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn cid(&self) -> Option<Cid> {
        self.message.as_ref().map(|message| message.cid)
    }
}

/// Outcome of a window's submission, one entry per batch, in submission order.
#[derive(Debug)]
pub struct SubmissionReport {
    pub window: WindowKey,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
}

impl SubmissionReport {
    pub fn pushed(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.message.is_some())
            .count()
    }

    pub fn confirmed(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.outcome.is_confirmed())
            .count()
    }

    /// Every batch was confirmed, trivially true when there was nothing to submit.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.confirmed() == self.batches.len()
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches
            .iter()
            .filter(|batch| !batch.outcome.is_confirmed())
    }
}

/// Pushes one `SubmitWindowedPoSt` message per batch and tracks their confirmation.
///
/// There are no retries here, calling [`SubmissionPipeline::submit`] twice pushes new messages.
///
/// Cancellation is checked between pushes. A push in flight runs to completion and its message
/// is reported, the wait for its receipt is [`BatchOutcome::Abandoned`].
pub struct SubmissionPipeline<C> {
    chain: Arc<C>,
    miner: ActorId,
    worker: ActorId,
    confidence: u64,
    send_options: SendOptions,
}

impl<C> SubmissionPipeline<C>
where
    C: ChainPort,
{
    pub fn new(
        chain: Arc<C>,
        miner: ActorId,
        worker: ActorId,
        confidence: u64,
        send_options: SendOptions,
    ) -> Self {
        Self {
            chain,
            miner,
            worker,
            confidence,
            send_options,
        }
    }

    pub fn build_message(&self, generated: &GeneratedPoSt, batch: &SubmissionBatch) -> Message {
        build_message(generated, batch, self.miner, self.worker)
    }

    #[tracing::instrument(skip_all, fields(deadline = generated.window.index, batches = batches.len()))]
    pub async fn submit(
        &self,
        generated: &GeneratedPoSt,
        batches: Vec<SubmissionBatch>,
        token: &CancellationToken,
    ) -> SubmissionReport {
        let mut messages: Vec<Option<PendingMessage>> = vec![None; batches.len()];
        let mut outcomes: Vec<Option<BatchOutcome>> = batches.iter().map(|_| None).collect();
        let mut confirmations = JoinSet::new();
        let mut cancelled = false;

        for (index, batch) in batches.iter().enumerate() {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }

            // Once started, a push is never dropped, the message pool may already have it.
            let message = self.build_message(generated, batch);
            let signed = match self
                .chain
                .push_message(message, self.send_options.clone())
                .await
            {
                Ok(signed) => signed,
                Err(err) => {
                    tracing::warn!(batch = index, %err, "failed to push window post message");
                    outcomes[index] = Some(BatchOutcome::PushFailed(err));
                    continue;
                }
            };

            tracing::info!(
                batch = index,
                cid = %signed.cid,
                partitions = batch.len(),
                "pushed window post message"
            );
            let cid = signed.cid;
            messages[index] = Some(PendingMessage::from(signed));

            let chain = self.chain.clone();
            let token = token.clone();
            let confidence = self.confidence;
            confirmations.spawn(async move {
                let wait = cancellable(&token, chain.wait_message(cid, confidence));
                let outcome = match AssertUnwindSafe(wait).catch_unwind().await {
                    Ok(Ok(receipt)) if receipt.is_success() => BatchOutcome::Confirmed(receipt),
                    Ok(Ok(receipt)) => BatchOutcome::ExecutionFailed(receipt),
                    Ok(Err(WindowPoStError::Chain(err))) => BatchOutcome::WaitFailed(err),
                    Ok(Err(_)) => BatchOutcome::Abandoned,
                    Err(_) => BatchOutcome::WaitFailed(ChainError::Unavailable(format!(
                        "waiting for message {cid} panicked"
                    ))),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = confirmations.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    log_outcome(index, &outcome);
                    if let Some(message) = messages[index].as_mut() {
                        message.state = match &outcome {
                            BatchOutcome::Confirmed(receipt)
                            | BatchOutcome::ExecutionFailed(receipt) => {
                                MessageState::Confirmed(receipt.exit_code)
                            }
                            BatchOutcome::WaitFailed(err) => MessageState::Failed(err.to_string()),
                            BatchOutcome::PushFailed(_) | BatchOutcome::Abandoned => {
                                MessageState::Pushed
                            }
                        };
                    }
                    outcomes[index] = Some(outcome);
                }
                // Panics are caught inside the task, only an aborted task ends up here.
                Err(err) => tracing::error!(%err, "confirmation task failed"),
            }
        }

        let batches = batches
            .into_iter()
            .zip(messages)
            .zip(outcomes)
            .enumerate()
            .map(|(index, ((batch, message), outcome))| BatchReport {
                index,
                batch,
                message,
                outcome: outcome.unwrap_or(BatchOutcome::Abandoned),
            })
            .collect();

        SubmissionReport {
            window: generated.key(),
            batches,
            cancelled: cancelled || token.is_cancelled(),
        }
    }
}

/// Builds the `SubmitWindowedPoSt` message proving `batch`, sent by `worker` to `miner`.
pub fn build_message(
    generated: &GeneratedPoSt,
    batch: &SubmissionBatch,
    miner: ActorId,
    worker: ActorId,
) -> Message {
    let params = SubmitWindowedPoStParams {
        deadline: generated.window.index,
        partitions: batch
            .partitions
            .iter()
            .map(|partition| PoStPartition {
                index: partition.index,
                skipped: partition.skipped.clone(),
            })
            .collect(),
        proofs: generated.proof.proofs.clone(),
        chain_commit_epoch: generated.chain_commit_epoch,
        chain_commit_rand: generated.chain_commit_rand,
    };

    Message {
        from: worker,
        to: miner,
        method: SUBMIT_WINDOWED_POST,
        value: 0,
        params: params.encode(),
    }
}

fn log_outcome(index: usize, outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Confirmed(receipt) => tracing::info!(
            batch = index,
            included_at = receipt.included_at,
            "window post message confirmed"
        ),
        BatchOutcome::ExecutionFailed(receipt) => tracing::error!(
            batch = index,
            exit_code = receipt.exit_code,
            "window post message failed on-chain"
        ),
        BatchOutcome::WaitFailed(err) => {
            tracing::error!(batch = index, %err, "failed to wait for window post message")
        }
        BatchOutcome::PushFailed(_) | BatchOutcome::Abandoned => {
            tracing::warn!(batch = index, "stopped waiting for window post message")
        }
    }
}
