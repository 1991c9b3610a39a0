use std::future::Future;

use primitives_proofs::{ActorId, RegisteredPoStProof, SectorNumber};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::{
    scheduler::WindowStage,
    types::{PartitionNumber, WindowKey},
};

/// Failures of the chain collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain node unavailable: {0}")]
    Unavailable(String),

    #[error("{0} was not found in the chain state")]
    NotFound(String),

    #[error("message was rejected: {0}")]
    Rejected(String),

    #[error("{0} is not supported by this chain collaborator")]
    Unsupported(&'static str),
}

/// Failures of the fault oracle or the proving backend.
#[derive(Debug, thiserror::Error)]
pub enum ProvingError {
    #[error("proving backend failure: {0}")]
    Backend(String),

    #[error("{0} is not supported by this proving collaborator")]
    Unsupported(&'static str),

    #[error("proving backend kept skipping sectors after {0} retries")]
    TooManySkipRetries(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("partition {partition} addresses {sectors} sectors, a message can only address {limit}")]
    OversizedPartition {
        partition: PartitionNumber,
        sectors: u64,
        limit: u64,
    },

    #[error("the maximum number of sectors per message must be greater than zero")]
    ZeroLimit,
}

#[derive(Debug, thiserror::Error)]
pub enum WindowPoStError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Proving(#[from] ProvingError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("sector {0} has no on-chain info")]
    MissingSectorInfo(SectorNumber),

    #[error("{window} is {from}, it cannot start {to}")]
    InvalidTransition {
        window: WindowKey,
        from: WindowStage,
        to: &'static str,
    },

    #[error("window processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("configured worker {configured} does not match the on-chain worker {on_chain}")]
    WorkerMismatch { configured: ActorId, on_chain: ActorId },

    #[error("configured proof {configured:?} does not match the registered proof {on_chain:?}")]
    ProofMismatch {
        configured: RegisteredPoStProof,
        on_chain: RegisteredPoStProof,
    },
}

impl WindowPoStError {
    /// Whether retrying the whole window may succeed, given it has not closed yet.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WindowPoStError::Chain(_) | WindowPoStError::Proving(_))
    }
}

/// Races `fut` against the cancellation `token`.
pub(crate) async fn cancellable<T, E, F>(
    token: &CancellationToken,
    fut: F,
) -> Result<T, WindowPoStError>
where
    F: Future<Output = Result<T, E>>,
    WindowPoStError: From<E>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(WindowPoStError::Cancelled),
        res = fut => Ok(res?),
    }
}
