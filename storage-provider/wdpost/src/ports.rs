//! Capabilities the scheduler consumes from its environment.
//!
//! Implementations that cannot serve a given call must return the matching `Unsupported` error
//! rather than panicking.

use std::{collections::BTreeSet, future::Future};

use cid::Cid;
use primitives_proofs::{
    ActorId, ChainEpoch, DomainSeparationTag, RegisteredPoStProof, RegisteredSealProof,
    SectorNumber,
};

use crate::{
    error::{ChainError, ProvingError},
    types::{
        Message, MessageReceipt, MinerInfo, Partition, PoStProof, Randomness, RandomnessSource,
        SectorIdentity, SectorOnChainInfo, SendOptions, SignedMessage,
    },
};

/// Chain state reads and message submission.
pub trait ChainPort: Send + Sync + 'static {
    /// Draws randomness for `epoch` from the given `source`.
    fn randomness(
        &self,
        source: RandomnessSource,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> impl Future<Output = Result<Randomness, ChainError>> + Send;

    /// Partitions assigned to the deadline, in chain order.
    fn partitions(
        &self,
        miner: ActorId,
        deadline_index: u64,
    ) -> impl Future<Output = Result<Vec<Partition>, ChainError>> + Send;

    fn sectors_info(
        &self,
        miner: ActorId,
        sectors: &BTreeSet<SectorNumber>,
    ) -> impl Future<Output = Result<Vec<SectorOnChainInfo>, ChainError>> + Send;

    fn miner_info(
        &self,
        miner: ActorId,
    ) -> impl Future<Output = Result<MinerInfo, ChainError>> + Send;

    /// Signs and pushes the message to the message pool.
    ///
    /// Nonce assignment belongs to the implementation.
    fn push_message(
        &self,
        message: Message,
        options: SendOptions,
    ) -> impl Future<Output = Result<SignedMessage, ChainError>> + Send;

    /// Waits until the message has been included and `confidence` blocks were built on top of it.
    fn wait_message(
        &self,
        cid: Cid,
        confidence: u64,
    ) -> impl Future<Output = Result<MessageReceipt, ChainError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowPoStOutput {
    pub proofs: Vec<PoStProof>,
    /// Sectors the backend could not prove, the proofs are not valid when this is not empty.
    pub skipped: Vec<SectorNumber>,
}

pub trait ProofBackend: Send + Sync + 'static {
    fn generate_window_post(
        &self,
        miner: ActorId,
        post_proof: RegisteredPoStProof,
        sectors: &[SectorOnChainInfo],
        randomness: &Randomness,
    ) -> impl Future<Output = Result<WindowPoStOutput, ProvingError>> + Send;
}

pub trait FaultOracle: Send + Sync + 'static {
    /// Returns the sectors that cannot currently be proven.
    fn check_provable(
        &self,
        seal_proof: RegisteredSealProof,
        sectors: &[SectorIdentity],
    ) -> impl Future<Output = Result<Vec<SectorIdentity>, ProvingError>> + Send;
}
