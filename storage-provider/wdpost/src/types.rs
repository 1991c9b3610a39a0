use std::{collections::BTreeSet, fmt::Display};

use cid::{multihash::Multihash, Cid};
use codec::{Decode, Encode};
use primitives_proofs::{
    methods::MethodNum, ActorId, ChainEpoch, RegisteredPoStProof, RegisteredSealProof,
    SectorNumber, FAULT_DECLARATION_CUTOFF, W_POST_CHALLENGE_LOOKBACK,
};

/// Randomness drawn from the chain, used for challenges and chain commitments.
pub type Randomness = [u8; 32];

/// Receipt exit code, `0` means the message executed successfully.
pub type ExitCode = u32;

/// Amount of tokens, in the smallest denomination.
pub type TokenAmount = u128;

/// Index of a partition within its deadline.
pub type PartitionNumber = u64;

/// Multicodec for raw binary data.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L41
const RAW: u64 = 0x55;

/// BLAKE2b with a 256 bit digest.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L194
const BLAKE2B_256: u64 = 0xb220;

/// Proving period parameters, as defined by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvingPeriod {
    /// The number of non-overlapping PoSt deadlines in each proving period.
    pub deadlines: u64,

    /// The period over which all of the storage provider's active sectors will be challenged.
    pub proving_period: ChainEpoch,

    /// The duration of a deadline's challenge window.
    pub challenge_window: ChainEpoch,
}

/// Identifies a proving window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineInfo {
    /// The epoch at which this info was calculated.
    pub current_epoch: ChainEpoch,

    /// The epoch at which the proving period for this deadline starts.
    pub period_start: ChainEpoch,

    /// The deadline index within its proving period.
    pub index: u64,

    /// The first epoch from which a proof can be submitted.
    pub open_at: ChainEpoch,

    /// The first epoch from which a proof can *no longer* be submitted.
    pub close_at: ChainEpoch,

    /// The epoch at which the deadline's challenge is drawn.
    pub challenge: ChainEpoch,

    /// The first epoch at which a fault declaration is rejected for this deadline.
    pub fault_cutoff: ChainEpoch,
}

impl DeadlineInfo {
    // ref: <https://github.com/filecoin-project/builtin-actors/blob/8d957d2901c0f2044417c268f0511324f591cb92/actors/miner/src/deadline_info.rs#L43>
    pub fn new(
        current_epoch: ChainEpoch,
        period_start: ChainEpoch,
        index: u64,
        period: &ProvingPeriod,
    ) -> Self {
        let (open_at, close_at) = if index < period.deadlines {
            let open_at = period_start + index * period.challenge_window;
            (open_at, open_at + period.challenge_window)
        } else {
            let after_last_deadline = period_start + period.proving_period;
            (after_last_deadline, after_last_deadline)
        };

        Self {
            current_epoch,
            period_start,
            index,
            open_at,
            close_at,
            challenge: open_at.saturating_sub(W_POST_CHALLENGE_LOOKBACK),
            fault_cutoff: open_at.saturating_sub(FAULT_DECLARATION_CUTOFF),
        }
    }

    /// Whether the deadline is currently open.
    pub fn is_open(&self) -> bool {
        self.current_epoch >= self.open_at && self.current_epoch < self.close_at
    }

    /// Whether the deadline has already closed.
    pub fn has_elapsed(&self) -> bool {
        self.current_epoch >= self.close_at
    }

    /// Epochs left until the deadline closes, zero when it already has.
    pub fn remaining_epochs(&self) -> ChainEpoch {
        self.close_at.saturating_sub(self.current_epoch)
    }

    pub fn key(&self) -> WindowKey {
        WindowKey {
            deadline_index: self.index,
            open_at: self.open_at,
        }
    }
}

/// Uniquely identifies a window across proving periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub deadline_index: u64,
    pub open_at: ChainEpoch,
}

impl Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline {} (opens at {})", self.deadline_index, self.open_at)
    }
}

/// Snapshot of a partition, as read from the chain when the window starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    pub index: PartitionNumber,

    /// All sector numbers in this partition, including faulty and terminated sectors.
    pub sectors: BTreeSet<SectorNumber>,

    /// Sectors already declared faulty on-chain.
    pub faults: BTreeSet<SectorNumber>,

    /// Sectors terminated but not yet removed from the partition.
    pub terminated: BTreeSet<SectorNumber>,
}

impl Partition {
    pub fn new<I>(index: PartitionNumber, sectors: I) -> Self
    where
        I: IntoIterator<Item = SectorNumber>,
    {
        Self {
            index,
            sectors: sectors.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_faults<I>(mut self, faults: I) -> Self
    where
        I: IntoIterator<Item = SectorNumber>,
    {
        self.faults.extend(faults);
        self
    }

    pub fn with_terminated<I>(mut self, terminated: I) -> Self
    where
        I: IntoIterator<Item = SectorNumber>,
    {
        self.terminated.extend(terminated);
        self
    }

    /// Number of sectors a message proving this partition addresses.
    pub fn addressed_sectors(&self) -> u64 {
        self.sectors.len() as u64
    }

    /// Sectors that are expected to be proven: neither faulty nor terminated.
    pub fn proving_candidates(&self) -> BTreeSet<SectorNumber> {
        self.sectors
            .iter()
            .filter(|sector| !self.faults.contains(sector) && !self.terminated.contains(sector))
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    /// CommR
    pub sealed_cid: Cid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorIdentity {
    pub miner: ActorId,
    pub number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
}

/// Sectors of a partition that are going to be proven during the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvableSectorSet {
    pub partition: PartitionNumber,
    /// Sector count the partition addresses, regardless of how many get proven.
    pub addressed: u64,
    pub provable: BTreeSet<SectorNumber>,
    /// Candidates excluded during this run, reported on-chain as skipped.
    pub skipped: BTreeSet<SectorNumber>,
}

impl ProvableSectorSet {
    pub fn is_empty(&self) -> bool {
        self.provable.is_empty()
    }

    /// Moves every sector in `sectors` that is part of this set to the skipped set.
    pub fn skip(&mut self, sectors: &BTreeSet<SectorNumber>) {
        let skipped = self
            .provable
            .intersection(sectors)
            .copied()
            .collect::<Vec<_>>();
        for sector in skipped {
            self.provable.remove(&sector);
            self.skipped.insert(sector);
        }
    }
}

impl From<&Partition> for ProvableSectorSet {
    fn from(partition: &Partition) -> Self {
        Self {
            partition: partition.index,
            addressed: partition.addressed_sectors(),
            provable: partition.proving_candidates(),
            skipped: BTreeSet::new(),
        }
    }
}

/// Proof of Spacetime data, as submitted on chain.
#[derive(Debug, Decode, Encode, PartialEq, Eq, Clone)]
pub struct PoStProof {
    pub post_proof: RegisteredPoStProof,
    pub proof_bytes: Vec<u8>,
}

/// Proofs produced for a single window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofResult {
    pub post_proof: RegisteredPoStProof,
    pub proofs: Vec<PoStProof>,
}

/// A partition covered by the window's proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenPartition {
    pub index: PartitionNumber,
    pub sector_count: u64,
    pub skipped: BTreeSet<SectorNumber>,
}

/// Output of the generation stage, ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPoSt {
    pub window: DeadlineInfo,
    pub proof: ProofResult,
    /// Partitions covered by the proof, in chain order.
    pub partitions: Vec<ProvenPartition>,
    pub chain_commit_epoch: ChainEpoch,
    pub chain_commit_rand: Randomness,
}

impl GeneratedPoSt {
    /// A generation result for a window where there is nothing to prove.
    pub fn empty(window: DeadlineInfo, post_proof: RegisteredPoStProof) -> Self {
        Self {
            chain_commit_epoch: window.open_at,
            window,
            proof: ProofResult {
                post_proof,
                proofs: vec![],
            },
            partitions: vec![],
            chain_commit_rand: [0; 32],
        }
    }

    pub fn key(&self) -> WindowKey {
        self.window.key()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Partitions destined for exactly one on-chain message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionBatch {
    pub partitions: Vec<ProvenPartition>,
}

impl SubmissionBatch {
    pub fn sector_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| partition.sector_count)
            .sum()
    }

    pub fn partition_indices(&self) -> Vec<PartitionNumber> {
        self.partitions
            .iter()
            .map(|partition| partition.index)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[derive(Debug, Decode, Encode, PartialEq, Eq, Clone)]
pub struct PoStPartition {
    /// Partitions are numbered per-deadline, from zero.
    pub index: PartitionNumber,
    /// Sectors skipped while proving that weren't already declared faulty.
    pub skipped: BTreeSet<SectorNumber>,
}

/// Parameters of the `SubmitWindowedPoSt` method.
///
/// Reference:
/// * <https://github.com/filecoin-project/builtin-actors/blob/17ede2b256bc819dc309edf38e031e246a516486/actors/miner/src/types.rs#L118>
#[derive(Debug, Decode, Encode, PartialEq, Eq, Clone)]
pub struct SubmitWindowedPoStParams {
    /// The deadline index which the submission targets.
    pub deadline: u64,
    /// The partitions being proven.
    pub partitions: Vec<PoStPartition>,
    /// Array of proofs, one per distinct registered proof type present in the sectors being proven.
    pub proofs: Vec<PoStProof>,
    /// The epoch at which these proofs are being committed to a particular chain.
    pub chain_commit_epoch: ChainEpoch,
    /// The ticket randomness on the chain at the `chain_commit_epoch` on the chain this post is committed to.
    pub chain_commit_rand: Randomness,
}

/// Unsigned chain message, the message pool owns signing and nonce assignment.
#[derive(Debug, Decode, Encode, PartialEq, Eq, Clone)]
pub struct Message {
    pub from: ActorId,
    pub to: ActorId,
    pub method: MethodNum,
    pub value: TokenAmount,
    pub params: Vec<u8>,
}

impl Message {
    /// Content identifier of the encoded message.
    pub fn cid(&self) -> Cid {
        let digest = blake2b_simd::Params::new()
            .hash_length(32)
            .hash(&self.encode());
        let hash = Multihash::wrap(BLAKE2B_256, digest.as_bytes())
            .expect("multihash is large enough so it can wrap a 32 byte digest");
        Cid::new_v1(RAW, hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: Message,
    pub cid: Cid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Upper bound on the fee paid for the message, `None` leaves it to the message pool.
    pub max_fee: Option<TokenAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: Vec<u8>,
    /// Epoch of the tipset the message was included in.
    pub included_at: ChainEpoch,
}

impl MessageReceipt {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerInfo {
    pub owner: ActorId,
    pub worker: ActorId,
    pub window_post_proof_type: RegisteredPoStProof,
}

/// Where chain randomness is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomnessSource {
    /// Drand beacon entries.
    Beacon,
    /// Block tickets.
    Tickets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    Pushed,
    Confirmed(ExitCode),
    Failed(String),
}

/// A message pushed for a batch, together with its confirmation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub message: Message,
    pub cid: Cid,
    pub state: MessageState,
}

impl From<SignedMessage> for PendingMessage {
    fn from(signed: SignedMessage) -> Self {
        Self {
            message: signed.message,
            cid: signed.cid,
            state: MessageState::Pushed,
        }
    }
}
