#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use cid::{multihash::Multihash, Cid};
use polka_storage_provider_wdpost::{
    error::{ChainError, ProvingError},
    ports::{ChainPort, FaultOracle, ProofBackend, WindowPoStOutput},
    types::{
        DeadlineInfo, ExitCode, Message, MessageReceipt, MinerInfo, Partition, PoStProof,
        ProvingPeriod, Randomness, RandomnessSource, SectorIdentity, SectorOnChainInfo,
        SendOptions, SignedMessage,
    },
};
use primitives_proofs::{
    ActorId, ChainEpoch, DomainSeparationTag, RegisteredPoStProof, RegisteredSealProof,
    SectorNumber,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

pub const MINER: ActorId = 1000;
pub const WORKER: ActorId = 1001;
pub const SEAL_PROOF: RegisteredSealProof = RegisteredSealProof::StackedDRG2KiBV1P1;
pub const POST_PROOF: RegisteredPoStProof = RegisteredPoStProof::StackedDRGWindow2KiBV1P1;

pub const PERIOD: ProvingPeriod = ProvingPeriod {
    deadlines: 48,
    proving_period: 2880,
    challenge_window: 60,
};

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deadline 3 of the first proving period, currently open.
pub fn window() -> DeadlineInfo {
    DeadlineInfo::new(185, 0, 3, &PERIOD)
}

/// `count` partitions of `sectors` sectors each, numbered contiguously.
pub fn partitions(count: u64, sectors: u64) -> Vec<Partition> {
    (0..count)
        .map(|index| Partition::new(index, index * sectors..(index + 1) * sectors))
        .collect()
}

/// Randomness the fake chain returns for `source` at `epoch`.
pub fn fake_randomness(source: RandomnessSource, epoch: ChainEpoch) -> Randomness {
    let mut randomness = [epoch as u8; 32];
    randomness[0] = match source {
        RandomnessSource::Beacon => 0xbe,
        RandomnessSource::Tickets => 0x71,
    };
    randomness
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomnessRequest {
    pub source: RandomnessSource,
    pub tag: DomainSeparationTag,
    pub epoch: ChainEpoch,
    pub entropy: Vec<u8>,
}

/// Chain with a single miner, messages pushed to it are forwarded to the receiver returned by
/// [`FakeChain::new`].
pub struct FakeChain {
    partitions: Vec<Partition>,
    worker: ActorId,
    pushed_tx: UnboundedSender<SignedMessage>,
    push_attempts: AtomicUsize,
    pushes: Mutex<HashMap<Cid, usize>>,
    randomness_requests: Mutex<Vec<RandomnessRequest>>,
    failing_pushes: BTreeSet<usize>,
    exit_codes: HashMap<usize, ExitCode>,
    wait_delays: HashMap<usize, Duration>,
    panicking_waits: BTreeSet<usize>,
    push_delay: Option<Duration>,
    cancel_on_push: Option<(usize, CancellationToken)>,
    missing_sector_info: BTreeSet<SectorNumber>,
    post_proof: RegisteredPoStProof,
}

impl FakeChain {
    pub fn new(partitions: Vec<Partition>) -> (Self, UnboundedReceiver<SignedMessage>) {
        let (pushed_tx, pushed_rx) = unbounded_channel();
        let chain = Self {
            partitions,
            worker: WORKER,
            pushed_tx,
            push_attempts: AtomicUsize::new(0),
            pushes: Mutex::new(HashMap::new()),
            randomness_requests: Mutex::new(vec![]),
            failing_pushes: BTreeSet::new(),
            exit_codes: HashMap::new(),
            wait_delays: HashMap::new(),
            panicking_waits: BTreeSet::new(),
            push_delay: None,
            cancel_on_push: None,
            missing_sector_info: BTreeSet::new(),
            post_proof: POST_PROOF,
        };
        (chain, pushed_rx)
    }

    /// The `attempt`-th push (from zero) is rejected by the message pool.
    pub fn failing_push(mut self, attempt: usize) -> Self {
        self.failing_pushes.insert(attempt);
        self
    }

    /// The message of the `push`-th successful push executes with `exit_code`.
    pub fn exit_code(mut self, push: usize, exit_code: ExitCode) -> Self {
        self.exit_codes.insert(push, exit_code);
        self
    }

    pub fn wait_delay(mut self, push: usize, delay: Duration) -> Self {
        self.wait_delays.insert(push, delay);
        self
    }

    /// Waiting for the message of the `push`-th successful push panics.
    pub fn panicking_wait(mut self, push: usize) -> Self {
        self.panicking_waits.insert(push);
        self
    }

    /// Every push returns `delay` after its message reached the message pool.
    pub fn push_delay(mut self, delay: Duration) -> Self {
        self.push_delay = Some(delay);
        self
    }

    /// Cancels `token` while serving the `attempt`-th push, once its message reached the message
    /// pool. The push itself still succeeds.
    pub fn cancel_on_push(mut self, attempt: usize, token: CancellationToken) -> Self {
        self.cancel_on_push = Some((attempt, token));
        self
    }

    /// The chain has no info for `sector`.
    pub fn without_sector_info(mut self, sector: SectorNumber) -> Self {
        self.missing_sector_info.insert(sector);
        self
    }

    pub fn with_worker(mut self, worker: ActorId) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_post_proof(mut self, post_proof: RegisteredPoStProof) -> Self {
        self.post_proof = post_proof;
        self
    }

    pub fn randomness_requests(&self) -> Vec<RandomnessRequest> {
        self.randomness_requests
            .lock()
            .expect("lock not poisoned")
            .clone()
    }
}

impl ChainPort for FakeChain {
    async fn randomness(
        &self,
        source: RandomnessSource,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> Result<Randomness, ChainError> {
        self.randomness_requests
            .lock()
            .expect("lock not poisoned")
            .push(RandomnessRequest {
                source,
                tag,
                epoch,
                entropy: entropy.to_vec(),
            });
        Ok(fake_randomness(source, epoch))
    }

    async fn partitions(
        &self,
        miner: ActorId,
        _deadline_index: u64,
    ) -> Result<Vec<Partition>, ChainError> {
        if miner != MINER {
            return Err(ChainError::NotFound(format!("miner {miner}")));
        }
        Ok(self.partitions.clone())
    }

    async fn sectors_info(
        &self,
        _miner: ActorId,
        sectors: &BTreeSet<SectorNumber>,
    ) -> Result<Vec<SectorOnChainInfo>, ChainError> {
        Ok(sectors
            .iter()
            .filter(|sector| !self.missing_sector_info.contains(sector))
            .map(|sector| SectorOnChainInfo {
                sector_number: *sector,
                seal_proof: SEAL_PROOF,
                sealed_cid: Cid::new_v1(
                    0x55,
                    Multihash::<64>::wrap(0xb220, &sector.to_be_bytes()).unwrap(),
                ),
            })
            .collect())
    }

    async fn miner_info(&self, _miner: ActorId) -> Result<MinerInfo, ChainError> {
        Ok(MinerInfo {
            owner: MINER,
            worker: self.worker,
            window_post_proof_type: self.post_proof,
        })
    }

    async fn push_message(
        &self,
        message: Message,
        _options: SendOptions,
    ) -> Result<SignedMessage, ChainError> {
        let attempt = self.push_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_pushes.contains(&attempt) {
            return Err(ChainError::Rejected(format!(
                "push {attempt} rejected by the message pool"
            )));
        }

        let signed = SignedMessage {
            cid: message.cid(),
            message,
        };
        self.pushes
            .lock()
            .expect("lock not poisoned")
            .insert(signed.cid, attempt);
        self.pushed_tx
            .send(signed.clone())
            .map_err(|_| ChainError::Unavailable("nobody is listening".into()))?;

        if let Some((cancel_at, token)) = &self.cancel_on_push {
            if *cancel_at == attempt {
                token.cancel();
            }
        }
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(signed)
    }

    async fn wait_message(&self, cid: Cid, _confidence: u64) -> Result<MessageReceipt, ChainError> {
        let attempt = self
            .pushes
            .lock()
            .expect("lock not poisoned")
            .get(&cid)
            .copied()
            .ok_or_else(|| ChainError::NotFound(format!("message {cid}")))?;

        if let Some(delay) = self.wait_delays.get(&attempt) {
            tokio::time::sleep(*delay).await;
        }
        if self.panicking_waits.contains(&attempt) {
            panic!("lost track of message {cid}");
        }

        Ok(MessageReceipt {
            exit_code: self.exit_codes.get(&attempt).copied().unwrap_or(0),
            return_data: vec![],
            included_at: 200 + attempt as ChainEpoch,
        })
    }
}

/// Proves whatever it is given, optionally skipping sectors or failing first.
#[derive(Default)]
pub struct FakeProver {
    skip_once: Mutex<BTreeSet<SectorNumber>>,
    skip_first: bool,
    failures: AtomicUsize,
    calls: Mutex<Vec<Vec<SectorNumber>>>,
}

impl FakeProver {
    /// The first proving call reports `sectors` as skipped.
    pub fn skipping_once<I: IntoIterator<Item = SectorNumber>>(sectors: I) -> Self {
        Self {
            skip_once: Mutex::new(sectors.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every proving call reports the first sector it was given as skipped.
    pub fn always_skipping_first() -> Self {
        Self {
            skip_first: true,
            ..Default::default()
        }
    }

    /// The next `failures` proving calls fail.
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    /// Sectors given to each proving call, in call order.
    pub fn calls(&self) -> Vec<Vec<SectorNumber>> {
        self.calls.lock().expect("lock not poisoned").clone()
    }
}

impl ProofBackend for FakeProver {
    async fn generate_window_post(
        &self,
        _miner: ActorId,
        post_proof: RegisteredPoStProof,
        sectors: &[SectorOnChainInfo],
        randomness: &Randomness,
    ) -> Result<WindowPoStOutput, ProvingError> {
        let numbers = sectors
            .iter()
            .map(|sector| sector.sector_number)
            .collect::<Vec<_>>();
        self.calls
            .lock()
            .expect("lock not poisoned")
            .push(numbers.clone());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProvingError::Backend("gpu went away".into()));
        }

        let mut skip_once = self.skip_once.lock().expect("lock not poisoned");
        let mut skipped = numbers
            .iter()
            .filter(|sector| skip_once.contains(sector))
            .copied()
            .collect::<Vec<_>>();
        skip_once.clear();
        if self.skip_first {
            skipped.extend(numbers.first());
        }

        Ok(WindowPoStOutput {
            proofs: vec![PoStProof {
                post_proof,
                proof_bytes: randomness.to_vec(),
            }],
            skipped,
        })
    }
}

/// Reports a fixed set of sectors as faulty.
#[derive(Default)]
pub struct FakeFaults {
    faulty: BTreeSet<SectorNumber>,
}

impl FakeFaults {
    pub fn new<I: IntoIterator<Item = SectorNumber>>(faulty: I) -> Self {
        Self {
            faulty: faulty.into_iter().collect(),
        }
    }
}

impl FaultOracle for FakeFaults {
    async fn check_provable(
        &self,
        _seal_proof: RegisteredSealProof,
        sectors: &[SectorIdentity],
    ) -> Result<Vec<SectorIdentity>, ProvingError> {
        Ok(sectors
            .iter()
            .filter(|sector| self.faulty.contains(&sector.number))
            .copied()
            .collect())
    }
}

/// Drains every message pushed so far.
pub fn drain(rx: &mut UnboundedReceiver<SignedMessage>) -> Vec<SignedMessage> {
    let mut messages = vec![];
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
