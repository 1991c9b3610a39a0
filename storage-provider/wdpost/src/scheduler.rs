use std::{collections::HashMap, fmt::Display, sync::Arc};

use primitives_proofs::ChainEpoch;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    batch::batch_partitions,
    config::SchedulerConfig,
    error::WindowPoStError,
    orchestrator::ProofOrchestrator,
    ports::{ChainPort, FaultOracle, ProofBackend},
    submission::{SubmissionPipeline, SubmissionReport},
    types::{DeadlineInfo, GeneratedPoSt, MinerInfo, WindowKey},
};

/// Where a window is in its lifecycle.
///
/// ```text
/// Idle -> Generating -> Generated -> Submitting -> Done
///              \-> GenerationFailed     \-> SubmissionFailed
/// ```
///
/// A failed generation can be retried. A failed submission can only be retried when it did not
/// push any message, otherwise the already pushed batches would be proven twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowStage {
    Idle,
    Generating,
    /// The proof is ready, waiting to be submitted.
    Generated {
        partitions: usize,
    },
    Submitting,
    /// Every message reached a terminal state, some may have failed on-chain.
    Done {
        pushed: usize,
        confirmed: usize,
    },
    /// The window can be generated again, while it is still open.
    GenerationFailed(String),
    /// Submission stopped early, `pushed` messages may still land on-chain.
    SubmissionFailed {
        reason: String,
        pushed: usize,
    },
}

impl WindowStage {
    fn name(&self) -> &'static str {
        match self {
            WindowStage::Idle => "idle",
            WindowStage::Generating => "generating",
            WindowStage::Generated { .. } => "generated",
            WindowStage::Submitting => "submitting",
            WindowStage::Done { .. } => "done",
            WindowStage::GenerationFailed(_) => "generation failed",
            WindowStage::SubmissionFailed { .. } => "submission failed",
        }
    }
}

impl Display for WindowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowStage::GenerationFailed(reason) => write!(f, "generation failed ({reason})"),
            WindowStage::SubmissionFailed { reason, pushed } => {
                write!(f, "submission failed after {pushed} pushed messages ({reason})")
            }
            stage => f.write_str(stage.name()),
        }
    }
}

/// Coordinates the generation and submission of Window PoSts.
///
/// The two stages are separate so the caller decides when to submit, each is available both
/// inline ([`WindowPoStScheduler::generate`], [`WindowPoStScheduler::submit`]) and as a spawned
/// task ([`WindowPoStScheduler::start_generate_post`], [`WindowPoStScheduler::start_submit_post`]).
pub struct WindowPoStScheduler<C, P, F> {
    chain: Arc<C>,
    orchestrator: Arc<ProofOrchestrator<C, P, F>>,
    pipeline: Arc<SubmissionPipeline<C>>,
    config: Arc<SchedulerConfig>,
    windows: Arc<Mutex<HashMap<WindowKey, TrackedWindow>>>,
    tracker: TaskTracker,
}

// Deriving would require `C`, `P` and `F` to be `Clone`.
impl<C, P, F> Clone for WindowPoStScheduler<C, P, F> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            orchestrator: self.orchestrator.clone(),
            pipeline: self.pipeline.clone(),
            config: self.config.clone(),
            windows: self.windows.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<C, P, F> WindowPoStScheduler<C, P, F>
where
    C: ChainPort,
    P: ProofBackend,
    F: FaultOracle,
{
    pub fn new(chain: Arc<C>, prover: Arc<P>, faults: Arc<F>, config: SchedulerConfig) -> Self {
        let orchestrator = ProofOrchestrator::new(
            chain.clone(),
            prover,
            faults,
            config.miner,
            config.post_proof,
            config.max_skip_retries,
        );
        let pipeline = SubmissionPipeline::new(
            chain.clone(),
            config.miner,
            config.worker,
            config.message_confidence,
            config.send_options(),
        );

        Self {
            chain,
            orchestrator: Arc::new(orchestrator),
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            windows: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Checks the configuration against the miner's on-chain state.
    #[tracing::instrument(skip_all, fields(miner = self.config.miner))]
    pub async fn verify_miner(&self) -> Result<MinerInfo, WindowPoStError> {
        let info = self.chain.miner_info(self.config.miner).await?;

        if info.worker != self.config.worker {
            return Err(WindowPoStError::WorkerMismatch {
                configured: self.config.worker,
                on_chain: info.worker,
            });
        }

        if info.window_post_proof_type != self.config.post_proof {
            return Err(WindowPoStError::ProofMismatch {
                configured: self.config.post_proof,
                on_chain: info.window_post_proof_type,
            });
        }

        tracing::info!(worker = info.worker, "miner configuration matches the chain");
        Ok(info)
    }

    /// Current stage of the window, windows never seen before are [`WindowStage::Idle`].
    pub async fn stage(&self, key: WindowKey) -> WindowStage {
        self.windows
            .lock()
            .await
            .get(&key)
            .map(|tracked| tracked.stage.clone())
            .unwrap_or(WindowStage::Idle)
    }

    /// Drops the window's bookkeeping, it goes back to [`WindowStage::Idle`].
    pub async fn forget(&self, key: WindowKey) -> Option<WindowStage> {
        self.windows
            .lock()
            .await
            .remove(&key)
            .map(|tracked| tracked.stage)
    }

    /// Number of windows with bookkeeping, windows that closed are dropped when the next one
    /// starts generating.
    pub async fn tracked_windows(&self) -> usize {
        self.windows.lock().await.len()
    }

    #[tracing::instrument(skip_all, fields(deadline = window.index, open_at = window.open_at))]
    pub async fn generate(
        &self,
        window: &DeadlineInfo,
        token: &CancellationToken,
    ) -> Result<GeneratedPoSt, WindowPoStError> {
        let key = window.key();
        self.begin(window, WindowStage::Generating).await?;

        if window.has_elapsed() {
            tracing::warn!(
                current_epoch = window.current_epoch,
                close_at = window.close_at,
                "generating a proof for a window that already closed"
            );
        }

        match self.orchestrator.generate(window, token).await {
            Ok(generated) => {
                self.settle(
                    key,
                    WindowStage::Generated {
                        partitions: generated.partitions.len(),
                    },
                )
                .await;
                Ok(generated)
            }
            Err(err) => {
                tracing::error!(%err, retryable = err.is_retryable(), "window post generation failed");
                self.settle(key, WindowStage::GenerationFailed(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    pub fn start_generate_post(
        &self,
        window: DeadlineInfo,
        token: CancellationToken,
    ) -> JoinHandle<Result<GeneratedPoSt, WindowPoStError>> {
        let scheduler = self.clone();
        self.tracker
            .spawn(async move { scheduler.generate(&window, &token).await })
    }

    /// Batches the generated partitions and submits one message per batch.
    ///
    /// Only windows in [`WindowStage::Generated`] can be submitted, this keeps a window from
    /// being submitted twice. A cancelled submission leaves the window in
    /// [`WindowStage::SubmissionFailed`], with the number of messages that were pushed.
    #[tracing::instrument(skip_all, fields(deadline = generated.window.index, open_at = generated.window.open_at))]
    pub async fn submit(
        &self,
        generated: &GeneratedPoSt,
        token: &CancellationToken,
    ) -> Result<SubmissionReport, WindowPoStError> {
        let key = generated.key();
        self.begin(&generated.window, WindowStage::Submitting).await?;

        let batches =
            match batch_partitions(&generated.partitions, self.config.max_sectors_per_message) {
                Ok(batches) => batches,
                Err(err) => {
                    let stage = WindowStage::SubmissionFailed {
                        reason: err.to_string(),
                        pushed: 0,
                    };
                    self.settle(key, stage).await;
                    return Err(err.into());
                }
            };
        tracing::debug!(batches = batches.len(), "partitions batched");

        let report = self.pipeline.submit(generated, batches, token).await;

        let stage = if report.cancelled {
            tracing::warn!(pushed = report.pushed(), "window post submission was cancelled");
            WindowStage::SubmissionFailed {
                reason: WindowPoStError::Cancelled.to_string(),
                pushed: report.pushed(),
            }
        } else {
            tracing::info!(
                pushed = report.pushed(),
                confirmed = report.confirmed(),
                "window post submission finished"
            );
            WindowStage::Done {
                pushed: report.pushed(),
                confirmed: report.confirmed(),
            }
        };
        self.settle(key, stage).await;

        Ok(report)
    }

    pub fn start_submit_post(
        &self,
        generated: GeneratedPoSt,
        token: CancellationToken,
    ) -> JoinHandle<Result<SubmissionReport, WindowPoStError>> {
        let scheduler = self.clone();
        self.tracker
            .spawn(async move { scheduler.submit(&generated, &token).await })
    }

    /// Generates and submits the window's proof.
    pub async fn run_window(
        &self,
        window: &DeadlineInfo,
        token: &CancellationToken,
    ) -> Result<SubmissionReport, WindowPoStError> {
        let generated = self.generate(window, token).await?;
        self.submit(&generated, token).await
    }

    /// Stops accepting stage tasks and waits for the running ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn begin(
        &self,
        window: &DeadlineInfo,
        next: WindowStage,
    ) -> Result<(), WindowPoStError> {
        let key = window.key();
        let mut windows = self.windows.lock().await;

        if next == WindowStage::Generating {
            let before = windows.len();
            windows.retain(|tracked_key, tracked| {
                *tracked_key == key
                    || tracked.is_running()
                    || tracked.close_at > window.current_epoch
            });
            let pruned = before - windows.len();
            if pruned > 0 {
                tracing::debug!(pruned, "dropped closed windows");
            }
        }

        let current = windows
            .get(&key)
            .map(|tracked| tracked.stage.clone())
            .unwrap_or(WindowStage::Idle);

        let allowed = match (&current, &next) {
            (
                WindowStage::Idle
                | WindowStage::GenerationFailed(_)
                | WindowStage::SubmissionFailed { pushed: 0, .. },
                WindowStage::Generating,
            ) => true,
            (WindowStage::Generated { .. }, WindowStage::Submitting) => true,
            _ => false,
        };
        if !allowed {
            tracing::warn!(window = %key, from = %current, to = next.name(), "invalid window transition");
            return Err(WindowPoStError::InvalidTransition {
                window: key,
                from: current,
                to: next.name(),
            });
        }

        windows.insert(
            key,
            TrackedWindow {
                close_at: window.close_at,
                stage: next,
            },
        );
        Ok(())
    }

    async fn settle(&self, key: WindowKey, stage: WindowStage) {
        if let Some(tracked) = self.windows.lock().await.get_mut(&key) {
            tracked.stage = stage;
        }
    }
}

struct TrackedWindow {
    close_at: ChainEpoch,
    stage: WindowStage,
}

impl TrackedWindow {
    fn is_running(&self) -> bool {
        matches!(
            self.stage,
            WindowStage::Generating | WindowStage::Submitting
        )
    }
}
