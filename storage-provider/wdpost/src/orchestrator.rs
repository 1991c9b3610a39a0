use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use codec::Encode;
use futures::future::try_join_all;
use primitives_proofs::{
    ActorId, DomainSeparationTag, RegisteredPoStProof, RegisteredSealProof, SectorNumber,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{cancellable, ProvingError, WindowPoStError},
    ports::{ChainPort, FaultOracle, ProofBackend},
    types::{
        DeadlineInfo, GeneratedPoSt, ProofResult, ProvableSectorSet, ProvenPartition,
        RandomnessSource, SectorIdentity, SectorOnChainInfo,
    },
};

/// Produces the proof for a single window.
///
/// Nothing is kept between calls, every window checks sector health from scratch.
pub struct ProofOrchestrator<C, P, F> {
    chain: Arc<C>,
    prover: Arc<P>,
    faults: Arc<F>,
    miner: ActorId,
    post_proof: RegisteredPoStProof,
    max_skip_retries: usize,
}

impl<C, P, F> ProofOrchestrator<C, P, F>
where
    C: ChainPort,
    P: ProofBackend,
    F: FaultOracle,
{
    pub fn new(
        chain: Arc<C>,
        prover: Arc<P>,
        faults: Arc<F>,
        miner: ActorId,
        post_proof: RegisteredPoStProof,
        max_skip_retries: usize,
    ) -> Self {
        Self {
            chain,
            prover,
            faults,
            miner,
            post_proof,
            max_skip_retries,
        }
    }

    #[tracing::instrument(skip_all, fields(deadline = window.index, open_at = window.open_at))]
    pub async fn generate(
        &self,
        window: &DeadlineInfo,
        token: &CancellationToken,
    ) -> Result<GeneratedPoSt, WindowPoStError> {
        let partitions = cancellable(token, self.chain.partitions(self.miner, window.index)).await?;
        tracing::debug!(partitions = partitions.len(), "fetched deadline partitions");

        let mut sets = partitions
            .iter()
            .map(ProvableSectorSet::from)
            .collect::<Vec<_>>();

        let candidates = provable_sectors(&sets);
        if candidates.is_empty() {
            tracing::info!("no sectors to prove in this deadline");
            return Ok(GeneratedPoSt::empty(window.clone(), self.post_proof));
        }

        let infos = cancellable(token, self.chain.sectors_info(self.miner, &candidates))
            .await?
            .into_iter()
            .map(|info| (info.sector_number, info))
            .collect::<BTreeMap<_, _>>();
        if let Some(missing) = candidates.iter().find(|sector| !infos.contains_key(sector)) {
            return Err(WindowPoStError::MissingSectorInfo(*missing));
        }

        let faulty = cancellable(token, self.check_sectors(&infos)).await?;
        if !faulty.is_empty() {
            tracing::warn!(
                faulty = faulty.len(),
                "some sectors failed the provability check and will be skipped"
            );
            for set in sets.iter_mut() {
                set.skip(&faulty);
            }
        }

        if sets.iter().all(ProvableSectorSet::is_empty) {
            tracing::warn!("every sector in the deadline is faulty, nothing to prove");
            return Ok(GeneratedPoSt::empty(window.clone(), self.post_proof));
        }

        let entropy = self.miner.encode();
        let randomness = cancellable(
            token,
            self.chain.randomness(
                RandomnessSource::Beacon,
                DomainSeparationTag::WindowedPoStChallengeSeed,
                window.challenge,
                &entropy,
            ),
        )
        .await?;

        let chain_commit_epoch = window.open_at;
        let chain_commit_rand = cancellable(
            token,
            self.chain.randomness(
                RandomnessSource::Tickets,
                DomainSeparationTag::PoStChainCommit,
                chain_commit_epoch,
                &[],
            ),
        )
        .await?;

        let mut retries = 0;
        let proofs = loop {
            let sectors = provable_sectors(&sets)
                .iter()
                .filter_map(|sector| infos.get(sector).cloned())
                .collect::<Vec<_>>();
            if sectors.is_empty() {
                tracing::warn!("the backend skipped every sector, nothing to prove");
                return Ok(GeneratedPoSt::empty(window.clone(), self.post_proof));
            }

            tracing::info!(sectors = sectors.len(), "generating window post");
            let output = cancellable(
                token,
                self.prover
                    .generate_window_post(self.miner, self.post_proof, &sectors, &randomness),
            )
            .await?;

            if output.skipped.is_empty() {
                break output.proofs;
            }

            retries += 1;
            tracing::warn!(
                skipped = output.skipped.len(),
                retries,
                "proving backend skipped sectors"
            );
            if retries > self.max_skip_retries {
                return Err(ProvingError::TooManySkipRetries(self.max_skip_retries).into());
            }

            let skipped = output.skipped.into_iter().collect::<BTreeSet<_>>();
            for set in sets.iter_mut() {
                set.skip(&skipped);
            }
        };

        let partitions = sets
            .into_iter()
            .filter(|set| !set.is_empty())
            .map(|set| ProvenPartition {
                index: set.partition,
                sector_count: set.addressed,
                skipped: set.skipped,
            })
            .collect::<Vec<_>>();

        tracing::info!(
            partitions = partitions.len(),
            proofs = proofs.len(),
            "window post generated"
        );

        Ok(GeneratedPoSt {
            window: window.clone(),
            proof: ProofResult {
                post_proof: self.post_proof,
                proofs,
            },
            partitions,
            chain_commit_epoch,
            chain_commit_rand,
        })
    }

    /// Runs the fault oracle over all sectors, one call per seal proof.
    async fn check_sectors(
        &self,
        infos: &BTreeMap<SectorNumber, SectorOnChainInfo>,
    ) -> Result<BTreeSet<SectorNumber>, ProvingError> {
        let mut by_proof = BTreeMap::<RegisteredSealProof, Vec<SectorIdentity>>::new();
        for info in infos.values() {
            by_proof
                .entry(info.seal_proof)
                .or_default()
                .push(SectorIdentity {
                    miner: self.miner,
                    number: info.sector_number,
                    seal_proof: info.seal_proof,
                });
        }

        let checks = by_proof
            .iter()
            .map(|(seal_proof, sectors)| self.faults.check_provable(*seal_proof, sectors));

        Ok(try_join_all(checks)
            .await?
            .into_iter()
            .flatten()
            .map(|sector| sector.number)
            .collect())
    }
}

fn provable_sectors(sets: &[ProvableSectorSet]) -> BTreeSet<SectorNumber> {
    sets.iter()
        .flat_map(|set| set.provable.iter().copied())
        .collect()
}
