use std::path::PathBuf;

use primitives_proofs::RegisteredSealProof;

use crate::{error::ProvingError, ports::FaultOracle, types::SectorIdentity};

/// Checks that every sector still has its replica and its cache on disk.
///
/// A sector is considered provable when `<sealed>/<sector number>` exists with exactly the sector
/// size and `<cache>/<sector number>` is a directory.
#[derive(Debug, Clone)]
pub struct ReplicaFaultOracle {
    sealed_sectors_directory: PathBuf,
    cache_directory: PathBuf,
}

impl ReplicaFaultOracle {
    pub fn new(sealed_sectors_directory: PathBuf, cache_directory: PathBuf) -> Self {
        Self {
            sealed_sectors_directory,
            cache_directory,
        }
    }

    async fn is_faulty(&self, seal_proof: RegisteredSealProof, sector: &SectorIdentity) -> bool {
        let name = sector.number.to_string();

        let replica = self.sealed_sectors_directory.join(&name);
        match tokio::fs::metadata(&replica).await {
            Ok(metadata) if metadata.len() == seal_proof.sector_size().bytes() => {}
            Ok(metadata) => {
                tracing::warn!(
                    sector = sector.number,
                    size = metadata.len(),
                    "replica does not have the expected size"
                );
                return true;
            }
            Err(err) => {
                tracing::warn!(sector = sector.number, %err, "replica is not accessible");
                return true;
            }
        }

        let cache = self.cache_directory.join(&name);
        match tokio::fs::metadata(&cache).await {
            Ok(metadata) if metadata.is_dir() => false,
            Ok(_) => {
                tracing::warn!(sector = sector.number, "sector cache is not a directory");
                true
            }
            Err(err) => {
                tracing::warn!(sector = sector.number, %err, "sector cache is not accessible");
                true
            }
        }
    }
}

impl FaultOracle for ReplicaFaultOracle {
    #[tracing::instrument(skip_all, fields(seal_proof = ?seal_proof, sectors = sectors.len()))]
    async fn check_provable(
        &self,
        seal_proof: RegisteredSealProof,
        sectors: &[SectorIdentity],
    ) -> Result<Vec<SectorIdentity>, ProvingError> {
        // A missing storage directory is an operator problem, not a sector fault.
        tokio::fs::read_dir(&self.sealed_sectors_directory).await?;
        tokio::fs::read_dir(&self.cache_directory).await?;

        let mut faulty = vec![];
        for sector in sectors {
            if self.is_faulty(seal_proof, sector).await {
                faulty.push(*sector);
            }
        }

        Ok(faulty)
    }
}
