use primitives_proofs::RegisteredPoStProof;

use crate::{
    error::BatchError,
    types::{ProvenPartition, SubmissionBatch},
};

/// Splits the partitions into batches that fit in a single message each.
///
/// Partitions are never reordered nor split, a batch is closed as soon as the next partition
/// would take it over `max_sectors_per_message`.
pub fn batch_partitions(
    partitions: &[ProvenPartition],
    max_sectors_per_message: u64,
) -> Result<Vec<SubmissionBatch>, BatchError> {
    if max_sectors_per_message == 0 {
        return Err(BatchError::ZeroLimit);
    }

    let mut batches = vec![];
    let mut current = SubmissionBatch::default();
    let mut current_sectors = 0u64;

    for partition in partitions {
        if partition.sector_count > max_sectors_per_message {
            tracing::error!(
                partition = partition.index,
                sectors = partition.sector_count,
                limit = max_sectors_per_message,
                "partition cannot fit in a single message"
            );
            return Err(BatchError::OversizedPartition {
                partition: partition.index,
                sectors: partition.sector_count,
                limit: max_sectors_per_message,
            });
        }

        if current_sectors + partition.sector_count > max_sectors_per_message {
            batches.push(std::mem::take(&mut current));
            current_sectors = 0;
        }

        current_sectors += partition.sector_count;
        current.partitions.push(partition.clone());
    }

    if !current.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}

/// How many full partitions of `post_proof` a single message can address.
pub fn partitions_per_message(post_proof: RegisteredPoStProof, max_sectors_per_message: u64) -> u64 {
    max_sectors_per_message / post_proof.window_post_partitions_sector()
}
