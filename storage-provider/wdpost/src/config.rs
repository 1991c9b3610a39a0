use std::path::{Path, PathBuf};

use primitives_proofs::{ActorId, RegisteredPoStProof, ADDRESSED_SECTORS_MAX};
use serde::Deserialize;

use crate::{
    fault::ReplicaFaultOracle,
    types::{SendOptions, TokenAmount},
};

/// Default number of blocks built on top of an included message before it is considered final.
pub const DEFAULT_MESSAGE_CONFIDENCE: u64 = 5;

/// Default number of times proving is retried after the backend skipped sectors.
pub const DEFAULT_MAX_SKIP_RETRIES: usize = 3;

fn default_max_sectors_per_message() -> u64 {
    ADDRESSED_SECTORS_MAX
}

fn default_message_confidence() -> u64 {
    DEFAULT_MESSAGE_CONFIDENCE
}

fn default_max_skip_retries() -> usize {
    DEFAULT_MAX_SKIP_RETRIES
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("a message addressing {limit} sectors cannot fit a single {partition_sectors} sector partition")]
    MessageLimitTooSmall { limit: u64, partition_sectors: u64 },

    #[error("a message can address at most {max} sectors, {limit} were configured")]
    MessageLimitTooLarge { limit: u64, max: u64 },

    #[error("message confidence must be greater than zero")]
    ZeroConfidence,

    #[error("both the sealed sectors and the cache directories are required to check replicas")]
    IncompleteReplicaStorage,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The scheduler arguments, as passed by the user, unvalidated.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[serde(deny_unknown_fields)]
pub struct SchedulerArguments {
    /// Storage provider actor the proofs are submitted for.
    #[cfg_attr(feature = "clap", arg(long))]
    pub miner: ActorId,

    /// Actor sending, and paying for, the proof messages.
    #[cfg_attr(feature = "clap", arg(long))]
    pub worker: ActorId,

    /// Proof of Spacetime proof type.
    #[cfg_attr(feature = "clap", arg(long))]
    pub post_proof: RegisteredPoStProof,

    /// Maximum number of sectors a single message can address.
    #[serde(default = "default_max_sectors_per_message")]
    #[cfg_attr(feature = "clap", arg(long, default_value_t = ADDRESSED_SECTORS_MAX))]
    pub max_sectors_per_message: u64,

    /// Number of blocks to wait for after a message has been included.
    #[serde(default = "default_message_confidence")]
    #[cfg_attr(feature = "clap", arg(long, default_value_t = DEFAULT_MESSAGE_CONFIDENCE))]
    pub message_confidence: u64,

    /// Maximum fee paid per message, left to the message pool when not set.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub max_fee: Option<TokenAmount>,

    /// How many times proving is retried after the backend skipped sectors.
    #[serde(default = "default_max_skip_retries")]
    #[cfg_attr(feature = "clap", arg(long, default_value_t = DEFAULT_MAX_SKIP_RETRIES))]
    pub max_skip_retries: usize,

    /// Directory holding the sealed sector replicas, named after their sector number.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub sealed_sectors_directory: Option<PathBuf>,

    /// Directory holding the sealing caches, named after their sector number.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub cache_directory: Option<PathBuf>,
}

/// Where the sealed replicas live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStorage {
    pub sealed_sectors_directory: PathBuf,
    pub cache_directory: PathBuf,
}

/// A valid scheduler configuration. To be created using [`SchedulerConfig::try_from`] or
/// [`SchedulerConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub miner: ActorId,
    pub worker: ActorId,
    pub post_proof: RegisteredPoStProof,
    pub max_sectors_per_message: u64,
    pub message_confidence: u64,
    pub max_fee: Option<TokenAmount>,
    pub max_skip_retries: usize,
    pub replica_storage: Option<ReplicaStorage>,
}

impl SchedulerConfig {
    /// Configuration with the protocol defaults.
    pub fn new(miner: ActorId, worker: ActorId, post_proof: RegisteredPoStProof) -> Self {
        Self {
            miner,
            worker,
            post_proof,
            max_sectors_per_message: ADDRESSED_SECTORS_MAX,
            message_confidence: DEFAULT_MESSAGE_CONFIDENCE,
            max_fee: None,
            max_skip_retries: DEFAULT_MAX_SKIP_RETRIES,
            replica_storage: None,
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let mut buffered_file = std::io::BufReader::new(file);
        let arguments: SchedulerArguments = serde_json::from_reader(&mut buffered_file)?;
        arguments.try_into()
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            max_fee: self.max_fee,
        }
    }

    /// Fault oracle checking the configured replica storage, if any.
    pub fn replica_fault_oracle(&self) -> Option<ReplicaFaultOracle> {
        self.replica_storage.as_ref().map(|storage| {
            ReplicaFaultOracle::new(
                storage.sealed_sectors_directory.clone(),
                storage.cache_directory.clone(),
            )
        })
    }
}

impl TryFrom<SchedulerArguments> for SchedulerConfig {
    type Error = ConfigError;

    fn try_from(value: SchedulerArguments) -> Result<Self, Self::Error> {
        let partition_sectors = value.post_proof.window_post_partitions_sector();
        if value.max_sectors_per_message < partition_sectors {
            return Err(ConfigError::MessageLimitTooSmall {
                limit: value.max_sectors_per_message,
                partition_sectors,
            });
        }
        if value.max_sectors_per_message > ADDRESSED_SECTORS_MAX {
            return Err(ConfigError::MessageLimitTooLarge {
                limit: value.max_sectors_per_message,
                max: ADDRESSED_SECTORS_MAX,
            });
        }

        if value.message_confidence == 0 {
            return Err(ConfigError::ZeroConfidence);
        }

        let replica_storage = match (value.sealed_sectors_directory, value.cache_directory) {
            (Some(sealed_sectors_directory), Some(cache_directory)) => Some(ReplicaStorage {
                sealed_sectors_directory,
                cache_directory,
            }),
            (None, None) => {
                tracing::warn!("no replica storage was configured, sector files won't be checked");
                None
            }
            _ => return Err(ConfigError::IncompleteReplicaStorage),
        };

        Ok(Self {
            miner: value.miner,
            worker: value.worker,
            post_proof: value.post_proof,
            max_sectors_per_message: value.max_sectors_per_message,
            message_confidence: value.message_confidence,
            max_fee: value.max_fee,
            max_skip_retries: value.max_skip_retries,
            replica_storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use primitives_proofs::{RegisteredPoStProof, ADDRESSED_SECTORS_MAX};

    use super::{
        ConfigError, SchedulerArguments, SchedulerConfig, DEFAULT_MAX_SKIP_RETRIES,
        DEFAULT_MESSAGE_CONFIDENCE,
    };

    fn parse(json: &str) -> Result<SchedulerConfig, ConfigError> {
        serde_json::from_str::<SchedulerArguments>(json)?.try_into()
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse(r#"{ "miner": 1000, "worker": 1001, "post_proof": "2KiB" }"#).unwrap();

        assert_eq!(
            config,
            SchedulerConfig::new(1000, 1001, RegisteredPoStProof::StackedDRGWindow2KiBV1P1)
        );
        assert_eq!(config.max_sectors_per_message, ADDRESSED_SECTORS_MAX);
        assert_eq!(config.message_confidence, DEFAULT_MESSAGE_CONFIDENCE);
        assert_eq!(config.max_skip_retries, DEFAULT_MAX_SKIP_RETRIES);
        assert!(config.replica_fault_oracle().is_none());
    }

    #[test]
    fn replica_storage() {
        let config = parse(
            r#"{
                "miner": 1000,
                "worker": 1000,
                "post_proof": "StackedDRGWindow32GiBV1P1",
                "max_fee": 5000,
                "sealed_sectors_directory": "/srv/sealed",
                "cache_directory": "/srv/cache"
            }"#,
        )
        .unwrap();

        assert_eq!(config.send_options().max_fee, Some(5000));
        assert!(config.replica_fault_oracle().is_some());
    }

    #[test]
    fn incomplete_replica_storage() {
        let res = parse(
            r#"{
                "miner": 1000,
                "worker": 1001,
                "post_proof": "2KiB",
                "sealed_sectors_directory": "/srv/sealed"
            }"#,
        );
        assert!(matches!(res, Err(ConfigError::IncompleteReplicaStorage)));
    }

    #[test]
    fn message_limit_must_fit_a_partition() {
        let res = parse(
            r#"{
                "miner": 1000,
                "worker": 1001,
                "post_proof": "32GiB",
                "max_sectors_per_message": 2000
            }"#,
        );
        assert!(matches!(
            res,
            Err(ConfigError::MessageLimitTooSmall {
                limit: 2000,
                partition_sectors: 2349
            })
        ));
    }

    #[test]
    fn message_limit_is_capped_by_the_protocol() {
        let res = parse(
            r#"{
                "miner": 1000,
                "worker": 1001,
                "post_proof": "2KiB",
                "max_sectors_per_message": 50000
            }"#,
        );
        assert!(matches!(
            res,
            Err(ConfigError::MessageLimitTooLarge {
                limit: 50000,
                max: ADDRESSED_SECTORS_MAX
            })
        ));
    }

    #[test]
    fn zero_confidence() {
        let res = parse(
            r#"{ "miner": 1000, "worker": 1001, "post_proof": "2KiB", "message_confidence": 0 }"#,
        );
        assert!(matches!(res, Err(ConfigError::ZeroConfidence)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = parse(r#"{ "miner": 1000, "worker": 1001, "post_proof": "2KiB", "nonce": 1 }"#);
        assert!(matches!(res, Err(ConfigError::Json(_))));
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "miner": 7, "worker": 8, "post_proof": "8MiB" }"#)
            .unwrap();

        let config = SchedulerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.miner, 7);
        assert_eq!(
            config.post_proof,
            RegisteredPoStProof::StackedDRGWindow8MiBV1P1
        );
    }
}
