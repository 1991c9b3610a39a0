//! Window Proof-of-Spacetime scheduling for a storage provider.
//!
//! For every deadline window, the [`WindowPoStScheduler`] checks which sectors can still be
//! proven, has them proven by a [`ProofBackend`], packs the proven partitions into as few
//! `SubmitWindowedPoSt` messages as the protocol allows and tracks their on-chain confirmation.
//!
//! The chain, the proving backend and the fault checks are injected through the traits in
//! [`ports`].
#![deny(clippy::unwrap_used)]

pub mod batch;
pub mod config;
pub mod error;
pub mod fault;
pub mod orchestrator;
pub mod ports;
pub mod scheduler;
pub mod submission;
pub mod types;

pub use config::{SchedulerArguments, SchedulerConfig};
pub use error::WindowPoStError;
pub use ports::{ChainPort, FaultOracle, ProofBackend};
pub use scheduler::{WindowPoStScheduler, WindowStage};
pub use submission::{BatchOutcome, SubmissionReport};
