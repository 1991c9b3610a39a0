//! Protocol limits and method selectors shared by the storage provider and the chain.

use crate::ChainEpoch;

/// Maximum number of sectors that can be addressed by a single on-chain message.
///
/// ref: <https://github.com/filecoin-project/specs-actors/blob/v0.9.12/actors/builtin/miner/policy.go#L54>
pub const ADDRESSED_SECTORS_MAX: u64 = 10_000;

/// Number of epochs before a deadline opens at which its challenge is drawn.
pub const W_POST_CHALLENGE_LOOKBACK: ChainEpoch = 20;

/// Number of epochs before a deadline opens after which faults can no longer be declared for it.
pub const FAULT_DECLARATION_CUTOFF: ChainEpoch = W_POST_CHALLENGE_LOOKBACK + 50;

/// Storage provider actor method numbers.
pub mod methods {
    /// Method number type, as carried by on-chain messages.
    pub type MethodNum = u64;

    pub const SUBMIT_WINDOWED_POST: MethodNum = 5;
}
