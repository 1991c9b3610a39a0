use codec::{Decode, Encode};

/// Specifies the domain chain randomness is drawn for.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash, Encode, Decode)]
pub enum DomainSeparationTag {
    /// Randomness the deadline's challenges are derived from.
    WindowedPoStChallengeSeed,
    /// Randomness a Window PoSt submission commits to, binding it to a chain.
    PoStChainCommit,
}
