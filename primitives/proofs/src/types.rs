use codec::{Decode, Encode};

/// Identifier of an on-chain actor, storage providers and their workers included.
pub type ActorId = u64;

pub type SectorNumber = u64;

/// Chain height, counted in epochs.
pub type ChainEpoch = u64;

#[allow(non_camel_case_types)]
#[derive(Debug, Decode, Encode, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy)]
#[cfg_attr(feature = "clap", derive(::clap::ValueEnum))]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
/// References:
/// * <https://github.com/filecoin-project/rust-filecoin-proofs-api/blob/b44e7cecf2a120aa266b6886628e869ba67252af/src/registry.rs#L18>
pub enum RegisteredSealProof {
    #[cfg_attr(feature = "clap", clap(name = "2KiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "2KiB"))]
    StackedDRG2KiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "8MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "8MiB"))]
    StackedDRG8MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "512MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "512MiB"))]
    StackedDRG512MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "32GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "32GiB"))]
    StackedDRG32GiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "64GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "64GiB"))]
    StackedDRG64GiBV1P1,
}

impl RegisteredSealProof {
    pub fn sector_size(&self) -> SectorSize {
        match self {
            RegisteredSealProof::StackedDRG2KiBV1P1 => SectorSize::_2KiB,
            RegisteredSealProof::StackedDRG8MiBV1P1 => SectorSize::_8MiB,
            RegisteredSealProof::StackedDRG512MiBV1P1 => SectorSize::_512MiB,
            RegisteredSealProof::StackedDRG32GiBV1P1 => SectorSize::_32GiB,
            RegisteredSealProof::StackedDRG64GiBV1P1 => SectorSize::_64GiB,
        }
    }
}

/// Proof of Spacetime type, indicating version and sector size of the proof.
#[derive(Debug, Decode, Encode, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
#[cfg_attr(feature = "clap", derive(::clap::ValueEnum))]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum RegisteredPoStProof {
    #[cfg_attr(feature = "clap", clap(name = "2KiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "2KiB"))]
    StackedDRGWindow2KiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "8MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "8MiB"))]
    StackedDRGWindow8MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "512MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "512MiB"))]
    StackedDRGWindow512MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "32GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "32GiB"))]
    StackedDRGWindow32GiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "64GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "64GiB"))]
    StackedDRGWindow64GiBV1P1,
}

impl RegisteredPoStProof {
    /// Returns the partition size, in sectors, associated with a proof type.
    /// The partition size is the number of sectors proven in a single PoSt proof.
    ///
    /// References:
    /// * <https://github.com/filecoin-project/ref-fvm/blob/b72a51084f3b65f8bd41f4a9a733d43bb4b1d6f7/shared/src/sector/registered_proof.rs#L142>
    pub fn window_post_partitions_sector(&self) -> u64 {
        match self {
            RegisteredPoStProof::StackedDRGWindow2KiBV1P1
            | RegisteredPoStProof::StackedDRGWindow8MiBV1P1
            | RegisteredPoStProof::StackedDRGWindow512MiBV1P1 => 2,
            RegisteredPoStProof::StackedDRGWindow32GiBV1P1 => 2349,
            RegisteredPoStProof::StackedDRGWindow64GiBV1P1 => 2300,
        }
    }
}

/// SectorSize indicates one of a set of possible sizes in the network.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq, Copy)]
pub enum SectorSize {
    _2KiB,
    _8MiB,
    _512MiB,
    _32GiB,
    _64GiB,
}

impl SectorSize {
    /// Returns the size of a sector in bytes
    /// <https://github.com/filecoin-project/ref-fvm/blob/5659196fa94accdf1e7f10e00586a8166c44a60d/shared/src/sector/mod.rs#L40>
    pub fn bytes(&self) -> u64 {
        match self {
            SectorSize::_2KiB => 2 << 10,
            SectorSize::_8MiB => 8 << 20,
            SectorSize::_512MiB => 512 << 20,
            SectorSize::_32GiB => 32 << 30,
            SectorSize::_64GiB => 2 * (32 << 30),
        }
    }
}
