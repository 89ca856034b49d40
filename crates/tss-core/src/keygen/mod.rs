//! Distributed Key Generation (DKG) module
//!
//! Feldman-VSS key generation: every party deals a random degree-`t`
//! polynomial, the joint key is the sum of the constant terms.

mod dkg;
mod messages;

pub use dkg::KeygenParty;
pub use messages::*;

use crate::vss;
use crate::{PartyId, Result, SessionConfig, SortedPartyIds};
use k256::{ProjectivePoint, PublicKey, Scalar};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Everything one party keeps from key generation to sign later
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalSaveData {
    /// Owning party
    #[zeroize(skip)]
    pub party_id: PartyId,

    /// Total number of parties
    #[zeroize(skip)]
    pub n_parties: usize,

    /// Threshold
    #[zeroize(skip)]
    pub threshold: usize,

    /// This party's secret share (x_i)
    secret_share: [u8; 32],

    /// Joint public key
    #[zeroize(skip)]
    pub public_key: PublicKey,

    /// `x_j·G` for every party, by index
    #[zeroize(skip)]
    pub public_shares: Vec<ProjectivePoint>,
}

impl LocalSaveData {
    pub(crate) fn new(
        party_id: PartyId,
        n_parties: usize,
        threshold: usize,
        secret_share: &Scalar,
        public_key: PublicKey,
        public_shares: Vec<ProjectivePoint>,
    ) -> Self {
        Self {
            party_id,
            n_parties,
            threshold,
            secret_share: vss::scalar_to_bytes(secret_share),
            public_key,
            public_shares,
        }
    }

    /// This party's secret share as a scalar
    pub fn secret_share(&self) -> Result<Scalar> {
        vss::scalar_from_bytes(&self.secret_share)
    }
}

impl fmt::Debug for LocalSaveData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSaveData")
            .field("party_id", &self.party_id)
            .field("n_parties", &self.n_parties)
            .field("threshold", &self.threshold)
            .field("secret_share", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Completion artifact of one keygen party
#[derive(Debug, Clone)]
pub struct KeygenOutput {
    /// Owning party
    pub party_id: PartyId,
    /// Save data for future signing
    pub save_data: LocalSaveData,
    /// Joint public key; identical across all parties of a session
    pub public_key: PublicKey,
}

/// Build one keygen engine per party of the sorted set
pub fn new_parties(parties: &SortedPartyIds, threshold: usize) -> Result<Vec<KeygenParty>> {
    parties
        .iter()
        .map(|party| {
            let config = SessionConfig::new(parties.clone(), party, threshold)?;
            Ok(KeygenParty::new(config))
        })
        .collect()
}
