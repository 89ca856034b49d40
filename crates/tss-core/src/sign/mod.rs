//! Distributed Signature Generation (DSG) module
//!
//! Threshold ECDSA signing run by every party of the wallet. Nonce and key
//! products are shared pairwise through OT-based MtA, so no threshold
//! beyond `0 < t < n` is required.

mod dsg;
mod messages;

pub use dsg::{verify_signature, SigningParty};
pub use messages::*;

use crate::vss;
use crate::wallet::Wallet;
use crate::{Error, PartyId, Result, SessionConfig, Signature};

/// Completion artifact of one signing party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutput {
    /// Owning party
    pub party_id: PartyId,
    /// Final (r, s) as computed by this party
    pub signature: Signature,
}

/// Build one signing engine per party of the wallet
pub fn new_parties(wallet: &Wallet, message: &[u8]) -> Result<Vec<SigningParty>> {
    let m = vss::message_scalar(message);

    wallet
        .party_ids
        .iter()
        .map(|party| {
            let save_data = wallet.save_data.get(&party.id).ok_or_else(|| {
                Error::Internal(format!("save data for party {} not found", party.id))
            })?;
            let config = SessionConfig::new(wallet.party_ids.clone(), party, wallet.threshold)?;
            SigningParty::new(config, save_data.clone(), m)
        })
        .collect()
}
