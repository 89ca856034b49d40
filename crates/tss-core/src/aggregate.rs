//! Stateless aggregation of per-party outputs: wallet address derivation,
//! keygen result assembly and final signature selection

use crate::keygen::KeygenOutput;
use crate::mpc::SessionOutputs;
use crate::sign::SignatureOutput;
use crate::wallet::Wallet;
use crate::{Error, Result, Signature, SortedPartyIds};
use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use sha3::{Digest, Keccak256};

/// The 64 raw coordinate bytes `x || y`, without the SEC1 format marker
pub fn raw_public_key(public_key: &PublicKey) -> [u8; 64] {
    let encoded = public_key.to_encoded_point(false);
    let mut raw = [0u8; 64];
    raw.copy_from_slice(&encoded.as_bytes()[1..]);
    raw
}

/// Last 20 bytes of Keccak-256 over the raw coordinates, EIP-55 encoded
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let hash = Keccak256::digest(raw_public_key(public_key));
    to_checksum_address(&hash[12..])
}

/// EIP-55 mixed-case hex with `0x` prefix
pub fn to_checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut checksummed = String::with_capacity(2 + lower.len());
    checksummed.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }
    checksummed
}

/// Assemble a wallet from all N keygen outputs.
///
/// Every output must carry the same public key.
pub fn aggregate_keygen(
    parties: &SortedPartyIds,
    threshold: usize,
    outputs: SessionOutputs<KeygenOutput>,
) -> Result<Wallet> {
    if outputs.len() != parties.len() {
        return Err(Error::Internal(format!(
            "expected {} keygen outputs, got {}",
            parties.len(),
            outputs.len()
        )));
    }

    let mut public_key = None;
    let mut save_data = std::collections::HashMap::with_capacity(outputs.len());
    for party in parties {
        let (_, output) = outputs.get(&party.id).ok_or_else(|| {
            Error::Internal(format!("missing keygen output of party {}", party))
        })?;

        match public_key {
            None => public_key = Some(output.public_key),
            Some(ref key) if *key != output.public_key => {
                return Err(Error::InconsistentOutput(format!(
                    "party {} derived a different public key",
                    party
                )));
            }
            Some(_) => {}
        }
        save_data.insert(party.id.clone(), output.save_data.clone());
    }

    let public_key = public_key.ok_or_else(|| Error::Internal("no keygen outputs".into()))?;
    Ok(Wallet {
        address: public_key_to_address(&public_key),
        public_key,
        threshold,
        party_ids: parties.clone(),
        save_data,
    })
}

/// Accept the session's signature only if all N parties produced the same one
pub fn aggregate_signatures(
    n_parties: usize,
    outputs: &SessionOutputs<SignatureOutput>,
) -> Result<Signature> {
    if outputs.len() != n_parties {
        return Err(Error::Internal(format!(
            "expected {} signature outputs, got {}",
            n_parties,
            outputs.len()
        )));
    }

    let mut signatures = outputs.values().map(|(_, output)| output);
    let first = signatures
        .next()
        .ok_or_else(|| Error::Internal("no signature outputs".into()))?;
    for other in signatures {
        if other.signature != first.signature {
            return Err(Error::InconsistentOutput(format!(
                "parties {} and {} produced different signatures",
                first.party_id, other.party_id
            )));
        }
    }
    Ok(first.signature)
}
