//! DSG message types

use serde::{Deserialize, Serialize};

/// Round 1 message: Commitment to gamma_i and the OT sender key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound1Message {
    /// `Γ_i = γ_i·G`, compressed
    pub gamma_commitment: Vec<u8>,
    /// `S_i = y_i·G`, compressed
    pub ot_key: Vec<u8>,
}

/// Round 2 message: OT choices encoding k_i, for one sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound2Message {
    /// One compressed point per bit of k_i
    pub ot_points: Vec<Vec<u8>>,
}

/// Round 3 message: MtA offers for one receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound3Message {
    /// Offers against the receiver's k_i for gamma_j
    pub gamma_offers: Vec<[[u8; 32]; 2]>,
    /// Offers against the receiver's k_i for w_j
    pub chi_offers: Vec<[[u8; 32]; 2]>,
}

/// Round 4 message: Delta share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound4Message {
    /// Additive share of `k·γ`
    pub delta_share: [u8; 32],
}

/// Round 5 message: Partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgPartialMessage {
    /// Sigma share
    pub sigma_share: [u8; 32],
}

/// Wire message of the signing protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SigningMessage {
    Commitments(DsgRound1Message),
    OtChoices(DsgRound2Message),
    MtaOffers(DsgRound3Message),
    Delta(DsgRound4Message),
    Partial(DsgPartialMessage),
}
