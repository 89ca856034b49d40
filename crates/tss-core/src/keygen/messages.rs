//! DKG message types

use serde::{Deserialize, Serialize};

/// Round 1 message: Commitment to secret polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound1Message {
    /// Commitments to polynomial coefficients (Feldman VSS), compressed points
    pub commitments: Vec<Vec<u8>>,
}

/// Round 1 message: Secret share for one receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound2Message {
    /// Dealer's polynomial evaluated at the receiver's point
    pub share: [u8; 32],
}

/// Round 2 message: Public key share announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound3Message {
    /// `x_i·G`, compressed
    pub public_share: Vec<u8>,
}

/// Wire message of the key generation protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeygenMessage {
    Commitments(DkgRound1Message),
    Share(DkgRound2Message),
    PublicShare(DkgRound3Message),
}
