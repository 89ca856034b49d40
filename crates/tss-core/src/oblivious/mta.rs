//! Multiplicative-to-additive conversion over base OT
//!
//! Gilboa multiplication: the receiver holds `b` and uses its bits as OT
//! choices, the sender holds `a`. For every bit `l` the sender offers
//! `(t_l, t_l + a·2^l)` under the two OT pads; the receiver's pick sums to
//! `β = Σ t_l + a·b` and the sender keeps `α = -Σ t_l`, so `α + β = a·b`.

use super::base_ot::{derive_pad, OtReceiver};
use crate::{Error, Result};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;

/// Bits of a scalar, one OT per bit
pub const SCALAR_BITS: usize = 256;

/// Bits of `b`, least significant first
pub fn choice_bits(b: &Scalar) -> Vec<bool> {
    let bytes = b.to_bytes();
    (0..SCALAR_BITS)
        .map(|l| (bytes[31 - l / 8] >> (l % 8)) & 1 == 1)
        .collect()
}

/// Sender's masked offers and its additive share `α`
pub fn encrypt(tag: &[u8], a: &Scalar, keys: &[[ProjectivePoint; 2]]) -> (Vec<[Scalar; 2]>, Scalar) {
    let mut rng = OsRng;
    let mut alpha = Scalar::ZERO;
    let mut power = Scalar::ONE;
    let mut offers = Vec::with_capacity(keys.len());

    for (l, [key0, key1]) in keys.iter().enumerate() {
        let t = Scalar::random(&mut rng);
        offers.push([
            t + derive_pad(tag, l, key0),
            t + *a * power + derive_pad(tag, l, key1),
        ]);
        alpha -= t;
        power += power;
    }

    (offers, alpha)
}

/// Receiver's additive share `β` from the sender's offers
pub fn decrypt(
    tag: &[u8],
    receiver: &OtReceiver,
    keys: &[ProjectivePoint],
    offers: &[[Scalar; 2]],
) -> Result<Scalar> {
    if offers.len() != receiver.len() || keys.len() != receiver.len() {
        return Err(Error::InvalidInput(format!(
            "expected {} MtA offers, got {}",
            receiver.len(),
            offers.len()
        )));
    }

    let mut beta = Scalar::ZERO;
    for (l, (offer, key)) in offers.iter().zip(keys).enumerate() {
        let chosen = offer[usize::from(receiver.choice(l))];
        beta += chosen - derive_pad(tag, l, key);
    }
    Ok(beta)
}
