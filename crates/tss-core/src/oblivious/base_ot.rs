//! Base OT over secp256k1
//!
//! "Simplest OT" key agreement (https://eprint.iacr.org/2015/267.pdf): the
//! sender publishes `S = y·G`, the receiver answers every transfer `l` with
//! `R_l = c_l·S + x_l·G`. The sender can derive both `y·R_l` and
//! `y·(R_l - S)`; the receiver only the one matching its choice bit,
//! `x_l·S`. Pads are hashes of those keys.

use crate::{Error, Result};
use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce, sec1::ToEncodedPoint, Field},
    ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sender side of a batch of OTs; one key serves every receiver
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OtSender {
    y: Scalar,
    #[zeroize(skip)]
    public_key: ProjectivePoint,
}

impl OtSender {
    pub fn new() -> Self {
        let y = Scalar::random(&mut OsRng);
        Self {
            y,
            public_key: ProjectivePoint::GENERATOR * y,
        }
    }

    /// `S = y·G`, sent to every receiver
    pub fn public_key(&self) -> &ProjectivePoint {
        &self.public_key
    }

    /// Both candidate keys `[y·R_l, y·(R_l - S)]` for every receiver point
    pub fn keys(&self, receiver_points: &[ProjectivePoint]) -> Vec<[ProjectivePoint; 2]> {
        let y_s = self.public_key * self.y;
        receiver_points
            .iter()
            .map(|point| {
                let key0 = *point * self.y;
                [key0, key0 - y_s]
            })
            .collect()
    }
}

impl Default for OtSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of a batch of OTs against one sender
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OtReceiver {
    secrets: Vec<Scalar>,
    choices: Vec<u8>,
    #[zeroize(skip)]
    sender_key: ProjectivePoint,
}

impl OtReceiver {
    /// Prepare one transfer per choice bit.
    ///
    /// Returns the receiver state and the points `R_l` to send.
    pub fn new(sender_key: ProjectivePoint, choices: &[bool]) -> Result<(Self, Vec<ProjectivePoint>)> {
        if sender_key == ProjectivePoint::IDENTITY {
            return Err(Error::InvalidInput("OT sender key is the identity".into()));
        }

        let mut rng = OsRng;
        let mut secrets = Vec::with_capacity(choices.len());
        let mut points = Vec::with_capacity(choices.len());
        for &choice in choices {
            let x = Scalar::random(&mut rng);
            let mut point = ProjectivePoint::GENERATOR * x;
            if choice {
                point += sender_key;
            }
            secrets.push(x);
            points.push(point);
        }

        Ok((
            Self {
                secrets,
                choices: choices.iter().map(|&c| u8::from(c)).collect(),
                sender_key,
            },
            points,
        ))
    }

    /// Number of transfers in the batch
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Choice bit of transfer `l`
    pub fn choice(&self, l: usize) -> bool {
        self.choices[l] == 1
    }

    /// The key of every transfer, `x_l·S`
    pub fn keys(&self) -> Vec<ProjectivePoint> {
        self.secrets.iter().map(|x| self.sender_key * x).collect()
    }
}

/// Hash an OT key into a scalar pad, separated by purpose tag and transfer index
pub fn derive_pad(tag: &[u8], l: usize, key: &ProjectivePoint) -> Scalar {
    let mut hasher = Sha3_256::new();
    hasher.update((tag.len() as u64).to_be_bytes());
    hasher.update(tag);
    hasher.update((l as u64).to_be_bytes());
    hasher.update(key.to_affine().to_encoded_point(true).as_bytes());
    <Scalar as Reduce<U256>>::reduce_bytes(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_learns_chosen_key_only() {
        let sender = OtSender::new();
        let choices = [false, true, true, false];
        let (receiver, points) = OtReceiver::new(*sender.public_key(), &choices).unwrap();

        let sender_keys = sender.keys(&points);
        let receiver_keys = receiver.keys();
        assert_eq!(receiver.len(), 4);
        for (l, &choice) in choices.iter().enumerate() {
            let chosen = usize::from(choice);
            assert_eq!(receiver_keys[l], sender_keys[l][chosen]);
            assert_ne!(receiver_keys[l], sender_keys[l][1 - chosen]);
            assert_eq!(receiver.choice(l), choice);
        }
    }

    #[test]
    fn test_identity_sender_key_rejected() {
        assert!(OtReceiver::new(ProjectivePoint::IDENTITY, &[true]).is_err());
    }

    #[test]
    fn test_pads_are_separated() {
        let key = ProjectivePoint::GENERATOR * Scalar::from(9u64);
        assert_eq!(derive_pad(b"gamma", 0, &key), derive_pad(b"gamma", 0, &key));
        assert_ne!(derive_pad(b"gamma", 0, &key), derive_pad(b"gamma", 1, &key));
        assert_ne!(derive_pad(b"gamma", 0, &key), derive_pad(b"chi", 0, &key));
    }
}
