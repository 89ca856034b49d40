//! DSG protocol implementation

use super::{
    DsgPartialMessage, DsgRound1Message, DsgRound2Message, DsgRound3Message, DsgRound4Message,
    SignatureOutput, SigningMessage,
};
use crate::keygen::LocalSaveData;
use crate::mpc::{expect_broadcast, insert_unique, Outbound, ProtocolEngine, Step};
use crate::oblivious::{mta, OtReceiver, OtSender};
use crate::vss;
use crate::{Error, PartyId, Result, SessionConfig, Signature};
use k256::{
    elliptic_curve::{scalar::IsHigh, Field},
    ProjectivePoint, PublicKey, Scalar,
};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

type SigningStep = Step<SigningMessage, SignatureOutput>;

/// Secret values of one signing party
#[derive(Zeroize, ZeroizeOnDrop)]
struct SigningSecrets {
    /// Additive share of the inverse nonce
    k: Scalar,
    /// Additive share of the blinding factor
    gamma: Scalar,
    /// Additive share of the key, `λ_i·x_i`
    w: Scalar,
    /// Running share of `k·γ`
    delta: Scalar,
    /// Running share of `k·x`
    chi: Scalar,
}

/// Decoded MtA offers from one sender
struct MtaOffers {
    gamma: Vec<[Scalar; 2]>,
    chi: Vec<[Scalar; 2]>,
}

impl MtaOffers {
    fn decode(message: &DsgRound3Message) -> Result<Self> {
        Ok(Self {
            gamma: decode_offers(&message.gamma_offers)?,
            chi: decode_offers(&message.chi_offers)?,
        })
    }
}

fn decode_offers(offers: &[[[u8; 32]; 2]]) -> Result<Vec<[Scalar; 2]>> {
    if offers.len() != mta::SCALAR_BITS {
        return Err(Error::InvalidInput(format!(
            "expected {} MtA offers, got {}",
            mta::SCALAR_BITS,
            offers.len()
        )));
    }
    offers
        .iter()
        .map(|[e0, e1]| Ok([vss::scalar_from_bytes(e0)?, vss::scalar_from_bytes(e1)?]))
        .collect()
}

fn encode_offers(offers: &[[Scalar; 2]]) -> Vec<[[u8; 32]; 2]> {
    offers
        .iter()
        .map(|[e0, e1]| [vss::scalar_to_bytes(e0), vss::scalar_to_bytes(e1)])
        .collect()
}

/// Domain tag of one MtA instance
fn mta_tag(kind: &str, sender: usize, receiver: usize) -> Vec<u8> {
    format!("dsg/{}/{}->{}", kind, sender, receiver).into_bytes()
}

/// Message-driven signing state machine for one party.
///
/// All `n` parties take part, so any `0 < t < n` works: shares are turned
/// into additive shares `w_i = λ_i·x_i` and products of secrets are formed
/// pairwise with OT-based MtA.
///
/// 1. sample `k_i`, `γ_i`; broadcast `Γ_i = γ_i·G` and an OT sender key
/// 2. send every peer OT choices encoding `k_i`
/// 3. answer every peer with MtA offers for `γ_j` and `w_j`
/// 4. broadcast `δ_i`, a share of `δ = k·γ`
/// 5. `R = δ⁻¹·ΣΓ_j = k⁻¹·G`; broadcast `s_i = m·k_i + r·χ_i`
/// 6. sum, normalise to low-S and verify against the wallet key
pub struct SigningParty {
    config: SessionConfig,
    save_data: LocalSaveData,
    message: Scalar,
    round: u32,
    secrets: SigningSecrets,
    ot_sender: OtSender,
    gamma_points: BTreeMap<usize, ProjectivePoint>,
    ot_keys: BTreeMap<usize, ProjectivePoint>,
    receivers: BTreeMap<usize, OtReceiver>,
    ot_requests: BTreeMap<usize, Vec<ProjectivePoint>>,
    offers: BTreeMap<usize, MtaOffers>,
    deltas: BTreeMap<usize, Scalar>,
    partials: BTreeMap<usize, Scalar>,
    r_point: Option<ProjectivePoint>,
}

impl SigningParty {
    /// Create a signing party for message `m` (already reduced to a scalar)
    pub fn new(config: SessionConfig, save_data: LocalSaveData, message: Scalar) -> Result<Self> {
        if save_data.party_id.id != config.party_id.id {
            return Err(Error::InvalidInput(format!(
                "save data of party {} given to party {}",
                save_data.party_id.id, config.party_id.id
            )));
        }
        if save_data.n_parties != config.n_parties() || save_data.threshold != config.threshold {
            return Err(Error::InvalidInput(
                "save data does not match session parameters".into(),
            ));
        }

        let points: Vec<u64> = config.parties.iter().map(PartyId::eval_point).collect();
        let lambda = vss::lagrange_at_zero(config.party_id.eval_point(), &points)?;
        let w = lambda * save_data.secret_share()?;

        let mut rng = OsRng;
        let secrets = SigningSecrets {
            k: Scalar::random(&mut rng),
            gamma: Scalar::random(&mut rng),
            w,
            delta: Scalar::ZERO,
            chi: Scalar::ZERO,
        };

        Ok(Self {
            config,
            save_data,
            message,
            round: 0,
            secrets,
            ot_sender: OtSender::new(),
            gamma_points: BTreeMap::new(),
            ot_keys: BTreeMap::new(),
            receivers: BTreeMap::new(),
            ot_requests: BTreeMap::new(),
            offers: BTreeMap::new(),
            deltas: BTreeMap::new(),
            partials: BTreeMap::new(),
            r_point: None,
        })
    }

    /// Check if DSG is complete
    pub fn is_complete(&self) -> bool {
        self.round >= 6
    }

    fn own_index(&self) -> usize {
        self.config.party_id.index
    }

    fn advance(&mut self) -> Result<SigningStep> {
        let mut step = Step::empty();
        let n = self.config.n_parties();

        if self.round == 1 && self.gamma_points.len() == n {
            step.extend(self.finish_commitments()?);
        }
        if self.round == 2 && self.ot_requests.len() == n - 1 {
            step.extend(self.finish_choices()?);
        }
        if self.round == 3 && self.offers.len() == n - 1 {
            step.extend(self.finish_mta()?);
        }
        if self.round == 4 && self.deltas.len() == n {
            step.extend(self.finish_deltas()?);
        }
        if self.round == 5 && self.partials.len() == n {
            step.extend(self.finish_signature()?);
        }

        Ok(step)
    }

    /// Send every peer the OT choices for `k_i`
    fn finish_commitments(&mut self) -> Result<SigningStep> {
        debug!(party = %self.config.party_id, "DSG Round 2: OT choices");
        let choices = mta::choice_bits(&self.secrets.k);

        let mut outgoing = Vec::with_capacity(self.config.n_parties() - 1);
        for peer in self.config.peers() {
            let sender_key = self
                .ot_keys
                .get(&peer.index)
                .ok_or_else(|| Error::Internal(format!("OT key of {} missing", peer)))?;
            let (receiver, points) = OtReceiver::new(*sender_key, &choices)?;
            self.receivers.insert(peer.index, receiver);
            outgoing.push(Outbound::direct(
                peer.clone(),
                SigningMessage::OtChoices(DsgRound2Message {
                    ot_points: points.iter().map(vss::point_to_bytes).collect(),
                }),
            ));
        }
        self.round = 2;

        Ok(Step {
            outgoing,
            output: None,
        })
    }

    /// Answer every peer's choices with offers for `γ_i` and `w_i`
    fn finish_choices(&mut self) -> Result<SigningStep> {
        debug!(party = %self.config.party_id, "DSG Round 3: MtA offers");
        let me = self.own_index();

        let mut outgoing = Vec::with_capacity(self.config.n_parties() - 1);
        for peer in self.config.peers() {
            let points = self
                .ot_requests
                .get(&peer.index)
                .ok_or_else(|| Error::Internal(format!("OT choices of {} missing", peer)))?;
            let keys = self.ot_sender.keys(points);

            let (gamma_offers, alpha_gamma) =
                mta::encrypt(&mta_tag("gamma", me, peer.index), &self.secrets.gamma, &keys);
            let (chi_offers, alpha_chi) =
                mta::encrypt(&mta_tag("chi", me, peer.index), &self.secrets.w, &keys);
            self.secrets.delta += alpha_gamma;
            self.secrets.chi += alpha_chi;

            outgoing.push(Outbound::direct(
                peer.clone(),
                SigningMessage::MtaOffers(DsgRound3Message {
                    gamma_offers: encode_offers(&gamma_offers),
                    chi_offers: encode_offers(&chi_offers),
                }),
            ));
        }
        self.round = 3;

        Ok(Step {
            outgoing,
            output: None,
        })
    }

    /// Complete the MtA shares and broadcast `δ_i`
    fn finish_mta(&mut self) -> Result<SigningStep> {
        debug!(party = %self.config.party_id, "DSG Round 4: Delta share");
        let me = self.own_index();

        let mut beta_gamma = Scalar::ZERO;
        let mut beta_chi = Scalar::ZERO;
        for (sender, offers) in &self.offers {
            let receiver = self
                .receivers
                .get(sender)
                .ok_or_else(|| Error::Internal(format!("OT receiver for index {} missing", sender)))?;
            let keys = receiver.keys();
            beta_gamma += mta::decrypt(&mta_tag("gamma", *sender, me), receiver, &keys, &offers.gamma)?;
            beta_chi += mta::decrypt(&mta_tag("chi", *sender, me), receiver, &keys, &offers.chi)?;
        }

        let secrets = &mut self.secrets;
        secrets.delta += secrets.k * secrets.gamma + beta_gamma;
        secrets.chi += secrets.k * secrets.w + beta_chi;
        let delta = secrets.delta;

        self.deltas.insert(me, delta);
        self.round = 4;

        Ok(Step {
            outgoing: vec![Outbound::broadcast(SigningMessage::Delta(DsgRound4Message {
                delta_share: vss::scalar_to_bytes(&delta),
            }))],
            output: None,
        })
    }

    /// Fix `R` and broadcast this party's partial signature
    fn finish_deltas(&mut self) -> Result<SigningStep> {
        debug!(party = %self.config.party_id, "DSG Round 5: Partial signature");
        let delta = self.deltas.values().fold(Scalar::ZERO, |acc, v| acc + v);
        let delta_inv = Option::<Scalar>::from(delta.invert())
            .ok_or_else(|| Error::Crypto("delta is zero".into()))?;

        let gamma_sum = self
            .gamma_points
            .values()
            .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);
        let r_point = gamma_sum * delta_inv;
        if r_point == ProjectivePoint::IDENTITY {
            return Err(Error::Crypto("nonce point is the identity".into()));
        }
        let (r, _) = vss::x_coordinate(&r_point)?;
        if r == Scalar::ZERO {
            return Err(Error::Crypto("signature r is zero".into()));
        }

        let sigma = self.message * self.secrets.k + r * self.secrets.chi;
        self.partials.insert(self.own_index(), sigma);
        self.r_point = Some(r_point);
        self.round = 5;

        Ok(Step {
            outgoing: vec![Outbound::broadcast(SigningMessage::Partial(DsgPartialMessage {
                sigma_share: vss::scalar_to_bytes(&sigma),
            }))],
            output: None,
        })
    }

    /// Sum the partial signatures, normalise and verify
    fn finish_signature(&mut self) -> Result<SigningStep> {
        let r_point = self
            .r_point
            .ok_or_else(|| Error::Internal("nonce point missing".into()))?;
        let (r, y_odd) = vss::x_coordinate(&r_point)?;

        let mut s = self.partials.values().fold(Scalar::ZERO, |acc, v| acc + v);
        if s == Scalar::ZERO {
            return Err(Error::Crypto("signature s is zero".into()));
        }

        // Normalize s to low-s form; negating s flips R's parity
        let mut recovery_id = u8::from(y_odd);
        if bool::from(s.is_high()) {
            s = -s;
            recovery_id ^= 1;
        }

        let signature = Signature::new(
            vss::scalar_to_bytes(&r),
            vss::scalar_to_bytes(&s),
            recovery_id,
        );
        verify_signature(&self.save_data.public_key, self.message, &signature)?;
        self.round = 6;

        info!(
            party = %self.config.party_id,
            r = hex::encode(signature.r),
            s = hex::encode(signature.s),
            "DSG completed successfully"
        );

        Ok(Step {
            outgoing: Vec::new(),
            output: Some(SignatureOutput {
                party_id: self.config.party_id.clone(),
                signature,
            }),
        })
    }
}

/// Plain ECDSA verification of `(r, s)` over the message scalar `m`
pub fn verify_signature(public_key: &PublicKey, message: Scalar, signature: &Signature) -> Result<()> {
    let r = vss::scalar_from_bytes(&signature.r)?;
    let s = vss::scalar_from_bytes(&signature.s)?;
    let s_inv = Option::<Scalar>::from(s.invert()).ok_or(Error::VerificationFailed(
        "signature s is zero".into(),
    ))?;

    let point = ProjectivePoint::GENERATOR * (message * s_inv) + public_key.to_projective() * (r * s_inv);
    if point == ProjectivePoint::IDENTITY {
        return Err(Error::VerificationFailed("signature point is the identity".into()));
    }
    let (x, _) = vss::x_coordinate(&point)?;
    if x != r || r == Scalar::ZERO {
        return Err(Error::VerificationFailed("signature does not verify".into()));
    }
    Ok(())
}

impl ProtocolEngine for SigningParty {
    type Message = SigningMessage;
    type Output = SignatureOutput;

    fn party_id(&self) -> &PartyId {
        &self.config.party_id
    }

    fn start(&mut self) -> Result<SigningStep> {
        if self.round != 0 {
            return Err(Error::Internal("DSG already started".into()));
        }
        info!(
            party = %self.config.party_id,
            n_parties = self.config.n_parties(),
            threshold = self.config.threshold,
            "Starting DSG"
        );

        // Round 1: Commit to gamma_i and publish the OT sender key
        let gamma_point = ProjectivePoint::GENERATOR * self.secrets.gamma;
        self.gamma_points.insert(self.own_index(), gamma_point);
        self.round = 1;

        let mut step = Step {
            outgoing: vec![Outbound::broadcast(SigningMessage::Commitments(DsgRound1Message {
                gamma_commitment: vss::point_to_bytes(&gamma_point),
                ot_key: vss::point_to_bytes(self.ot_sender.public_key()),
            }))],
            output: None,
        };
        step.extend(self.advance()?);
        Ok(step)
    }

    fn deliver(&mut self, message: SigningMessage, from: &PartyId, is_broadcast: bool) -> Result<SigningStep> {
        if self.round == 0 || self.is_complete() {
            return Err(Error::InvalidInput(format!(
                "unexpected message from {} in round {}",
                from, self.round
            )));
        }
        let from = self.config.parties.resolve(from)?.clone();
        if from.id == self.config.party_id.id {
            return Err(Error::InvalidInput("message from self".into()));
        }

        match message {
            SigningMessage::Commitments(msg) => {
                expect_broadcast(is_broadcast, true, "gamma commitment", &from)?;
                let gamma_point = vss::point_from_bytes(&msg.gamma_commitment)?;
                let ot_key = vss::point_from_bytes(&msg.ot_key)?;
                insert_unique(&mut self.gamma_points, &from, gamma_point, "gamma commitment")?;
                self.ot_keys.insert(from.index, ot_key);
            }
            SigningMessage::OtChoices(msg) => {
                expect_broadcast(is_broadcast, false, "OT choices", &from)?;
                if msg.ot_points.len() != mta::SCALAR_BITS {
                    return Err(Error::InvalidInput(format!(
                        "expected {} OT points, got {}",
                        mta::SCALAR_BITS,
                        msg.ot_points.len()
                    )));
                }
                let points = msg
                    .ot_points
                    .iter()
                    .map(|bytes| vss::point_from_bytes(bytes))
                    .collect::<Result<Vec<_>>>()?;
                insert_unique(&mut self.ot_requests, &from, points, "OT choices")?;
            }
            SigningMessage::MtaOffers(msg) => {
                expect_broadcast(is_broadcast, false, "MtA offers", &from)?;
                let offers = MtaOffers::decode(&msg)?;
                insert_unique(&mut self.offers, &from, offers, "MtA offers")?;
            }
            SigningMessage::Delta(msg) => {
                expect_broadcast(is_broadcast, true, "delta share", &from)?;
                let delta = vss::scalar_from_bytes(&msg.delta_share)?;
                insert_unique(&mut self.deltas, &from, delta, "delta share")?;
            }
            SigningMessage::Partial(msg) => {
                expect_broadcast(is_broadcast, true, "partial signature", &from)?;
                let sigma = vss::scalar_from_bytes(&msg.sigma_share)?;
                insert_unique(&mut self.partials, &from, sigma, "partial signature")?;
            }
        }

        self.advance()
    }
}
