//! DKG protocol implementation

use super::{DkgRound1Message, DkgRound2Message, DkgRound3Message, KeygenMessage, KeygenOutput, LocalSaveData};
use crate::mpc::{expect_broadcast, insert_unique, Outbound, ProtocolEngine, Step};
use crate::vss;
use crate::{Error, PartyId, Result, SessionConfig};
use k256::{ProjectivePoint, PublicKey, Scalar};
use std::collections::BTreeMap;
use tracing::{debug, info};

type KeygenStep = Step<KeygenMessage, KeygenOutput>;

/// Message-driven DKG state machine for one party
///
/// Round 1 broadcasts commitments and sends each peer its share. Round 2
/// starts once every commitment set and share is in: shares are verified,
/// the secret share and joint key are computed and the party's public share
/// is broadcast. The party completes when every public share matches its
/// commitment-derived value.
pub struct KeygenParty {
    config: SessionConfig,
    round: u32,
    polynomial: Vec<Scalar>,
    commitments: BTreeMap<usize, Vec<ProjectivePoint>>,
    shares: BTreeMap<usize, Scalar>,
    public_shares: BTreeMap<usize, ProjectivePoint>,
    expected_public_shares: Vec<ProjectivePoint>,
    secret_share: Option<Scalar>,
}

impl KeygenParty {
    /// Create a new DKG party
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            round: 0,
            polynomial: Vec::new(),
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
            public_shares: BTreeMap::new(),
            expected_public_shares: Vec::new(),
            secret_share: None,
        }
    }

    /// Check if DKG is complete
    pub fn is_complete(&self) -> bool {
        self.round >= 3
    }

    fn own_index(&self) -> usize {
        self.config.party_id.index
    }

    fn advance(&mut self) -> Result<KeygenStep> {
        let mut step = Step::empty();
        let n = self.config.n_parties();

        if self.round == 1 && self.commitments.len() == n && self.shares.len() == n {
            step.extend(self.finish_sharing()?);
        }

        if self.round == 2 && self.public_shares.len() == n {
            step.extend(self.finish_verification()?);
        }

        Ok(step)
    }

    /// Verify received shares and announce our public share
    fn finish_sharing(&mut self) -> Result<KeygenStep> {
        debug!(party = %self.config.party_id, "DKG Round 2: Verification");
        let my_x = self.config.party_id.eval_point();

        let mut secret_share = Scalar::ZERO;
        for (dealer, share) in &self.shares {
            let commitments = &self.commitments[dealer];
            if !vss::verify_share(share, commitments, my_x) {
                return Err(Error::VerificationFailed(format!(
                    "Share from party index {} does not match commitment",
                    dealer
                )));
            }
            secret_share += share;
        }

        self.expected_public_shares = self
            .config
            .parties
            .iter()
            .map(|party| {
                self.commitments
                    .values()
                    .map(|c| vss::evaluate_commitments(c, party.eval_point()))
                    .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p)
            })
            .collect();

        let public_share = ProjectivePoint::GENERATOR * secret_share;
        if public_share != self.expected_public_shares[self.own_index()] {
            return Err(Error::VerificationFailed(
                "own public share does not match commitments".into(),
            ));
        }

        self.public_shares.insert(self.own_index(), public_share);
        self.secret_share = Some(secret_share);
        self.polynomial.clear();
        self.round = 2;

        Ok(Step {
            outgoing: vec![Outbound::broadcast(KeygenMessage::PublicShare(DkgRound3Message {
                public_share: vss::point_to_bytes(&public_share),
            }))],
            output: None,
        })
    }

    /// Check every announced public share and emit the output
    fn finish_verification(&mut self) -> Result<KeygenStep> {
        for (index, announced) in &self.public_shares {
            if *announced != self.expected_public_shares[*index] {
                return Err(Error::VerificationFailed(format!(
                    "Public share of party index {} does not match commitments",
                    index
                )));
            }
        }

        let public_key = self
            .commitments
            .values()
            .map(|c| c[0])
            .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);
        let public_key = PublicKey::from_affine(public_key.to_affine())
            .map_err(|e| Error::Crypto(format!("invalid joint public key: {}", e)))?;

        let secret_share = self
            .secret_share
            .ok_or_else(|| Error::Internal("secret share missing".into()))?;
        let save_data = LocalSaveData::new(
            self.config.party_id.clone(),
            self.config.n_parties(),
            self.config.threshold,
            &secret_share,
            public_key,
            self.expected_public_shares.clone(),
        );
        self.round = 3;

        info!(
            party = %self.config.party_id,
            public_key = hex::encode(vss::point_to_bytes(&public_key.to_projective())),
            "DKG completed successfully"
        );

        Ok(Step {
            outgoing: Vec::new(),
            output: Some(KeygenOutput {
                party_id: self.config.party_id.clone(),
                save_data,
                public_key,
            }),
        })
    }

    fn decode_commitments(&self, message: &DkgRound1Message) -> Result<Vec<ProjectivePoint>> {
        if message.commitments.len() != self.config.threshold + 1 {
            return Err(Error::InvalidInput(format!(
                "expected {} commitments, got {}",
                self.config.threshold + 1,
                message.commitments.len()
            )));
        }
        message
            .commitments
            .iter()
            .map(|bytes| vss::point_from_bytes(bytes))
            .collect()
    }
}

impl ProtocolEngine for KeygenParty {
    type Message = KeygenMessage;
    type Output = KeygenOutput;

    fn party_id(&self) -> &PartyId {
        &self.config.party_id
    }

    fn start(&mut self) -> Result<KeygenStep> {
        if self.round != 0 {
            return Err(Error::Internal("DKG already started".into()));
        }
        info!(
            party = %self.config.party_id,
            n_parties = self.config.n_parties(),
            threshold = self.config.threshold,
            "Starting DKG"
        );

        // Round 1: Generate and commit to secret polynomial
        self.polynomial = vss::random_polynomial(self.config.threshold, None);
        let commitments = vss::commit(&self.polynomial);

        let mut outgoing = Vec::with_capacity(self.config.n_parties());
        outgoing.push(Outbound::broadcast(KeygenMessage::Commitments(DkgRound1Message {
            commitments: commitments.iter().map(vss::point_to_bytes).collect(),
        })));
        for peer in self.config.peers() {
            let share = vss::evaluate_polynomial(&self.polynomial, peer.eval_point());
            outgoing.push(Outbound::direct(
                peer.clone(),
                KeygenMessage::Share(DkgRound2Message {
                    share: vss::scalar_to_bytes(&share),
                }),
            ));
        }

        let own_share = vss::evaluate_polynomial(&self.polynomial, self.config.party_id.eval_point());
        self.commitments.insert(self.own_index(), commitments);
        self.shares.insert(self.own_index(), own_share);
        self.round = 1;

        let mut step = Step {
            outgoing,
            output: None,
        };
        step.extend(self.advance()?);
        Ok(step)
    }

    fn deliver(&mut self, message: KeygenMessage, from: &PartyId, is_broadcast: bool) -> Result<KeygenStep> {
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
            KeygenMessage::Commitments(msg) => {
                expect_broadcast(is_broadcast, true, "commitments", &from)?;
                let commitments = self.decode_commitments(&msg)?;
                insert_unique(&mut self.commitments, &from, commitments, "commitments")?;
            }
            KeygenMessage::Share(msg) => {
                expect_broadcast(is_broadcast, false, "share", &from)?;
                let share = vss::scalar_from_bytes(&msg.share)?;
                insert_unique(&mut self.shares, &from, share, "share")?;
            }
            KeygenMessage::PublicShare(msg) => {
                expect_broadcast(is_broadcast, true, "public share", &from)?;
                let point = vss::point_from_bytes(&msg.public_share)?;
                insert_unique(&mut self.public_shares, &from, point, "public share")?;
            }
        }

        self.advance()
    }
}
