//! Core types shared by the engine, the party simulator and the orchestrator

use k256::{ecdsa, elliptic_curve::bigint::{Encoding, U256}};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Identity of one participant within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartyId {
    /// Unique identifier string
    pub id: String,
    /// Display name
    pub moniker: String,
    /// Sorting key (256-bit big-endian integer)
    pub key: [u8; 32],
    /// Position in the sorted party set, assigned by [`SortedPartyIds`]
    pub index: usize,
}

impl PartyId {
    /// Create an unsorted party identity
    pub fn new(id: impl Into<String>, moniker: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            id: id.into(),
            moniker: moniker.into(),
            key,
            index: 0,
        }
    }

    /// Shamir evaluation point of this party
    pub fn eval_point(&self) -> u64 {
        self.index as u64 + 1
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.index, self.moniker)
    }
}

impl PartialOrd for PartyId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartyId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.id.cmp(&other.id))
    }
}

/// Party identities sorted by key, with indexes assigned in sorted order.
///
/// Every participant of a session is built from the same `SortedPartyIds`,
/// so all of them agree on ordering and evaluation points before round one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedPartyIds(Arc<[PartyId]>);

impl SortedPartyIds {
    /// Sort the given identities and assign their indexes.
    ///
    /// Fails on an empty set or on duplicate identifiers or keys.
    pub fn new(mut ids: Vec<PartyId>) -> crate::Result<Self> {
        if ids.is_empty() {
            return Err(crate::Error::InvalidInput("empty party set".into()));
        }

        ids.sort();
        for pair in ids.windows(2) {
            if pair[0].key == pair[1].key {
                return Err(crate::Error::InvalidInput(format!(
                    "duplicate sorting key for parties {} and {}",
                    pair[0].id, pair[1].id
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for id in &ids {
            if !seen.insert(id.id.as_str()) {
                return Err(crate::Error::InvalidInput(format!(
                    "duplicate party id {}",
                    id.id
                )));
            }
        }

        for (index, id) in ids.iter_mut().enumerate() {
            id.index = index;
        }
        Ok(Self(ids.into()))
    }

    /// Generate `count` fresh identities from a random 256-bit seed.
    ///
    /// Identifiers start at `offset` so they do not repeat across wallets
    /// created by the same process.
    pub fn generate(count: usize, offset: usize) -> crate::Result<Self> {
        let seed = U256::from_be_bytes(rand::random());
        let ids = (0..count)
            .map(|i| {
                let key = seed.wrapping_add(&U256::from_u64(i as u64));
                PartyId::new(
                    (offset + i).to_string(),
                    format!("P[{}]", offset + i),
                    key.to_be_bytes(),
                )
            })
            .collect();
        Self::new(ids)
    }

    /// Number of parties
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order
    pub fn iter(&self) -> std::slice::Iter<'_, PartyId> {
        self.0.iter()
    }

    /// Look up a party by identifier
    pub fn find(&self, id: &str) -> Option<&PartyId> {
        self.0.iter().find(|p| p.id == id)
    }

    /// Resolve a party claimed by a peer to its entry in this set
    pub fn resolve(&self, party: &PartyId) -> crate::Result<&PartyId> {
        self.find(&party.id)
            .filter(|p| p.key == party.key)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown party {}", party)))
    }
}

impl<'a> IntoIterator for &'a SortedPartyIds {
    type Item = &'a PartyId;
    type IntoIter = std::slice::Iter<'a, PartyId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Kind of session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Keygen,
    Signing,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Keygen => f.write_str("keygen"),
            SessionKind::Signing => f.write_str("signing"),
        }
    }
}

/// Per-party parameters for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// All participants, sorted
    pub parties: SortedPartyIds,
    /// This party
    pub party_id: PartyId,
    /// Threshold: polynomial degree, `threshold + 1` shares reconstruct
    pub threshold: usize,
}

impl SessionConfig {
    /// Create a new session configuration
    pub fn new(parties: SortedPartyIds, party_id: &PartyId, threshold: usize) -> crate::Result<Self> {
        let party_id = parties.resolve(party_id)?.clone();
        validate_threshold(parties.len(), threshold)?;

        Ok(Self {
            parties,
            party_id,
            threshold,
        })
    }

    /// Number of parties
    pub fn n_parties(&self) -> usize {
        self.parties.len()
    }

    /// Every party except this one
    pub fn peers(&self) -> impl Iterator<Item = &PartyId> {
        self.parties.iter().filter(move |p| p.id != self.party_id.id)
    }
}

/// Check an `(n, t)` pair: at least two parties and `0 < t < n`
pub fn validate_threshold(n_parties: usize, threshold: usize) -> crate::Result<()> {
    if n_parties < 2 {
        return Err(crate::Error::InvalidInput(
            "at least 2 parties are required".into(),
        ));
    }
    if threshold == 0 || threshold >= n_parties {
        return Err(crate::Error::InvalidInput(format!(
            "threshold must satisfy 0 < t < n, got t={} n={}",
            threshold, n_parties
        )));
    }
    Ok(())
}

/// Where a wire message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every party except the sender
    Broadcast,
    /// The named parties
    Parties(Vec<PartyId>),
}

/// Protocol wire envelope routed by the session dispatch loop
#[derive(Debug, Clone)]
pub struct Message {
    /// Sender
    pub from: PartyId,
    /// Recipients
    pub to: Destination,
    /// Deterministic serialization of the engine's message
    pub payload: Vec<u8>,
    /// Broadcast flag as set by the engine
    pub is_broadcast: bool,
}

impl Message {
    /// Build an envelope, rejecting an empty recipient list
    pub fn new(
        from: PartyId,
        to: Destination,
        payload: Vec<u8>,
        is_broadcast: bool,
    ) -> crate::Result<Self> {
        if let Destination::Parties(ref parties) = to {
            if parties.is_empty() {
                return Err(crate::Error::InvalidInput(format!(
                    "message from {} has no recipients",
                    from
                )));
            }
        }
        Ok(Self {
            from,
            to,
            payload,
            is_broadcast,
        })
    }
}

/// ECDSA signature (r, s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// R component
    pub r: [u8; 32],
    /// S component
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    /// Convert to DER format
    pub fn to_der(&self) -> crate::Result<Vec<u8>> {
        let sig = ecdsa::Signature::from_scalars(self.r, self.s)
            .map_err(|e| crate::Error::Crypto(e.to_string()))?;
        Ok(sig.to_der().as_bytes().to_vec())
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }
}
