//! MPC coordination: the engine capability interface, the party simulator
//! and the session dispatch loop

use crate::{Destination, PartyId, Result};
use serde::{de::DeserializeOwned, Serialize};

pub mod party;
pub mod session;

pub use party::LocalParty;
pub use session::{run_session, SessionOutputs};

/// One outbound protocol message, before encoding
#[derive(Debug, Clone)]
pub struct Outbound<M> {
    pub to: Destination,
    pub is_broadcast: bool,
    pub message: M,
}

impl<M> Outbound<M> {
    /// Message for every other party
    pub fn broadcast(message: M) -> Self {
        Self {
            to: Destination::Broadcast,
            is_broadcast: true,
            message,
        }
    }

    /// Message for one named party
    pub fn direct(to: PartyId, message: M) -> Self {
        Self {
            to: Destination::Parties(vec![to]),
            is_broadcast: false,
            message,
        }
    }
}

/// What an engine produced in reaction to `start` or `deliver`
#[derive(Debug)]
pub struct Step<M, O> {
    pub outgoing: Vec<Outbound<M>>,
    pub output: Option<O>,
}

impl<M, O> Step<M, O> {
    pub fn empty() -> Self {
        Self {
            outgoing: Vec::new(),
            output: None,
        }
    }

    /// Append the outcome of a later step, keeping emission order
    pub fn extend(&mut self, other: Step<M, O>) {
        self.outgoing.extend(other.outgoing);
        if other.output.is_some() {
            self.output = other.output;
        }
    }
}

impl<M, O> Default for Step<M, O> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Capability interface of one protocol participant.
///
/// Implemented per party kind; the session loop is generic over it so no
/// downcasting of protocol handles is ever needed. Calls on one engine are
/// never concurrent: the hosting [`LocalParty`] owns it exclusively.
pub trait ProtocolEngine: Send + 'static {
    /// Typed wire message, serialized into the envelope payload
    type Message: Serialize + DeserializeOwned + Send + 'static;
    /// Completion artifact
    type Output: Send + 'static;

    /// This participant
    fn party_id(&self) -> &PartyId;

    /// Begin the protocol, emitting the first round's messages
    fn start(&mut self) -> Result<Step<Self::Message, Self::Output>>;

    /// Handle one inbound message
    fn deliver(
        &mut self,
        message: Self::Message,
        from: &PartyId,
        is_broadcast: bool,
    ) -> Result<Step<Self::Message, Self::Output>>;
}

/// Record one message per sender, rejecting repeats
pub(crate) fn insert_unique<V>(
    received: &mut std::collections::BTreeMap<usize, V>,
    from: &PartyId,
    value: V,
    what: &str,
) -> Result<()> {
    if received.contains_key(&from.index) {
        return Err(crate::Error::InvalidInput(format!(
            "duplicate {} from {}",
            what, from
        )));
    }
    received.insert(from.index, value);
    Ok(())
}

/// Check that a message arrived with the delivery mode its round uses
pub(crate) fn expect_broadcast(is_broadcast: bool, expected: bool, what: &str, from: &PartyId) -> Result<()> {
    if is_broadcast != expected {
        let mode = if expected { "broadcast" } else { "point-to-point" };
        return Err(crate::Error::InvalidInput(format!(
            "{} from {} must be {}",
            what, from, mode
        )));
    }
    Ok(())
}
