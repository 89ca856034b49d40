//! Party simulator: hosts one participant's protocol engine

use super::{ProtocolEngine, Step};
use crate::{Error, Message, PartyId, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One inbound message queued for a party
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub payload: Arc<[u8]>,
    pub from: PartyId,
    pub is_broadcast: bool,
}

/// Session-wide conduits every party writes into
pub(crate) struct Conduits<O> {
    pub messages: mpsc::Sender<Message>,
    pub completions: mpsc::Sender<(PartyId, O)>,
    pub errors: mpsc::Sender<Error>,
}

impl<O> Clone for Conduits<O> {
    fn clone(&self) -> Self {
        Self {
            messages: self.messages.clone(),
            completions: self.completions.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Encoded result of one engine step
#[derive(Debug)]
pub struct Emitted<O> {
    pub messages: Vec<Message>,
    pub output: Option<O>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartyState {
    Ready,
    Running,
    Finished,
    Failed,
}

/// A simulated participant.
///
/// `deliver` takes `&mut self`, so deliveries to one party are serialized by
/// whoever owns it; inside a session that is the party's own task.
pub struct LocalParty<E: ProtocolEngine> {
    engine: E,
    party_id: PartyId,
    state: PartyState,
}

impl<E: ProtocolEngine> LocalParty<E> {
    pub fn new(engine: E) -> Self {
        let party_id = engine.party_id().clone();
        Self {
            engine,
            party_id,
            state: PartyState::Ready,
        }
    }

    pub fn party_id(&self) -> &PartyId {
        &self.party_id
    }

    /// True once the party produced its output or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PartyState::Finished | PartyState::Failed)
    }

    /// Begin protocol execution
    pub fn start(&mut self) -> Result<Emitted<E::Output>> {
        if self.state != PartyState::Ready {
            return self.fail(Error::protocol_start(
                &self.party_id.id,
                Error::Internal("party already started".into()),
            ));
        }
        self.state = PartyState::Running;

        match self.engine.start() {
            Ok(step) => self.encode(step),
            Err(e) => self.fail(Error::protocol_start(&self.party_id.id, e)),
        }
    }

    /// Feed one wire payload into the engine
    pub fn deliver(
        &mut self,
        payload: &[u8],
        from: &PartyId,
        is_broadcast: bool,
    ) -> Result<Emitted<E::Output>> {
        if self.state != PartyState::Running {
            return self.fail(Error::protocol_update(
                &self.party_id.id,
                Error::Internal(format!("delivery in state {:?}", self.state)),
            ));
        }

        let message: E::Message = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                return self.fail(Error::protocol_update(
                    &self.party_id.id,
                    Error::InvalidInput(format!("malformed payload from {}: {}", from, e)),
                ))
            }
        };

        match self.engine.deliver(message, from, is_broadcast) {
            Ok(step) => self.encode(step),
            Err(e) => self.fail(Error::protocol_update(&self.party_id.id, e)),
        }
    }

    fn encode(&mut self, step: Step<E::Message, E::Output>) -> Result<Emitted<E::Output>> {
        let mut messages = Vec::with_capacity(step.outgoing.len());
        for outbound in step.outgoing {
            let payload = match serde_json::to_vec(&outbound.message) {
                Ok(payload) => payload,
                Err(e) => {
                    return self.fail(Error::Serialization(format!(
                        "failed to encode message from {}: {}",
                        self.party_id, e
                    )))
                }
            };
            let message = Message::new(
                self.party_id.clone(),
                outbound.to,
                payload,
                outbound.is_broadcast,
            );
            match message {
                Ok(message) => messages.push(message),
                Err(e) => return self.fail(e),
            }
        }

        if step.output.is_some() {
            self.state = PartyState::Finished;
        }
        Ok(Emitted {
            messages,
            output: step.output,
        })
    }

    fn fail(&mut self, error: Error) -> Result<Emitted<E::Output>> {
        self.state = PartyState::Failed;
        Err(error)
    }

    /// Drive the party: start, then consume the inbox one delivery at a time
    /// until the party completes or fails.
    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Delivery>,
        conduits: Conduits<E::Output>,
    ) {
        let started = self.start();
        if !self.publish(started, &conduits).await {
            return;
        }

        while let Some(delivery) = inbox.recv().await {
            let result = self.deliver(&delivery.payload, &delivery.from, delivery.is_broadcast);
            if !self.publish(result, &conduits).await {
                return;
            }
        }
        debug!(party = %self.party_id, "inbox closed");
    }

    /// Push a step's outcome into the session conduits; false once terminal
    async fn publish(&mut self, result: Result<Emitted<E::Output>>, conduits: &Conduits<E::Output>) -> bool {
        let emitted = match result {
            Ok(emitted) => emitted,
            Err(e) => {
                warn!(party = %self.party_id, error = %e, "party failed");
                let _ = conduits.errors.send(e).await;
                return false;
            }
        };

        for message in emitted.messages {
            if conduits.messages.send(message).await.is_err() {
                debug!(party = %self.party_id, "session closed, dropping outbound message");
                return false;
            }
        }

        if let Some(output) = emitted.output {
            debug!(party = %self.party_id, "party completed");
            let _ = conduits.completions.send((self.party_id.clone(), output)).await;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::Outbound;
    use crate::{Destination, SortedPartyIds};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping(u32);

    /// Completes after `needed` pings, answering each with a broadcast
    struct Counter {
        id: PartyId,
        seen: u32,
        needed: u32,
    }

    impl ProtocolEngine for Counter {
        type Message = Ping;
        type Output = u32;

        fn party_id(&self) -> &PartyId {
            &self.id
        }

        fn start(&mut self) -> Result<Step<Ping, u32>> {
            Ok(Step {
                outgoing: vec![Outbound::broadcast(Ping(0))],
                output: None,
            })
        }

        fn deliver(&mut self, message: Ping, _from: &PartyId, _is_broadcast: bool) -> Result<Step<Ping, u32>> {
            if message.0 == 99 {
                return Err(Error::VerificationFailed("bad ping".into()));
            }
            self.seen += 1;
            let mut step = Step::empty();
            if self.seen == self.needed {
                step.output = Some(self.seen);
            } else {
                step.outgoing.push(Outbound::broadcast(Ping(self.seen)));
            }
            Ok(step)
        }
    }

    fn party(needed: u32) -> (LocalParty<Counter>, PartyId) {
        let parties = SortedPartyIds::generate(2, 0).unwrap();
        let id = parties.iter().next().unwrap().clone();
        let peer = parties.iter().nth(1).unwrap().clone();
        let engine = Counter {
            id,
            seen: 0,
            needed,
        };
        (LocalParty::new(engine), peer)
    }

    #[test]
    fn test_start_encodes_outbound() {
        let (mut party, _) = party(1);
        let emitted = party.start().unwrap();

        assert_eq!(emitted.messages.len(), 1);
        let message = &emitted.messages[0];
        assert_eq!(message.to, Destination::Broadcast);
        assert!(message.is_broadcast);
        assert_eq!(message.from, *party.party_id());
        assert_eq!(message.payload, serde_json::to_vec(&Ping(0)).unwrap());
    }

    #[test]
    fn test_completion_is_terminal() {
        let (mut party, peer) = party(1);
        party.start().unwrap();

        let payload = serde_json::to_vec(&Ping(5)).unwrap();
        let emitted = party.deliver(&payload, &peer, true).unwrap();
        assert_eq!(emitted.output, Some(1));
        assert!(party.is_terminal());

        let err = party.deliver(&payload, &peer, true).unwrap_err();
        assert!(matches!(err, Error::ProtocolUpdate { .. }));
    }

    #[test]
    fn test_malformed_payload_fails_party() {
        let (mut party, peer) = party(2);
        party.start().unwrap();

        let err = party.deliver(b"not json", &peer, true).unwrap_err();
        match err {
            Error::ProtocolUpdate { source, .. } => assert!(source.is_invalid_input()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(party.is_terminal());
    }

    #[test]
    fn test_engine_error_wrapped_with_party() {
        let (mut party, peer) = party(2);
        party.start().unwrap();

        let payload = serde_json::to_vec(&Ping(99)).unwrap();
        let err = party.deliver(&payload, &peer, true).unwrap_err();
        match err {
            Error::ProtocolUpdate { party: name, source } => {
                assert_eq!(name, party.party_id().id);
                assert!(matches!(*source, Error::VerificationFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut party, _) = party(1);
        party.start().unwrap();
        assert!(matches!(party.start(), Err(Error::ProtocolStart { .. })));
    }
}
