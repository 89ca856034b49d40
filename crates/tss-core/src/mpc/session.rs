//! Session dispatch loop: runs N simulated parties to completion

use super::party::{Conduits, Delivery, LocalParty};
use super::ProtocolEngine;
use crate::{Destination, Error, Message, PartyId, Result, SessionKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Completion outputs keyed by party identifier, one per party
pub type SessionOutputs<O> = HashMap<String, (PartyId, O)>;

/// Run one session over the given engines.
///
/// Every engine is hosted by its own [`LocalParty`] task. Outbound messages
/// of all parties are fanned into one stream and routed from a single loop,
/// which is also the only place that records completions and decides to
/// abort. Returns once every party completed, or with the first error.
///
/// All party tasks belong to a per-session `JoinSet` and are aborted when
/// this function returns, whatever the outcome.
#[instrument(skip_all, fields(session = %Uuid::new_v4(), kind = %kind, parties = engines.len()))]
pub async fn run_session<E: ProtocolEngine>(
    kind: SessionKind,
    engines: Vec<E>,
    deadline: Option<Duration>,
) -> Result<SessionOutputs<E::Output>> {
    let n = engines.len();
    if n == 0 {
        return Err(Error::InvalidInput("session has no parties".into()));
    }

    let (msg_tx, msg_rx) = mpsc::channel(n * n);
    let (done_tx, done_rx) = mpsc::channel(n);
    let (err_tx, err_rx) = mpsc::channel(n);
    let conduits = Conduits {
        messages: msg_tx,
        completions: done_tx,
        errors: err_tx,
    };

    let mut inboxes = HashMap::with_capacity(n);
    let mut tasks = JoinSet::new();
    for engine in engines {
        let party = LocalParty::new(engine);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        if inboxes.insert(party.party_id().id.clone(), inbox_tx).is_some() {
            return Err(Error::InvalidInput(format!(
                "duplicate party {} in session",
                party.party_id()
            )));
        }
        tasks.spawn(party.run(inbox_rx, conduits.clone()));
    }
    // Only the party tasks hold senders now, so the loop sees the conduits
    // close if every party exits.
    drop(conduits);

    info!("Session started");
    let dispatcher = Dispatcher {
        n,
        inboxes,
        messages: msg_rx,
        completions: done_rx,
        errors: err_rx,
    };

    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, dispatcher.run()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} session to complete after {:?}",
                kind, limit
            ))),
        },
        None => dispatcher.run().await,
    };

    tasks.abort_all();
    match &result {
        Ok(_) => info!("Session completed"),
        Err(e) => warn!(error = %e, "Session aborted"),
    }
    result
}

struct Dispatcher<O> {
    n: usize,
    inboxes: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    messages: mpsc::Receiver<Message>,
    completions: mpsc::Receiver<(PartyId, O)>,
    errors: mpsc::Receiver<Error>,
}

impl<O> Dispatcher<O> {
    async fn run(mut self) -> Result<SessionOutputs<O>> {
        let mut outputs: SessionOutputs<O> = HashMap::with_capacity(self.n);

        loop {
            tokio::select! {
                biased;

                Some(error) = self.errors.recv() => return Err(error),

                Some(message) = self.messages.recv() => self.route(message)?,

                Some((party, output)) = self.completions.recv() => {
                    if outputs.contains_key(&party.id) {
                        warn!(party = %party, "duplicate completion ignored");
                        continue;
                    }
                    debug!(party = %party, done = outputs.len() + 1, "completion recorded");
                    outputs.insert(party.id.clone(), (party, output));
                    if outputs.len() == self.n {
                        return Ok(outputs);
                    }
                }

                else => {
                    return Err(Error::Internal(format!(
                        "all parties exited with {} of {} completions",
                        outputs.len(),
                        self.n
                    )));
                }
            }
        }
    }

    /// Hand a message to each target party's inbox
    fn route(&self, message: Message) -> Result<()> {
        let payload: Arc<[u8]> = message.payload.into();
        let from = message.from;

        let targets: Vec<&String> = match &message.to {
            Destination::Broadcast => self.inboxes.keys().filter(|id| **id != from.id).collect(),
            Destination::Parties(parties) => {
                let mut targets = Vec::with_capacity(parties.len());
                for party in parties {
                    let (id, _) = self.inboxes.get_key_value(&party.id).ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "message from {} addressed to unknown party {}",
                            from, party
                        ))
                    })?;
                    if *id == from.id {
                        return Err(Error::InvalidInput(format!(
                            "party {} addressed a message to itself",
                            from
                        )));
                    }
                    targets.push(id);
                }
                targets
            }
        };

        for id in targets {
            let delivery = Delivery {
                payload: Arc::clone(&payload),
                from: from.clone(),
                is_broadcast: message.is_broadcast,
            };
            if let Some(inbox) = self.inboxes.get(id) {
                if inbox.send(delivery).is_err() {
                    debug!(to = %id, from = %from, "party already terminal, delivery dropped");
                }
            }
        }
        Ok(())
    }
}
