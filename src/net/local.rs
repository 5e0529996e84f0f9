//! In-process network connecting sessions through Tokio channels.
//!
//! Every party owns an unbounded inbox. [`LocalNetwork`] plays both the relay
//! (routing each event to the inbox of its recipient) and the coordinator
//! (handing out party ids with `init` events).

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{MpcError, Result};
use crate::net::message::Event;
use crate::net::transport::Transport;
use crate::session::Session;
use crate::PartyId;

/// A message waiting in a party's inbox.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub payload: String,
}

pub struct LocalNetwork {
    inboxes: Vec<UnboundedSender<Envelope>>,
}

impl LocalNetwork {
    /// Creates inboxes for parties `1..=party_count`. Receiver `i` belongs to
    /// party `i + 1`.
    pub fn new(party_count: usize) -> (Arc<Self>, Vec<UnboundedReceiver<Envelope>>) {
        let (inboxes, receivers) = (0..party_count).map(|_| mpsc::unbounded_channel()).unzip();
        (Arc::new(LocalNetwork { inboxes }), receivers)
    }

    pub fn party_count(&self) -> usize {
        self.inboxes.len()
    }

    /// Sends every party its `init` event, in the role of the coordinator.
    pub fn assign_ids(&self) -> Result<()> {
        for id in 1..=self.party_count() {
            self.send(id, Event::Init, id.to_string())
                .map_err(MpcError::Transport)?;
        }
        Ok(())
    }

    /// Builds one session per party, starts their receive loops, assigns ids
    /// and waits until every session is ready. Session `i` is party `i + 1`.
    pub async fn start(config: SessionConfig) -> Result<(Vec<Arc<Session>>, Vec<JoinHandle<()>>)> {
        let (network, receivers) = LocalNetwork::new(config.party_count);

        let mut sessions = Vec::with_capacity(receivers.len());
        let mut pumps = Vec::with_capacity(receivers.len());
        for rx in receivers {
            let transport: Arc<dyn Transport> = network.clone();
            let session = Session::new(config.clone(), transport)?;
            pumps.push(spawn_receiver(session.clone(), rx));
            sessions.push(session);
        }

        network.assign_ids()?;
        for session in &sessions {
            session.wait_ready().await;
        }
        info!(
            "[LOCAL] Started {} parties for computation '{}'",
            sessions.len(),
            config.computation_id
        );
        Ok((sessions, pumps))
    }
}

impl Transport for LocalNetwork {
    fn send(&self, to: PartyId, event: Event, payload: String) -> std::result::Result<(), String> {
        let inbox = to
            .checked_sub(1)
            .and_then(|i| self.inboxes.get(i))
            .ok_or_else(|| format!("no party with id {}", to))?;
        inbox
            .send(Envelope { event, payload })
            .map_err(|_| format!("inbox of party {} is closed", to))
    }
}

/// Drains `rx` into `session` until the channel closes. Messages the session
/// rejects are logged and dropped.
pub fn spawn_receiver(session: Arc<Session>, mut rx: UnboundedReceiver<Envelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = session.process_event(envelope.event, &envelope.payload) {
                warn!(
                    "[LOCAL] Party {:?} dropped '{}' message: {}",
                    session.party_id(),
                    envelope.event,
                    e
                );
            }
        }
        debug!("[LOCAL] Inbox of party {:?} closed", session.party_id());
    })
}
