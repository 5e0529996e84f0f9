//! # Computation sessions
//!
//! A [`Session`] is one party's view of one computation: its party id, the
//! operation counters it shares in lock-step with the other parties, and the
//! table of operations still waiting for fragments. It exposes the two
//! protocol primitives:
//!
//! - [`Session::share`] splits a secret, keeps this party's fragment, sends
//!   each peer theirs and returns one [`PendingValue`] per party, holding the
//!   fragment *that* party sent for the same operation.
//! - [`Session::open`] broadcasts this party's fragment of a shared value and
//!   resolves to the secret once every party's fragment has arrived.
//!
//! Both calls are synchronous so that operation ids are drawn in program
//! order; the waiting happens in the returned futures. Sessions are handed
//! around as `Arc<Session>`, and every value keeps a reference to the session
//! that created it.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{MpcError, Result};
use crate::field::Field;
use crate::net::message::{Event, FragmentMessage};
use crate::net::transport::Transport;
use crate::op_id::{OpId, OpKind, OpSequencer};
use crate::pending::PendingValue;
use crate::router::{HandleReceiver, Router, Slot};
use crate::sharing;
use crate::PartyId;

struct SessionState {
    sequencer: OpSequencer,
    router: Router,
    /// Fragments received before the party id, checked once it is assigned.
    early: Vec<FragmentMessage>,
}

pub struct Session {
    config: SessionConfig,
    field: Field,
    self_id: OnceLock<PartyId>,
    ready: Notify,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session. Unless `config.party_id` is set, the session stays
    /// unusable until an `init` event assigns the party id.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let field = config.validate()?;
        let self_id = OnceLock::new();
        if let Some(id) = config.party_id {
            let _ = self_id.set(id);
        }

        let router = Router::new(field, config.party_count, config.max_pending_operations);
        Ok(Arc::new(Session {
            field,
            self_id,
            ready: Notify::new(),
            transport,
            state: Mutex::new(SessionState {
                sequencer: OpSequencer::new(),
                router,
                early: Vec::new(),
            }),
            config,
        }))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn party_count(&self) -> usize {
        self.config.party_count
    }

    pub fn party_id(&self) -> Option<PartyId> {
        self.self_id.get().copied()
    }

    pub fn is_ready(&self) -> bool {
        self.self_id.get().is_some()
    }

    /// Waits until the party id is known.
    pub async fn wait_ready(&self) {
        loop {
            let notified = self.ready.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }

    fn require_id(&self) -> Result<PartyId> {
        self.party_id().ok_or(MpcError::NotReady)
    }

    /// Number of operations with buffered fragments or outstanding handles.
    pub fn pending_operation_count(&self) -> usize {
        self.state.lock().router.len()
    }

    /// Moves subsequent operation ids into the namespace of `seed`. Every party
    /// must seed identically at the same point of the computation.
    pub fn seed_ids(&self, seed: u64) {
        self.state.lock().sequencer.seed(seed);
    }

    pub fn unseed_ids(&self) {
        self.state.lock().sequencer.unseed();
    }

    pub(crate) fn next_value_id(&self) -> u64 {
        self.state.lock().sequencer.next_value_id()
    }

    /// Shares `secret` with every party.
    ///
    /// The returned map covers ids `1..=party_count`: this party's own entry is
    /// its fragment of `secret`, the entry of party `i` is the fragment party
    /// `i` sends for this same operation.
    pub fn share(self: &Arc<Self>, secret: u64) -> Result<BTreeMap<PartyId, PendingValue>> {
        let self_id = self.require_id()?;
        let fragments = sharing::compute_shares(
            &self.field,
            secret,
            self.party_count(),
            &mut rand::rng(),
        );

        let (op_id, slots, value_ids) = {
            let mut state = self.state.lock();
            let op_id = state.sequencer.next_op(OpKind::Share);
            let slots = state.router.register_share(op_id, self_id)?;
            let value_ids: BTreeMap<PartyId, u64> = (1..=self.party_count())
                .map(|p| (p, state.sequencer.next_value_id()))
                .collect();
            (op_id, slots, value_ids)
        };
        debug!("[SHARE] Party {} starting {}", self_id, op_id);

        let mut values = BTreeMap::new();
        values.insert(
            self_id,
            PendingValue::resolved(self.clone(), value_ids[&self_id], fragments[&self_id]),
        );

        let mut waiting = false;
        for (peer, slot) in slots {
            let value = match slot {
                Slot::Ready(v) => PendingValue::resolved(self.clone(), value_ids[&peer], v),
                Slot::Pending(rx) => {
                    waiting = true;
                    PendingValue::unresolved(
                        self.clone(),
                        value_ids[&peer],
                        handle_future(op_id, rx),
                    )
                }
            };
            values.insert(peer, value);
        }
        if waiting {
            self.schedule_expiry(op_id);
        }

        for (&peer, &fragment) in fragments.iter().filter(|&(&p, _)| p != self_id) {
            let msg = FragmentMessage {
                sender: self_id,
                to: peer,
                op_id,
                share: fragment,
            };
            if let Err(e) = self.transmit(Event::Share, msg) {
                self.fail_operation(op_id, e.clone());
                return Err(e);
            }
        }

        Ok(values)
    }

    /// Shares each secret in order, one operation per element.
    pub fn share_array(
        self: &Arc<Self>,
        secrets: &[u64],
    ) -> Result<Vec<BTreeMap<PartyId, PendingValue>>> {
        secrets.iter().map(|&s| self.share(s)).collect()
    }

    /// Opens `value` to every party.
    ///
    /// If `value` is still pending, the broadcast waits for it in a spawned
    /// task; without a Tokio runtime this fails with `NoRuntime` before any
    /// operation id is drawn.
    pub fn open(self: &Arc<Self>, value: &PendingValue) -> Result<Opening> {
        if !Arc::ptr_eq(value.session(), self) {
            return Err(MpcError::SessionMismatch);
        }
        let self_id = self.require_id()?;
        let broadcast = match value.value() {
            Some(fragment) => Broadcast::Now(fragment),
            None => Broadcast::Deferred(
                tokio::runtime::Handle::try_current().map_err(|_| MpcError::NoRuntime)?,
            ),
        };

        let (op_id, rx) = {
            let mut state = self.state.lock();
            let op_id = state.sequencer.next_op(OpKind::Open);
            let rx = state.router.register_open(op_id)?;
            (op_id, rx)
        };
        debug!("[OPEN] Party {} opening {} as {}", self_id, value, op_id);
        self.schedule_expiry(op_id);

        match broadcast {
            Broadcast::Now(fragment) => {
                if let Err(e) = self.broadcast_open(self_id, op_id, fragment) {
                    self.fail_operation(op_id, e.clone());
                    return Err(e);
                }
            }
            Broadcast::Deferred(runtime) => {
                let session = self.clone();
                let value = value.clone();
                runtime.spawn(async move {
                    let outcome = match value.resolve().await {
                        Ok(fragment) => session.broadcast_open(self_id, op_id, fragment),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = outcome {
                        session.fail_operation(op_id, e);
                    }
                });
            }
        }

        Ok(Opening {
            op_id,
            inner: handle_future(op_id, rx),
        })
    }

    /// Opens each value in order.
    pub fn open_all(self: &Arc<Self>, values: &[PendingValue]) -> Result<Vec<Opening>> {
        values.iter().map(|v| self.open(v)).collect()
    }

    fn broadcast_open(&self, self_id: PartyId, op_id: OpId, fragment: u64) -> Result<()> {
        for peer in (1..=self.party_count()).filter(|&p| p != self_id) {
            let msg = FragmentMessage {
                sender: self_id,
                to: peer,
                op_id,
                share: fragment,
            };
            self.transmit(Event::Open, msg)?;
        }
        self.state.lock().router.deliver(self_id, op_id, fragment)
    }

    fn transmit(&self, event: Event, msg: FragmentMessage) -> Result<()> {
        let to = msg.to;
        let payload = msg.to_json()?;
        self.transport
            .send(to, event, payload)
            .map_err(MpcError::Transport)
    }

    fn fail_operation(&self, op_id: OpId, error: MpcError) {
        self.state.lock().router.fail(op_id, error);
    }

    /// Fails `op_id` with a timeout once the configured deadline passes, if it
    /// is still pending by then.
    fn schedule_expiry(self: &Arc<Self>, op_id: OpId) {
        let Some(timeout) = self.config.operation_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[SESSION] No Tokio runtime, {} will not time out", op_id);
            return;
        };

        let session: Weak<Session> = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = session.upgrade() {
                session.fail_operation(op_id, MpcError::Timeout { op_id });
            }
        });
    }

    /// Handles one inbound event; the `on(event, handler)` side of the transport.
    pub fn process(&self, event: &str, payload: &str) -> Result<()> {
        self.process_event(event.parse()?, payload)
    }

    pub fn process_event(&self, event: Event, payload: &str) -> Result<()> {
        match event {
            Event::Init => self.receive_init(payload),
            Event::Share | Event::Open => self.receive_fragment(event, payload),
        }
    }

    fn receive_init(&self, payload: &str) -> Result<()> {
        let id = parse_party_id(payload)?;
        if id == 0 || id > self.party_count() {
            return Err(MpcError::malformed(format!(
                "assigned party id {} outside 1..={}",
                id,
                self.party_count()
            )));
        }

        // The id is set under the state lock so that no fragment can slip
        // into `early` after it has been drained.
        let mut state = self.state.lock();
        if self.self_id.set(id).is_err() && self.party_id() != Some(id) {
            return Err(MpcError::malformed(format!(
                "party id already set to {:?}, refusing {}",
                self.party_id(),
                id
            )));
        }
        for msg in std::mem::take(&mut state.early) {
            let routed = check_addressing(id, &msg)
                .and_then(|()| state.router.deliver(msg.sender, msg.op_id, msg.share));
            if let Err(e) = routed {
                warn!(
                    "[SESSION] Dropping fragment of {} received before init: {}",
                    msg.op_id, e
                );
            }
        }
        drop(state);

        info!(
            "[SESSION] Party {} of {} ready for computation '{}'",
            id,
            self.party_count(),
            self.config.computation_id
        );
        self.ready.notify_waiters();
        Ok(())
    }

    fn receive_fragment(&self, event: Event, payload: &str) -> Result<()> {
        let msg = FragmentMessage::from_json(payload)?;
        if event.op_kind() != Some(msg.op_id.kind) {
            return Err(MpcError::malformed(format!(
                "'{}' event carries operation {}",
                event, msg.op_id
            )));
        }

        let mut state = self.state.lock();
        let Some(self_id) = self.party_id() else {
            if state.early.len() >= self.config.max_pending_operations {
                return Err(MpcError::CapacityExceeded {
                    limit: self.config.max_pending_operations,
                });
            }
            debug!(
                "[ROUTER] Holding fragment of {} from party {} until init",
                msg.op_id, msg.sender
            );
            state.early.push(msg);
            return Ok(());
        };
        check_addressing(self_id, &msg)?;

        debug!(
            "[ROUTER] Fragment of {} from party {} to party {}",
            msg.op_id, msg.sender, msg.to
        );
        state.router.deliver(msg.sender, msg.op_id, msg.share)
    }

    /// Drops every pending operation; their values fail with `Cancelled`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let dropped = state.router.len();
        state.router.clear();
        state.early.clear();
        info!("[SESSION] Shut down with {} pending operations", dropped);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("computation_id", &self.config.computation_id)
            .field("party_id", &self.party_id())
            .field("party_count", &self.config.party_count)
            .field("modulus", &self.field.modulus())
            .finish()
    }
}

/// Accepts the id either bare (`2`) or as a JSON string (`"2"`).
fn parse_party_id(payload: &str) -> Result<PartyId> {
    let raw = payload.trim();
    let raw = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(raw)
        .trim();
    raw.parse()
        .map_err(|_| MpcError::malformed(format!("bad party id '{}' in init", payload)))
}

/// Rejects fragments not meant for `self_id`, and our own fragment, which is
/// only ever delivered locally.
fn check_addressing(self_id: PartyId, msg: &FragmentMessage) -> Result<()> {
    if msg.to != self_id {
        return Err(MpcError::malformed(format!(
            "fragment for party {} delivered to party {}",
            msg.to, self_id
        )));
    }
    if msg.sender == self_id {
        return Err(MpcError::invalid_shares(format!(
            "party {} received its own fragment of {} from the wire",
            self_id, msg.op_id
        )));
    }
    Ok(())
}

/// When `open` sends this party's fragment.
enum Broadcast {
    Now(u64),
    /// After the value resolves, in a task on this runtime.
    Deferred(tokio::runtime::Handle),
}

fn handle_future(op_id: OpId, rx: HandleReceiver) -> BoxFuture<'static, Result<u64>> {
    rx.map(move |received| received.unwrap_or(Err(MpcError::Cancelled { op_id })))
        .boxed()
}

/// The eventual plaintext of an [`Session::open`] call.
#[must_use = "the opened value is only observable by awaiting the opening"]
pub struct Opening {
    op_id: OpId,
    inner: BoxFuture<'static, Result<u64>>,
}

impl Opening {
    pub fn op_id(&self) -> OpId {
        self.op_id
    }
}

impl Future for Opening {
    type Output = Result<u64>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Opening {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opening").field("op_id", &self.op_id).finish()
    }
}
