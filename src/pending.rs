//! # Pending values
//!
//! A [`PendingValue`] is one party's fragment of a shared secret. It is either
//! already known (`Resolved`) or still on its way from a peer (`Unresolved`).
//! Arithmetic works in both states: combining two resolved values computes the
//! result on the spot, anything else yields a new pending value that resolves
//! once its operands do. Arbitrarily deep expressions can therefore be built
//! before a single fragment has arrived.
//!
//! An unresolved value wraps a shared single-shot future. Every value built on
//! top of it holds a clone of that future instead of registering a callback,
//! so the fragment is delivered once and observed by all dependants.

use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{MpcError, Result};
use crate::field::Field;
use crate::session::{Opening, Session};

type SharedFragment = Shared<BoxFuture<'static, Result<u64>>>;

#[derive(Clone)]
enum ValueState {
    Resolved(u64),
    Unresolved(SharedFragment),
}

/// One party's fragment of a shared value, possibly not yet received.
#[derive(Clone)]
pub struct PendingValue {
    session: Arc<Session>,
    id: u64,
    state: ValueState,
}

impl PendingValue {
    pub(crate) fn resolved(session: Arc<Session>, id: u64, value: u64) -> Self {
        PendingValue {
            session,
            id,
            state: ValueState::Resolved(value),
        }
    }

    pub(crate) fn unresolved(
        session: Arc<Session>,
        id: u64,
        fragment: BoxFuture<'static, Result<u64>>,
    ) -> Self {
        PendingValue {
            session,
            id,
            state: ValueState::Unresolved(fragment.shared()),
        }
    }

    /// Wraps a public constant as a resolved value of `session`.
    pub fn constant(session: &Arc<Session>, value: u64) -> Self {
        let value = session.field().element(value);
        PendingValue::resolved(session.clone(), session.next_value_id(), value)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Diagnostic id, unique within the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the fragment is known, without waiting for it.
    pub fn is_resolved(&self) -> bool {
        self.value().is_some()
    }

    /// The fragment if it is known already. Never waits.
    pub fn value(&self) -> Option<u64> {
        match &self.state {
            ValueState::Resolved(v) => Some(*v),
            ValueState::Unresolved(fragment) => match fragment.peek() {
                Some(Ok(v)) => Some(*v),
                _ => None,
            },
        }
    }

    /// Waits for the fragment.
    pub async fn resolve(&self) -> Result<u64> {
        match &self.state {
            ValueState::Resolved(v) => Ok(*v),
            ValueState::Unresolved(fragment) => fragment.clone().await,
        }
    }

    /// Opens this value to every party. See [`Session::open`].
    pub fn open(&self) -> Result<Opening> {
        self.session.open(self)
    }

    pub fn add(&self, other: &PendingValue) -> Result<PendingValue> {
        self.combine(other, Field::add)
    }

    pub fn sub(&self, other: &PendingValue) -> Result<PendingValue> {
        self.combine(other, Field::sub)
    }

    /// Adds a public constant.
    pub fn cadd(&self, k: u64) -> PendingValue {
        self.map(move |field, v| field.add(v, field.element(k)))
    }

    /// Subtracts a public constant.
    pub fn csub(&self, k: u64) -> PendingValue {
        self.map(move |field, v| field.sub(v, field.element(k)))
    }

    /// Multiplies by a public constant.
    pub fn cmul(&self, k: u64) -> PendingValue {
        self.map(move |field, v| field.scalar_mul(v, k))
    }

    pub fn neg(&self) -> PendingValue {
        self.map(|field, v| field.neg(v))
    }

    fn derived(&self, state: ValueState) -> PendingValue {
        PendingValue {
            session: self.session.clone(),
            id: self.session.next_value_id(),
            state,
        }
    }

    fn map<F>(&self, op: F) -> PendingValue
    where
        F: Fn(&Field, u64) -> u64 + Send + 'static,
    {
        let field = *self.session.field();
        let state = match &self.state {
            ValueState::Resolved(v) => ValueState::Resolved(op(&field, *v)),
            ValueState::Unresolved(fragment) => {
                let fragment = fragment.clone();
                ValueState::Unresolved(
                    async move { fragment.await.map(|v| op(&field, v)) }
                        .boxed()
                        .shared(),
                )
            }
        };
        self.derived(state)
    }

    /// Applies `op` to both fragments, waiting only on the operands that are
    /// still unresolved.
    fn combine(&self, other: &PendingValue, op: fn(&Field, u64, u64) -> u64) -> Result<PendingValue> {
        if !Arc::ptr_eq(&self.session, &other.session) {
            return Err(MpcError::SessionMismatch);
        }

        let field = *self.session.field();
        let state = match (&self.state, &other.state) {
            (ValueState::Resolved(a), ValueState::Resolved(b)) => {
                ValueState::Resolved(op(&field, *a, *b))
            }
            (ValueState::Resolved(a), ValueState::Unresolved(fb)) => {
                let (a, fb) = (*a, fb.clone());
                ValueState::Unresolved(
                    async move { fb.await.map(|b| op(&field, a, b)) }
                        .boxed()
                        .shared(),
                )
            }
            (ValueState::Unresolved(fa), ValueState::Resolved(b)) => {
                let (fa, b) = (fa.clone(), *b);
                ValueState::Unresolved(
                    async move { fa.await.map(|a| op(&field, a, b)) }
                        .boxed()
                        .shared(),
                )
            }
            (ValueState::Unresolved(fa), ValueState::Unresolved(fb)) => {
                let (fa, fb) = (fa.clone(), fb.clone());
                ValueState::Unresolved(
                    async move {
                        let (a, b) = future::try_join(fa, fb).await?;
                        Ok(op(&field, a, b))
                    }
                    .boxed()
                    .shared(),
                )
            }
        };
        Ok(self.derived(state))
    }
}

impl fmt::Display for PendingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "v{}: {}", self.id, v),
            None => write!(f, "v{}: <pending>", self.id),
        }
    }
}

impl fmt::Debug for PendingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingValue")
            .field("id", &self.id)
            .field("value", &self.value())
            .field("party_id", &self.session.party_id())
            .finish()
    }
}
