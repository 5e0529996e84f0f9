//! Pending-operation table and inbound fragment routing.
//!
//! Each operation id is in exactly one of three states. Fragments that arrive
//! before this party reaches the matching `share`/`open` call are `Buffered`;
//! registration turns the entry into `AwaitingShares` (one handle per peer) or
//! `AwaitingOpen` (one handle, fragments accumulated until every party has
//! contributed). An entry disappears as soon as nothing is left to deliver.
//!
//! Finished and failed operations are remembered in a bounded retirement
//! window so that stragglers for them are dropped instead of re-buffered.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{MpcError, Result};
use crate::field::Field;
use crate::op_id::{OpId, OpKind};
use crate::sharing;
use crate::PartyId;

pub(crate) type Handle = oneshot::Sender<Result<u64>>;
pub(crate) type HandleReceiver = oneshot::Receiver<Result<u64>>;

enum PendingOp {
    Buffered(BTreeMap<PartyId, u64>),
    AwaitingShares(FxHashMap<PartyId, Handle>),
    AwaitingOpen {
        handle: Handle,
        fragments: BTreeMap<PartyId, u64>,
    },
}

/// Outcome of registering one peer's fragment of a `share` operation.
pub(crate) enum Slot {
    Ready(u64),
    Pending(HandleReceiver),
}

pub(crate) struct Router {
    field: Field,
    party_count: usize,
    limit: usize,
    ops: FxHashMap<OpId, PendingOp>,
    retired: FxHashSet<OpId>,
    /// Retirement order; the oldest id is forgotten once `limit` is reached.
    retired_order: VecDeque<OpId>,
}

impl Router {
    pub fn new(field: Field, party_count: usize, limit: usize) -> Self {
        Router {
            field,
            party_count,
            limit,
            ops: FxHashMap::default(),
            retired: FxHashSet::default(),
            retired_order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether `op_id` has finished or failed recently enough to be remembered.
    pub fn is_retired(&self, op_id: &OpId) -> bool {
        self.retired.contains(op_id)
    }

    fn retire(&mut self, op_id: OpId) {
        if !self.retired.insert(op_id) {
            return;
        }
        self.retired_order.push_back(op_id);
        while self.retired_order.len() > self.limit {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.ops.len() >= self.limit {
            return Err(MpcError::CapacityExceeded { limit: self.limit });
        }
        Ok(())
    }

    fn check_sender(&self, sender: PartyId) -> Result<()> {
        if sender == 0 || sender > self.party_count {
            return Err(MpcError::invalid_shares(format!(
                "sender {} outside 1..={}",
                sender, self.party_count
            )));
        }
        Ok(())
    }

    /// Sets up the receiving side of a `share` operation. Fragments that were
    /// already buffered are handed out directly; every other peer gets a handle.
    pub fn register_share(
        &mut self,
        op_id: OpId,
        self_id: PartyId,
    ) -> Result<BTreeMap<PartyId, Slot>> {
        let mut buffered = match self.ops.remove(&op_id) {
            Some(PendingOp::Buffered(fragments)) => fragments,
            Some(other) => {
                self.ops.insert(op_id, other);
                return Err(MpcError::invalid_shares(format!(
                    "operation {} registered twice",
                    op_id
                )));
            }
            None => {
                self.ensure_capacity()?;
                BTreeMap::new()
            }
        };

        let mut slots = BTreeMap::new();
        let mut handles = FxHashMap::default();
        for peer in (1..=self.party_count).filter(|&p| p != self_id) {
            match buffered.remove(&peer) {
                Some(value) => {
                    slots.insert(peer, Slot::Ready(value));
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    handles.insert(peer, tx);
                    slots.insert(peer, Slot::Pending(rx));
                }
            }
        }

        if handles.is_empty() {
            self.retire(op_id);
        } else {
            self.ops.insert(op_id, PendingOp::AwaitingShares(handles));
        }
        Ok(slots)
    }

    /// Sets up the collection of all fragments of an `open` operation.
    pub fn register_open(&mut self, op_id: OpId) -> Result<HandleReceiver> {
        let fragments = match self.ops.remove(&op_id) {
            Some(PendingOp::Buffered(fragments)) => fragments,
            Some(other) => {
                self.ops.insert(op_id, other);
                return Err(MpcError::invalid_shares(format!(
                    "operation {} registered twice",
                    op_id
                )));
            }
            None => {
                self.ensure_capacity()?;
                BTreeMap::new()
            }
        };

        let (handle, rx) = oneshot::channel();
        self.ops
            .insert(op_id, PendingOp::AwaitingOpen { handle, fragments });
        self.try_complete_open(op_id);
        Ok(rx)
    }

    /// Routes one fragment, whatever the state of its operation.
    pub fn deliver(&mut self, sender: PartyId, op_id: OpId, value: u64) -> Result<()> {
        self.check_sender(sender)?;
        let value = self.field.element(value);
        if self.is_retired(&op_id) {
            warn!(
                "[ROUTER] Dropping late fragment of finished operation {} from party {}",
                op_id, sender
            );
            return Ok(());
        }

        match self.ops.get_mut(&op_id) {
            None => {
                self.ensure_capacity()?;
                debug!("[ROUTER] Buffering fragment of {} from party {}", op_id, sender);
                let mut fragments = BTreeMap::new();
                fragments.insert(sender, value);
                self.ops.insert(op_id, PendingOp::Buffered(fragments));
                Ok(())
            }
            Some(PendingOp::Buffered(fragments)) => {
                if fragments.contains_key(&sender) {
                    return Err(duplicate(op_id, sender));
                }
                fragments.insert(sender, value);
                Ok(())
            }
            Some(PendingOp::AwaitingShares(handles)) => {
                if op_id.kind != OpKind::Share {
                    return Err(kind_mismatch(op_id));
                }
                let handle = handles.remove(&sender).ok_or_else(|| duplicate(op_id, sender))?;
                let _ = handle.send(Ok(value));
                if handles.is_empty() {
                    self.ops.remove(&op_id);
                    self.retire(op_id);
                }
                Ok(())
            }
            Some(PendingOp::AwaitingOpen { fragments, .. }) => {
                if op_id.kind != OpKind::Open {
                    return Err(kind_mismatch(op_id));
                }
                if fragments.contains_key(&sender) {
                    return Err(duplicate(op_id, sender));
                }
                fragments.insert(sender, value);
                self.try_complete_open(op_id);
                Ok(())
            }
        }
    }

    fn try_complete_open(&mut self, op_id: OpId) {
        let complete = matches!(
            self.ops.get(&op_id),
            Some(PendingOp::AwaitingOpen { fragments, .. }) if fragments.len() == self.party_count
        );
        if !complete {
            return;
        }

        if let Some(PendingOp::AwaitingOpen { handle, fragments }) = self.ops.remove(&op_id) {
            let result = sharing::reconstruct(&self.field, &fragments, self.party_count);
            debug!("[ROUTER] Operation {} has all {} fragments", op_id, fragments.len());
            let _ = handle.send(result);
            self.retire(op_id);
        }
    }

    /// Fails every handle still waiting on `op_id`, drops the entry and
    /// retires the id. Returns whether anything was removed.
    pub fn fail(&mut self, op_id: OpId, error: MpcError) -> bool {
        self.retire(op_id);
        match self.ops.remove(&op_id) {
            Some(PendingOp::AwaitingShares(handles)) => {
                warn!(
                    "[ROUTER] Failing {} with {} missing fragments: {}",
                    op_id,
                    handles.len(),
                    error
                );
                for (_, handle) in handles {
                    let _ = handle.send(Err(error.clone()));
                }
                true
            }
            Some(PendingOp::AwaitingOpen { handle, fragments }) => {
                warn!(
                    "[ROUTER] Failing {} with {} of {} fragments: {}",
                    op_id,
                    fragments.len(),
                    self.party_count,
                    error
                );
                let _ = handle.send(Err(error));
                true
            }
            Some(PendingOp::Buffered(_)) => true,
            None => false,
        }
    }

    /// Drops and retires every entry. Outstanding receivers observe a closed
    /// channel.
    pub fn clear(&mut self) {
        let dropped: Vec<OpId> = self.ops.drain().map(|(op_id, _)| op_id).collect();
        for op_id in dropped {
            self.retire(op_id);
        }
    }

    #[cfg(test)]
    fn buffered(&self, op_id: &OpId) -> Option<usize> {
        match self.ops.get(op_id) {
            Some(PendingOp::Buffered(f)) => Some(f.len()),
            _ => None,
        }
    }
}

fn duplicate(op_id: OpId, sender: PartyId) -> MpcError {
    MpcError::invalid_shares(format!(
        "unexpected or duplicate fragment of {} from party {}",
        op_id, sender
    ))
}

fn kind_mismatch(op_id: OpId) -> MpcError {
    MpcError::malformed(format!("fragment kind does not match operation {}", op_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::compute_shares;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn share_op(n: u64) -> OpId {
        OpId::new(None, OpKind::Share, n)
    }

    fn open_op(n: u64) -> OpId {
        OpId::new(None, OpKind::Open, n)
    }

    fn permutations(items: &[PartyId]) -> Vec<Vec<PartyId>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    fn settle(slot: Slot) -> u64 {
        match slot {
            Slot::Ready(v) => v,
            Slot::Pending(mut rx) => rx.try_recv().unwrap().unwrap(),
        }
    }

    #[test]
    fn test_share_fragments_in_any_order() {
        let self_id = 4;
        let peers = [1, 2, 3];
        for order in permutations(&peers) {
            for registered_after in 0..=order.len() {
                let mut router = Router::new(Field::default(), 4, 16);
                let op = share_op(0);
                let mut slots = None;

                for (i, &sender) in order.iter().enumerate() {
                    if i == registered_after {
                        slots = Some(router.register_share(op, self_id).unwrap());
                    }
                    router.deliver(sender, op, sender as u64 * 100).unwrap();
                }
                let slots = match slots {
                    Some(s) => s,
                    None => {
                        assert_eq!(router.buffered(&op), Some(3));
                        router.register_share(op, self_id).unwrap()
                    }
                };

                assert_eq!(slots.len(), 3);
                assert!(!slots.contains_key(&self_id));
                for (peer, slot) in slots {
                    assert_eq!(settle(slot), peer as u64 * 100);
                }
                assert_eq!(router.len(), 0);
            }
        }
    }

    #[test]
    fn test_open_fragments_in_any_order() {
        let field = Field::default();
        let mut rng = StdRng::seed_from_u64(5);
        let shares = compute_shares(&field, 777, 4, &mut rng);

        for order in permutations(&[1, 2, 3, 4]) {
            for registered_after in 0..=order.len() {
                let mut router = Router::new(field, 4, 16);
                let op = open_op(1);
                let mut rx = None;

                for (i, &sender) in order.iter().enumerate() {
                    if i == registered_after {
                        rx = Some(router.register_open(op).unwrap());
                    }
                    router.deliver(sender, op, shares[&sender]).unwrap();
                }

                let mut rx = rx.unwrap_or_else(|| router.register_open(op).unwrap());
                assert_eq!(rx.try_recv().unwrap().unwrap(), 777);
                assert_eq!(router.len(), 0);
            }
        }
    }

    #[test]
    fn test_duplicates_and_strangers_rejected() {
        let mut router = Router::new(Field::default(), 3, 16);
        let op = share_op(0);
        router.deliver(1, op, 5).unwrap();
        assert!(router.deliver(1, op, 5).is_err());
        assert!(router.deliver(0, op, 5).is_err());
        assert!(router.deliver(4, op, 5).is_err());

        let slots = router.register_share(op, 3).unwrap();
        assert!(matches!(slots.get(&1), Some(Slot::Ready(5))));
        router.deliver(2, op, 6).unwrap();
        assert_eq!(router.len(), 0);
        drop(slots);
    }

    #[test]
    fn test_fully_buffered_share_leaves_no_entry() {
        let mut router = Router::new(Field::default(), 3, 16);
        let op = share_op(2);
        router.deliver(1, op, 10).unwrap();
        router.deliver(2, op, 20).unwrap();
        let slots = router.register_share(op, 3).unwrap();
        assert!(slots.values().all(|s| matches!(s, Slot::Ready(_))));
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut router = Router::new(Field::default(), 3, 2);
        router.deliver(1, share_op(0), 1).unwrap();
        router.deliver(1, share_op(1), 1).unwrap();
        // existing entries still accept fragments
        router.deliver(2, share_op(1), 1).unwrap();
        assert_eq!(
            router.deliver(1, share_op(2), 1),
            Err(MpcError::CapacityExceeded { limit: 2 })
        );
        assert!(router.register_open(open_op(3)).is_err());
    }

    #[test]
    fn test_fail_rejects_waiters() {
        let mut router = Router::new(Field::default(), 3, 16);
        let op = open_op(0);
        let mut rx = router.register_open(op).unwrap();
        router.deliver(1, op, 3).unwrap();

        let err = MpcError::Timeout { op_id: op };
        assert!(router.fail(op, err.clone()));
        assert_eq!(rx.try_recv().unwrap(), Err(err));
        assert_eq!(router.len(), 0);
        assert!(!router.fail(op, MpcError::SessionMismatch));
    }

    #[test]
    fn test_stragglers_of_failed_operations_are_dropped() {
        let mut router = Router::new(Field::default(), 3, 1);
        let op = share_op(0);
        let slots = router.register_share(op, 1).unwrap();
        router.fail(op, MpcError::Timeout { op_id: op });

        router.deliver(2, op, 9).unwrap();
        router.deliver(3, op, 9).unwrap();
        assert_eq!(router.len(), 0);
        assert!(router.is_retired(&op));

        // the slot is free again
        let _rx = router.register_open(open_op(1)).unwrap();
        drop(slots);
    }

    #[test]
    fn test_completed_open_ignores_late_fragments() {
        let mut router = Router::new(Field::default(), 2, 4);
        let op = open_op(0);
        let mut rx = router.register_open(op).unwrap();
        router.deliver(1, op, 4).unwrap();
        router.deliver(2, op, 4).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Ok(4));

        router.deliver(2, op, 4).unwrap();
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn test_retirement_window_is_bounded() {
        let mut router = Router::new(Field::default(), 3, 2);
        for n in 0..3 {
            router.fail(share_op(n), MpcError::SessionMismatch);
        }
        assert!(!router.is_retired(&share_op(0)));
        assert!(router.is_retired(&share_op(1)));
        assert!(router.is_retired(&share_op(2)));
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut router = Router::new(Field::default(), 3, 16);
        let op = open_op(0);
        let _rx = router.register_open(op).unwrap();
        assert!(router.register_open(op).is_err());
        assert_eq!(router.len(), 1);
    }
}
