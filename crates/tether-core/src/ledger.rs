//! Id allocation and pending-continuation tracking.
//!
//! A `Ledger` backs each of the session's four id namespaces: locally-owned
//! callbacks, remote-callback proxies, and the two pending-request maps.
//! Ids are allocated as the smallest non-negative integer not currently in
//! use and are reused once freed - this keeps the id space compact and is
//! observable protocol behavior, not an implementation detail.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};
use crate::value::{BridgeValue, CallbackFn};

/// Continuation for an outstanding request: fulfilled with the deserialized
/// output or failed with the rejection reason, exactly once.
pub type PendingReply = oneshot::Sender<Result<Vec<BridgeValue>>>;

/// Mapping of compact integer ids to entries in one namespace.
#[derive(Debug, Default)]
pub struct Ledger<T> {
    entries: BTreeMap<u64, T>,
}

impl<T> Ledger<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Smallest id not currently present.
    pub fn allocate(&self) -> u64 {
        let mut id = 0;
        while self.entries.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Insert under an externally-chosen id (peer-announced handles).
    pub fn insert(&mut self, id: u64, entry: T) {
        self.entries.insert(id, entry);
    }

    /// Allocate an id and insert in one step.
    pub fn insert_new(&mut self, entry: T) -> u64 {
        let id = self.allocate();
        self.entries.insert(id, entry);
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Ledger<CallbackFn> {
    /// Reverse lookup by function identity. Registries are small and
    /// per-connection, so a linear scan is fine.
    pub fn find_by_identity(&self, callback: &CallbackFn) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, registered)| Arc::ptr_eq(registered, callback))
            .map(|(id, _)| *id)
    }
}

impl Ledger<PendingReply> {
    /// Fulfill and remove a pending request. A missing id is a silent no-op,
    /// guarding against duplicate or stale resolution messages.
    pub fn resolve(&mut self, id: u64, output: Vec<BridgeValue>) {
        if let Some(reply) = self.entries.remove(&id) {
            let _ = reply.send(Ok(output));
        }
    }

    /// Fail and remove a pending request. A missing id is a silent no-op.
    pub fn reject(&mut self, id: u64, error: BridgeError) {
        if let Some(reply) = self.entries.remove(&id) {
            let _ = reply.send(Err(error));
        }
    }

    /// Fail and remove every pending request. Teardown only.
    pub fn reject_all(&mut self, error: BridgeError) {
        for (_, reply) in std::mem::take(&mut self.entries) {
            let _ = reply.send(Err(error.clone()));
        }
    }
}
