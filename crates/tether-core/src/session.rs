//! Per-connection protocol state machine.
//!
//! One `Session` corresponds to one duplex connection. The transport hands
//! the session an outbound frame sink at construction and later feeds it
//! inbound text frames (`handle_frame`) and the closure notification
//! (`handle_close`). Outbound sends are fire-and-forget at the message
//! level; there is no backpressure, timeout, or retry in this layer.
//!
//! All four id namespaces live behind one mutex, held only while reading or
//! mutating the maps - never across an invoked callback or an await point.
//! Inbound `callback_request` handlers run in spawned tasks so a suspended
//! local callback does not stall dispatch of unrelated messages; requests
//! are correlated strictly by id, never by arrival or completion order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::codec::{self, Cast};
use crate::error::{BridgeError, Result};
use crate::ledger::{Ledger, PendingReply};
use crate::protocol::WireMessage;
use crate::value::{BridgeValue, Callback, CallbackFn};

/// Name of the notification published exactly once when a session closes.
pub const CLOSED_EVENT: &str = "closed";

/// A local notification: an inbound `event` frame, or session closure.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub name: String,
    pub args: Vec<BridgeValue>,
}

/// Handle to a per-connection session. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    outbound: mpsc::UnboundedSender<String>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

struct SessionState {
    open: bool,
    /// id -> callback this side owns and will execute on request.
    local_callbacks: Ledger<CallbackFn>,
    /// id -> proxy for a callback the peer owns.
    remote_callbacks: Ledger<CallbackFn>,
    /// id -> continuation for an outstanding `eval`.
    pending_evals: Ledger<PendingReply>,
    /// id -> continuation for an outstanding proxy invocation.
    pending_callback_calls: Ledger<PendingReply>,
}

impl Session {
    /// Create a session over an established connection, represented by its
    /// outbound frame sink. Must be called within a tokio runtime: inbound
    /// `callback_request` handling spawns tasks.
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SessionInner {
                outbound,
                state: Mutex::new(SessionState {
                    open: true,
                    local_callbacks: Ledger::new(),
                    remote_callbacks: Ledger::new(),
                    pending_evals: Ledger::new(),
                    pending_callback_calls: Ledger::new(),
                }),
                events,
            }),
        }
    }

    /// Subscribe to local notifications (`event` frames and `closed`).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state().open
    }

    /// Send `code` to the peer for execution and await its results.
    ///
    /// Function arguments not already registered are registered as
    /// transient local callbacks, announced to the peer before the request
    /// goes out and unregistered once the round trip completes - on
    /// success and failure alike.
    pub async fn eval(&self, code: &str, args: Vec<BridgeValue>) -> Result<Vec<BridgeValue>> {
        let (reply, pending) = oneshot::channel();
        let transients;
        {
            let mut state = self.inner.state();
            if !state.open {
                return Err(BridgeError::ConnectionClosed);
            }
            let request_id = state.pending_evals.insert_new(reply);

            let mut created = Vec::new();
            let state = &mut *state;
            let local_callbacks = &mut state.local_callbacks;
            let serialized = codec::serialize_args(&args, &mut |callback| {
                Ok(match local_callbacks.find_by_identity(callback) {
                    Some(id) => id,
                    None => {
                        let id = local_callbacks.insert_new(callback.clone());
                        self.inner.send(&WireMessage::CallbackCreate { id });
                        created.push(id);
                        id
                    }
                })
            });
            let (wire_args, cast) = match serialized {
                Ok(pair) => pair,
                Err(e) => {
                    state.pending_evals.remove(request_id);
                    return Err(e);
                }
            };
            self.inner.send(&WireMessage::EvalRequest {
                id: request_id,
                code: code.to_string(),
                args: wire_args,
                cast,
            });
            transients = created;
        }

        let outcome = pending.await.unwrap_or(Err(BridgeError::ConnectionClosed));
        self.cleanup_transients(&transients);
        outcome
    }

    /// Register a callback with caller-managed lifetime and announce it to
    /// the peer. Returns its handle id.
    pub fn register_callback(&self, callback: CallbackFn) -> Result<u64> {
        let mut state = self.inner.state();
        if !state.open {
            return Err(BridgeError::ConnectionClosed);
        }
        let id = state.local_callbacks.insert_new(callback);
        self.inner.send(&WireMessage::CallbackCreate { id });
        Ok(id)
    }

    /// Remove a registered callback and send the deletion notice. Removing
    /// an unknown id still notifies the peer, matching registration being
    /// the owner's concern.
    pub fn unregister_callback(&self, id: u64) -> Result<()> {
        let mut state = self.inner.state();
        if !state.open {
            return Err(BridgeError::ConnectionClosed);
        }
        state.local_callbacks.remove(id);
        self.inner.send(&WireMessage::CallbackDelete { id });
        Ok(())
    }

    /// Feed one inbound text frame. Malformed frames are dropped silently.
    pub fn handle_frame(&self, text: &str) {
        match WireMessage::decode(text) {
            Ok(message) => self.inner.dispatch(message),
            Err(e) => debug!("dropping inbound frame: {e}"),
        }
    }

    /// Transport closed: reject everything pending with the fixed reason,
    /// clear both callback registries, and publish `closed` exactly once.
    /// Idempotent; all further inbound traffic is ignored and all further
    /// outbound operations fail.
    pub fn handle_close(&self) {
        {
            let mut state = self.inner.state();
            if !state.open {
                return;
            }
            state.open = false;
            state.pending_evals.reject_all(BridgeError::ConnectionClosed);
            state
                .pending_callback_calls
                .reject_all(BridgeError::ConnectionClosed);
            state.local_callbacks.clear();
            state.remote_callbacks.clear();
        }
        debug!("session closed");
        let _ = self.inner.events.send(SessionEvent {
            name: CLOSED_EVENT.to_string(),
            args: Vec::new(),
        });
    }

    fn cleanup_transients(&self, ids: &[u64]) {
        let mut state = self.inner.state();
        for &id in ids {
            state.local_callbacks.remove(id);
            if state.open {
                self.inner.send(&WireMessage::CallbackDelete { id });
            }
        }
    }
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: &WireMessage) {
        // Fire-and-forget: a dropped receiver means the transport is gone
        // and teardown is on its way.
        let _ = self.outbound.send(message.encode());
    }

    fn dispatch(self: &Arc<Self>, message: WireMessage) {
        match message {
            WireMessage::EvalRequest { id, .. } => {
                // This role only issues evals; executing them belongs to
                // the peer side of the protocol.
                debug!("ignoring eval_request {id}: not an executing peer");
            }
            WireMessage::EvalResolve { id, output, cast } => {
                self.handle_resolve(PendingMap::Evals, id, &output, &cast);
            }
            WireMessage::EvalReject { id, reason } => {
                let mut state = self.state();
                if state.open {
                    state.pending_evals.reject(id, BridgeError::Rejected { reason });
                }
            }
            WireMessage::CallbackCreate { id } => {
                let proxy: CallbackFn = Arc::new(RemoteCallback {
                    session: Arc::downgrade(self),
                    id,
                });
                let mut state = self.state();
                if state.open {
                    state.remote_callbacks.insert(id, proxy);
                }
            }
            WireMessage::CallbackRequest {
                request_id,
                callback_id,
                args,
                cast,
            } => self.handle_callback_request(request_id, callback_id, &args, &cast),
            WireMessage::CallbackResolve { id, output, cast } => {
                self.handle_resolve(PendingMap::CallbackCalls, id, &output, &cast);
            }
            WireMessage::CallbackReject { id, reason } => {
                let mut state = self.state();
                if state.open {
                    state
                        .pending_callback_calls
                        .reject(id, BridgeError::Rejected { reason });
                }
            }
            WireMessage::CallbackDelete { id } => {
                let mut state = self.state();
                if state.open {
                    state.remote_callbacks.remove(id);
                }
            }
            WireMessage::Event { name, args, cast } => {
                let event_args = {
                    let state = self.state();
                    if !state.open {
                        return;
                    }
                    match deserialize_against(&state, &args, &cast) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("dropping event {name:?}: {e}");
                            return;
                        }
                    }
                };
                let _ = self.events.send(SessionEvent {
                    name,
                    args: event_args,
                });
            }
        }
    }

    fn handle_resolve(&self, map: PendingMap, id: u64, output: &[Value], cast: &[Cast]) {
        let mut state = self.state();
        if !state.open {
            return;
        }
        // Deserialization happens before the pending lookup; a failure
        // drops the frame and leaves any matching pending entry untouched.
        let output = match deserialize_against(&state, output, cast) {
            Ok(v) => v,
            Err(e) => {
                debug!("dropping resolution for request {id}: {e}");
                return;
            }
        };
        match map {
            PendingMap::Evals => state.pending_evals.resolve(id, output),
            PendingMap::CallbackCalls => state.pending_callback_calls.resolve(id, output),
        }
    }

    fn handle_callback_request(
        self: &Arc<Self>,
        request_id: u64,
        callback_id: u64,
        args: &[Value],
        cast: &[Cast],
    ) {
        let (callback, call_args) = {
            let state = self.state();
            if !state.open {
                return;
            }
            let call_args = match deserialize_against(&state, args, cast) {
                Ok(v) => v,
                Err(e) => {
                    debug!("dropping callback_request {request_id}: {e}");
                    return;
                }
            };
            match state.local_callbacks.get(callback_id) {
                Some(callback) => (callback.clone(), call_args),
                None => {
                    self.send(&WireMessage::CallbackReject {
                        id: request_id,
                        reason: Some(BridgeError::CallbackNotFound.to_string()),
                    });
                    return;
                }
            }
        };

        // The callback may suspend and issue further bridge traffic; run it
        // outside the lock and off the dispatch path.
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let reply = match callback.invoke(call_args).await {
                Ok(output) => {
                    let state = session.state();
                    // Lookup only: a function in the output that was never
                    // registered aborts the reply, frame-drop style.
                    let serialized = codec::serialize_args(&output, &mut |callback| {
                        state
                            .local_callbacks
                            .find_by_identity(callback)
                            .ok_or(BridgeError::CallbackNotFound)
                    });
                    match serialized {
                        Ok((output, cast)) => WireMessage::CallbackResolve {
                            id: request_id,
                            output,
                            cast,
                        },
                        Err(e) => {
                            debug!("dropping reply to callback_request {request_id}: {e}");
                            return;
                        }
                    }
                }
                Err(e) => WireMessage::CallbackReject {
                    id: request_id,
                    reason: Some(e.to_string()),
                },
            };
            session.send(&reply);
        });
    }
}

/// Selects which pending-request namespace a resolution targets.
enum PendingMap {
    Evals,
    CallbackCalls,
}

fn deserialize_against(
    state: &SessionState,
    values: &[Value],
    casts: &[Cast],
) -> Result<Vec<BridgeValue>> {
    codec::deserialize_args(values, casts, &mut |id| {
        state.remote_callbacks.get(id).cloned()
    })
}

/// Proxy for a callback owned by the peer, installed on `callback_create`.
///
/// Holding the session weakly keeps a proxy captured by application code
/// from pinning a closed session's state alive.
struct RemoteCallback {
    session: Weak<SessionInner>,
    id: u64,
}

#[async_trait]
impl Callback for RemoteCallback {
    async fn invoke(&self, args: Vec<BridgeValue>) -> Result<Vec<BridgeValue>> {
        let Some(session) = self.session.upgrade() else {
            return Err(BridgeError::ConnectionClosed);
        };
        let (reply, pending) = oneshot::channel();
        {
            let mut state = session.state();
            if !state.open {
                return Err(BridgeError::ConnectionClosed);
            }
            let request_id = state.pending_callback_calls.insert_new(reply);

            // Nested function arguments become fresh permanent
            // registrations, announced before the request.
            let state = &mut *state;
            let local_callbacks = &mut state.local_callbacks;
            let serialized = codec::serialize_args(&args, &mut |callback| {
                let id = local_callbacks.insert_new(callback.clone());
                session.send(&WireMessage::CallbackCreate { id });
                Ok(id)
            });
            match serialized {
                Ok((wire_args, cast)) => session.send(&WireMessage::CallbackRequest {
                    request_id,
                    callback_id: self.id,
                    args: wire_args,
                    cast,
                }),
                Err(e) => {
                    state.pending_callback_calls.remove(request_id);
                    return Err(e);
                }
            }
        }
        pending.await.unwrap_or(Err(BridgeError::ConnectionClosed))
    }
}
