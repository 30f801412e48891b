//! Pending asynchronous calls and reverse-path callback delivery.
//!
//! Each in-flight call is one [`PendingCall`] keyed by a non-zero,
//! monotonically-assigned call-ID. The state machine per call is
//! `Active -> Completed` or `Active -> CancelRequested -> Completed`;
//! completion removes the record, so nothing ever leaves `Completed` and a
//! late callback for an untracked ID is dropped silently - that is a benign
//! race, not a fault.
//!
//! The native runtime may complete calls from arbitrary worker threads. Its
//! callbacks are modeled as [`CallbackEvent`] messages on a channel drained
//! by [`pump`], which keeps the locking discipline of the pending-call
//! table uniform regardless of which thread produced the event.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::dispatch::Dispatcher;
use crate::errors::{BridgeError, BridgeResult};
use crate::wire::{self, CallId, KwargsMap, WireValue};

/// Terminal status carried on the reverse path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
    Cancelled,
}

impl CallStatus {
    pub fn from_code(code: i32) -> Option<CallStatus> {
        match code {
            0 => Some(CallStatus::Success),
            1 => Some(CallStatus::Error),
            2 => Some(CallStatus::Cancelled),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            CallStatus::Success => 0,
            CallStatus::Error => 1,
            CallStatus::Cancelled => 2,
        }
    }
}

/// One native-to-host callback: `(call-ID, status, payload)`.
///
/// The status is kept raw here; [`CallbackManager::deliver`] interprets it
/// so that producers (the C entry point, test runtimes) stay trivial.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub call_id: CallId,
    pub status: i32,
    pub payload: Vec<u8>,
}

impl CallbackEvent {
    pub fn success(call_id: CallId, payload: Vec<u8>) -> Self {
        Self {
            call_id,
            status: CallStatus::Success.code(),
            payload,
        }
    }

    pub fn error(call_id: CallId, diagnostic: impl Into<Vec<u8>>) -> Self {
        Self {
            call_id,
            status: CallStatus::Error.code(),
            payload: diagnostic.into(),
        }
    }

    pub fn cancelled(call_id: CallId) -> Self {
        Self {
            call_id,
            status: CallStatus::Cancelled.code(),
            payload: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Active,
    CancelRequested,
}

struct PendingCall {
    state: CallState,
    sink: oneshot::Sender<BridgeResult<WireValue>>,
}

/// Awaitable side of one pending call.
#[derive(Debug)]
pub struct CallHandle {
    pub(crate) id: CallId,
    pub(crate) rx: oneshot::Receiver<BridgeResult<WireValue>>,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Await the terminal outcome. Exactly one terminal outcome is
    /// delivered per call; if the delivery path was torn down first, this
    /// resolves to `Disconnected`.
    pub async fn join(self) -> BridgeResult<WireValue> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::Disconnected),
        }
    }
}

/// Table of in-flight asynchronous calls.
///
/// Every table operation is single-key, so a concurrent map gives the
/// mutual exclusion the callback path needs: a callback racing the
/// registration of its own call-ID cannot observe a half-inserted entry,
/// and `start` always registers before the request crosses the boundary.
pub struct CallbackManager {
    calls: DashMap<u64, PendingCall>,
    next_id: AtomicU64,
    dispatcher: Dispatcher,
}

impl CallbackManager {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    /// Allocate a fresh non-zero call-ID. IDs come from a process-lifetime
    /// counter and are never reissued, so the late-callback guard is purely
    /// the table membership check.
    pub fn allocate_id(&self) -> CallId {
        CallId::from_raw_unchecked(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a pending call and transmit the request.
    ///
    /// Registration happens before transmission, which is what guarantees
    /// the callback can never arrive for an unregistered ID. Returns
    /// immediately; the caller awaits or cancels through the handle.
    pub fn start(&self, kwargs: &KwargsMap) -> BridgeResult<CallHandle> {
        let id = self.allocate_id();
        let (sink, rx) = oneshot::channel();
        self.calls.insert(
            id.as_u64(),
            PendingCall {
                state: CallState::Active,
                sink,
            },
        );

        if let Err(err) = self.dispatcher.submit_parse(id, kwargs) {
            self.calls.remove(&id.as_u64());
            return Err(err);
        }
        tracing::debug!(call_id = %id, "async call started");
        Ok(CallHandle { id, rx })
    }

    /// Request cancellation of an in-flight call.
    ///
    /// Returns `true` only on the `Active -> CancelRequested` transition;
    /// `false` if the call already completed or was never known. Advisory:
    /// the caller still awaits the eventual terminal outcome.
    pub fn cancel(&self, id: CallId) -> bool {
        {
            let mut entry = match self.calls.get_mut(&id.as_u64()) {
                Some(entry) => entry,
                None => return false,
            };
            if entry.state != CallState::Active {
                return false;
            }
            entry.state = CallState::CancelRequested;
        }
        // Signal outside the table guard; the dispatcher call can block.
        match self.dispatcher.cancel(id) {
            Ok(known) => {
                tracing::debug!(call_id = %id, native_knew = known, "cancellation requested");
            }
            Err(err) => {
                tracing::warn!(call_id = %id, %err, "cancellation signal failed");
            }
        }
        true
    }

    /// Deliver one native callback.
    ///
    /// Removes the pending call if it is still tracked - guaranteeing
    /// at-most-once terminal delivery - and resolves the awaiting caller.
    /// Untracked IDs (completed, cancelled-and-raced, or unknown) are
    /// dropped without error.
    pub fn deliver(&self, event: CallbackEvent) {
        let (_, pending) = match self.calls.remove(&event.call_id.as_u64()) {
            Some(removed) => removed,
            None => {
                tracing::trace!(call_id = %event.call_id, "late callback dropped");
                return;
            }
        };

        let outcome = match CallStatus::from_code(event.status) {
            Some(CallStatus::Success) => wire::decode_value(&event.payload),
            Some(CallStatus::Error) => Err(BridgeError::Native {
                status: event.status,
                message: String::from_utf8_lossy(&event.payload).into_owned(),
            }),
            Some(CallStatus::Cancelled) => Err(BridgeError::Cancelled),
            None => {
                tracing::warn!(call_id = %event.call_id, status = event.status, "unknown callback status");
                Err(BridgeError::Native {
                    status: event.status,
                    message: "unknown callback status".to_string(),
                })
            }
        };

        // The receiver may already be gone if the caller dropped its handle.
        let _ = pending.sink.send(outcome);
    }

    pub fn pending_count(&self) -> usize {
        self.calls.len()
    }

    /// Abandon every pending call, dropping its sink so awaiting callers
    /// resolve to `Disconnected`. Called when the owning bridge tears down;
    /// no further terminal outcomes can arrive once the pump is gone.
    pub fn disconnect(&self) {
        let abandoned = self.calls.len();
        self.calls.clear();
        if abandoned > 0 {
            tracing::debug!(abandoned, "pending calls disconnected");
        }
    }
}

/// Drain callback events until every sender is dropped.
///
/// Spawned once per bridge context on the tokio runtime; producers may be
/// any native worker thread.
pub async fn pump(manager: std::sync::Arc<CallbackManager>, events: flume::Receiver<CallbackEvent>) {
    while let Ok(event) = events.recv_async().await {
        manager.deliver(event);
    }
    tracing::debug!("callback pump stopped");
}
