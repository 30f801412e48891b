//! Ergonomic layer consumed by the host application.
//!
//! [`Bridge`] is the explicitly-constructed context object scoping all
//! process-wide mutable state (the pending-call table and the handle
//! registry); independent instances never interfere, so tests can run many
//! bridges side by side.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::callback::{pump, CallHandle, CallbackEvent, CallbackManager};
use crate::dispatch::{Dispatcher, NativeTransport};
use crate::errors::{BridgeError, BridgeResult};
use crate::registry::{Handle, HandleRegistry};
use crate::wire::{
    CallId, ConstructorRequest, KwargsMap, MethodRequest, ObjectKind, RawObjectRef, WireValue,
};

/// Bridge construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Callback queue bound; 0 means unbounded.
    pub event_queue_bound: usize,
    /// Whether dropping an [`ObjectHandle`] also issues the native
    /// destructor. Registry invalidation happens on drop regardless.
    pub dispose_on_drop: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_queue_bound: 0,
            dispose_on_drop: true,
        }
    }
}

struct BridgeShared {
    registry: HandleRegistry,
    manager: Arc<CallbackManager>,
    dispatcher: Dispatcher,
    config: BridgeConfig,
}

/// One bridge context: registry, pending-call table, dispatcher, and the
/// callback pump task. Dropping the bridge stops the pump and resolves
/// in-flight calls with `Disconnected`; object handles that outlive it can
/// still dispose through the shared dispatcher.
pub struct Bridge {
    shared: Arc<BridgeShared>,
    events_tx: flume::Sender<CallbackEvent>,
    pump_task: tokio::task::JoinHandle<()>,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn NativeTransport>,
        config: BridgeConfig,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let dispatcher = Dispatcher::new(transport);
        let manager = Arc::new(CallbackManager::new(dispatcher.clone()));
        let (events_tx, events_rx) = if config.event_queue_bound > 0 {
            flume::bounded(config.event_queue_bound)
        } else {
            flume::unbounded()
        };
        let pump_task = runtime.spawn(pump(Arc::clone(&manager), events_rx));
        let shared = Arc::new(BridgeShared {
            registry: HandleRegistry::new(),
            manager,
            dispatcher,
            config,
        });
        Self {
            shared,
            events_tx,
            pump_task,
        }
    }

    /// Construct on the current tokio runtime with default options.
    pub fn with_defaults(transport: Arc<dyn NativeTransport>) -> Self {
        Self::new(
            transport,
            BridgeConfig::default(),
            &tokio::runtime::Handle::current(),
        )
    }

    /// Sender half of the reverse callback path, handed to whatever layer
    /// receives native completions (the C entry point, or a test runtime).
    pub fn event_sender(&self) -> flume::Sender<CallbackEvent> {
        self.events_tx.clone()
    }

    /// Native runtime version string.
    pub fn version(&self) -> BridgeResult<String> {
        self.shared.dispatcher.get_version()
    }

    /// Start an asynchronous parse call. The job can be awaited and
    /// cancelled independently.
    pub fn start_parse(&self, kwargs: KwargsMap) -> BridgeResult<ParseJob> {
        let handle = self.shared.manager.start(&kwargs)?;
        Ok(ParseJob {
            handle,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Parse to completion.
    pub async fn parse(&self, kwargs: KwargsMap) -> BridgeResult<WireValue> {
        self.start_parse(kwargs)?.join().await
    }

    /// Parse with cancellation propagation: a single suspension point that
    /// requests cancellation when `cancel` fires, then keeps awaiting the
    /// terminal outcome - which may still be a natural success that outran
    /// the cancellation.
    pub async fn parse_with_cancel(
        &self,
        kwargs: KwargsMap,
        cancel: impl Future<Output = ()>,
    ) -> BridgeResult<WireValue> {
        let ParseJob { mut handle, shared } = self.start_parse(kwargs)?;
        tokio::select! {
            outcome = &mut handle.rx => {
                return outcome.unwrap_or(Err(BridgeError::Disconnected));
            }
            _ = cancel => {}
        }
        shared.manager.cancel(handle.id);
        handle.join().await
    }

    /// Request cancellation of an in-flight call by ID. Returns `false`
    /// for completed or unknown calls; benign either way.
    pub fn cancel(&self, id: CallId) -> bool {
        self.shared.manager.cancel(id)
    }

    /// Construct a native object and register its handle.
    pub fn construct(&self, kind: ObjectKind, kwargs: KwargsMap) -> BridgeResult<ObjectHandle> {
        let request = ConstructorRequest { kind, kwargs };
        let reference = self.shared.dispatcher.construct(&request)?;
        if reference.kind != kind {
            return Err(BridgeError::malformed(format!(
                "constructor for {} returned a {} reference",
                kind, reference.kind
            )));
        }
        let created_by = self.shared.manager.allocate_id();
        let handle = self
            .shared
            .registry
            .register(reference.kind, reference.pointer, created_by)?;
        Ok(ObjectHandle {
            handle,
            kind,
            shared: Arc::clone(&self.shared),
        })
    }

    /// In-flight asynchronous calls. Diagnostic surface.
    pub fn pending_calls(&self) -> usize {
        self.shared.manager.pending_count()
    }

    /// Live registered object handles. Diagnostic surface.
    pub fn live_handles(&self) -> usize {
        self.shared.registry.live_count()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.pump_task.abort();
        // No terminal outcome can arrive once the pump is gone; resolve
        // every in-flight join with Disconnected instead of hanging it.
        self.shared.manager.disconnect();
    }
}

/// One in-flight asynchronous parse call.
pub struct ParseJob {
    handle: CallHandle,
    shared: Arc<BridgeShared>,
}

impl ParseJob {
    pub fn id(&self) -> CallId {
        self.handle.id()
    }

    /// Advisory cancellation; see [`CallbackManager::cancel`].
    pub fn cancel(&self) -> bool {
        self.shared.manager.cancel(self.handle.id())
    }

    /// Await the terminal outcome.
    pub async fn join(self) -> BridgeResult<WireValue> {
        self.handle.join().await
    }
}

/// Host-side wrapper around a registered native object.
///
/// `dispose` (or drop) invalidates the registry entry synchronously, and
/// only then asks the native runtime to destroy the instance, so no
/// concurrent `call` can observe a half-torn-down object.
pub struct ObjectHandle {
    handle: Handle,
    kind: ObjectKind,
    shared: Arc<BridgeShared>,
}

impl ObjectHandle {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Invoke a named method. Fails with `InvalidHandle` if this handle was
    /// disposed; the wire reference is re-materialized from registry state,
    /// never cached, so a stale wrapper can never reach freed memory.
    pub fn call(&self, method: &str, kwargs: KwargsMap) -> BridgeResult<WireValue> {
        let (kind, pointer) = self.shared.registry.resolve(self.handle)?;
        let request = MethodRequest {
            object: RawObjectRef { kind, pointer },
            method: method.to_string(),
            kwargs,
        };
        self.shared.dispatcher.call_method(&request)
    }

    /// Explicit disposal. Idempotent: a second call (or a later drop) is a
    /// no-op.
    pub fn dispose(&self) -> BridgeResult<()> {
        match self.shared.registry.invalidate(self.handle) {
            Some((kind, pointer)) => self
                .shared
                .dispatcher
                .dispose(RawObjectRef { kind, pointer }),
            None => Ok(()),
        }
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        // Host-side finalization: liveness is cleared exactly once whether
        // disposal was explicit or not.
        if let Some((kind, pointer)) = self.shared.registry.invalidate(self.handle) {
            if self.shared.config.dispose_on_drop {
                if let Err(err) = self
                    .shared
                    .dispatcher
                    .dispose(RawObjectRef { kind, pointer })
                {
                    tracing::warn!(handle = %self.handle, %err, "native dispose failed during finalization");
                }
            }
        }
    }
}

/// Convert a JSON object of scalars into an ordered kwargs bundle.
/// Entry order follows the JSON object's order.
pub fn kwargs_from_json(value: &serde_json::Value) -> BridgeResult<KwargsMap> {
    let object = value
        .as_object()
        .ok_or_else(|| BridgeError::malformed("kwargs must be a JSON object"))?;
    let mut kwargs = KwargsMap::new();
    for (key, value) in object {
        kwargs.push(key.clone(), wire_from_json(value)?);
    }
    Ok(kwargs)
}

pub fn wire_from_json(value: &serde_json::Value) -> BridgeResult<WireValue> {
    match value {
        serde_json::Value::Null => Ok(WireValue::Null),
        serde_json::Value::Bool(b) => Ok(WireValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(WireValue::Int(i))
            } else if let Some(x) = n.as_f64() {
                Ok(WireValue::Float(x))
            } else {
                Err(BridgeError::malformed(format!(
                    "number {} is not representable on the wire",
                    n
                )))
            }
        }
        serde_json::Value::String(s) => Ok(WireValue::Str(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(BridgeError::malformed(
            "nested arrays/objects are not wire scalars",
        )),
    }
}

/// Convert a kwargs bundle back to a JSON object. Object references are
/// deliberately unrepresentable - the application layer has no awareness of
/// handles.
pub fn kwargs_to_json(kwargs: &KwargsMap) -> BridgeResult<serde_json::Value> {
    let mut object = serde_json::Map::new();
    for entry in kwargs.iter() {
        object.insert(entry.key.clone(), wire_to_json(&entry.value)?);
    }
    Ok(serde_json::Value::Object(object))
}

pub fn wire_to_json(value: &WireValue) -> BridgeResult<serde_json::Value> {
    match value {
        WireValue::Null => Ok(serde_json::Value::Null),
        WireValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        WireValue::Int(i) => Ok(serde_json::Value::from(*i)),
        WireValue::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| BridgeError::malformed("non-finite float has no JSON form")),
        WireValue::Str(s) => Ok(serde_json::Value::String(s.clone())),
        WireValue::ObjectRef(reference) => Err(BridgeError::malformed(format!(
            "object reference (kind {}) cannot leave the bridge as JSON",
            reference.kind
        ))),
    }
}
