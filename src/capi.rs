//! C entry points for embedding hosts.
//!
//! Design: minimal C-compatible surface - context lifecycle, logging init,
//! a version query, and the reverse callback entry the native runtime
//! invokes from its worker threads. Nothing here panics across the
//! boundary; every pointer is null-checked and failures are reported as
//! negative status codes.

use std::os::raw::c_char;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;

use crate::callback::CallbackEvent;
use crate::facade::Bridge;
use crate::infrastructure::{init_logging, LogConfig};
use crate::wire::CallId;

static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Opaque context handed to C callers. Owns the tokio runtime when the
/// context was created from C rather than wrapped around an existing
/// bridge.
pub struct BridgeHandle {
    _runtime: Option<tokio::runtime::Runtime>,
    bridge: Bridge,
    events: flume::Sender<CallbackEvent>,
}

impl BridgeHandle {
    /// Wrap an existing bridge (host already runs a tokio runtime).
    pub fn from_bridge(bridge: Bridge) -> Self {
        let events = bridge.event_sender();
        Self {
            _runtime: None,
            bridge,
            events,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Transfer ownership to C. Pair with [`genbridge_context_free`].
    pub fn into_raw(self) -> *mut BridgeHandle {
        Box::into_raw(Box::new(self))
    }
}

/// Initialize logging once. Safe to call repeatedly from any thread.
#[no_mangle]
pub extern "C" fn genbridge_init_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        *LOG_GUARD.lock() = init_logging(LogConfig::default());
    });
}

/// Create a context bound to the linked native runtime. Only available
/// when the crate is built with the `native` feature.
#[cfg(feature = "native")]
#[no_mangle]
pub extern "C" fn genbridge_context_new() -> *mut BridgeHandle {
    use crate::dispatch::sys::SystemTransport;
    use std::sync::Arc;

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(%err, "failed to build bridge runtime");
            return std::ptr::null_mut();
        }
    };
    let bridge = Bridge::new(
        Arc::new(SystemTransport),
        crate::facade::BridgeConfig::default(),
        runtime.handle(),
    );
    let events = bridge.event_sender();
    Box::into_raw(Box::new(BridgeHandle {
        _runtime: Some(runtime),
        bridge,
        events,
    }))
}

/// Destroy a context created by this library.
///
/// # Safety
///
/// `ctx` must be a pointer previously returned by [`genbridge_context_new`]
/// or [`BridgeHandle::into_raw`], and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn genbridge_context_free(ctx: *mut BridgeHandle) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Reverse entry point: the native runtime reports a call's terminal
/// outcome. `status` is 0 for success, 1 for a native error (payload is a
/// UTF-8 diagnostic), 2 for cancelled. Returns 0 when the event was
/// queued, -1 on invalid arguments, -2 when the event queue is full or
/// closed.
///
/// # Safety
///
/// `ctx` must be a live context pointer; `payload` must be valid for
/// `payload_len` bytes (null is allowed when `payload_len` is 0).
#[no_mangle]
pub unsafe extern "C" fn genbridge_callback_deliver(
    ctx: *const BridgeHandle,
    call_id: u64,
    status: i32,
    payload: *const u8,
    payload_len: usize,
) -> i32 {
    let Some(ctx) = ctx.as_ref() else {
        return -1;
    };
    let Some(call_id) = CallId::from_raw(call_id) else {
        return -1;
    };
    if payload.is_null() && payload_len > 0 {
        return -1;
    }

    let payload = if payload_len == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(payload, payload_len).to_vec()
    };
    let event = CallbackEvent {
        call_id,
        status,
        payload,
    };
    match ctx.events.try_send(event) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}

/// Copy the native runtime's version string (NUL-terminated) into `buf`.
/// Returns the full length excluding the terminator, or -1 on error. A
/// return value >= `cap` means the output was truncated.
///
/// # Safety
///
/// `ctx` must be a live context pointer; `buf` must be valid for `cap`
/// bytes (null is allowed when `cap` is 0).
#[no_mangle]
pub unsafe extern "C" fn genbridge_version(
    ctx: *const BridgeHandle,
    buf: *mut c_char,
    cap: usize,
) -> i32 {
    let Some(ctx) = ctx.as_ref() else {
        return -1;
    };
    let version = match ctx.bridge.version() {
        Ok(version) => version,
        Err(err) => {
            tracing::warn!(%err, "version query failed");
            return -1;
        }
    };

    if !buf.is_null() && cap > 0 {
        let bytes = version.as_bytes();
        let copy = bytes.len().min(cap - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, copy);
        *buf.add(copy) = 0;
    }
    version.len() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Failure, FunctionSelector, NativeTransport};
    use crate::wire::{self, KwargsMap, WireValue};
    use std::sync::Arc;

    struct VersionOnly;

    impl NativeTransport for VersionOnly {
        fn invoke(&self, selector: FunctionSelector, _request: &[u8]) -> Result<Vec<u8>, Failure> {
            match selector {
                FunctionSelector::GetVersion => Ok(b"9.9.9".to_vec()),
                _ => Ok(Vec::new()),
            }
        }
    }

    #[tokio::test]
    async fn deliver_through_c_entry_resolves_pending_call() {
        let bridge = Bridge::with_defaults(Arc::new(VersionOnly));
        let job = bridge.start_parse(KwargsMap::new()).unwrap();
        let id = job.id();
        let ctx = BridgeHandle::from_bridge(bridge).into_raw();

        let payload = wire::encode_value(&WireValue::Str("out".to_string()));
        let rc = unsafe { genbridge_callback_deliver(ctx, id.as_u64(), 0, payload.as_ptr(), payload.len()) };
        assert_eq!(rc, 0);
        assert_eq!(job.join().await.unwrap(), WireValue::Str("out".to_string()));

        unsafe { genbridge_context_free(ctx) };
    }

    #[tokio::test]
    async fn deliver_rejects_null_context_and_zero_id() {
        let rc = unsafe { genbridge_callback_deliver(std::ptr::null(), 1, 0, std::ptr::null(), 0) };
        assert_eq!(rc, -1);

        let bridge = Bridge::with_defaults(Arc::new(VersionOnly));
        let ctx = BridgeHandle::from_bridge(bridge).into_raw();
        let rc = unsafe { genbridge_callback_deliver(ctx, 0, 0, std::ptr::null(), 0) };
        assert_eq!(rc, -1);
        unsafe { genbridge_context_free(ctx) };
    }

    #[tokio::test]
    async fn version_copies_into_buffer() {
        let bridge = Bridge::with_defaults(Arc::new(VersionOnly));
        let ctx = BridgeHandle::from_bridge(bridge).into_raw();

        let mut buf = [0 as c_char; 16];
        let len = unsafe { genbridge_version(ctx, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(len, 5);
        let s = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(s.to_str().unwrap(), "9.9.9");

        unsafe { genbridge_context_free(ctx) };
    }
}
