//! Synchronous call dispatcher.
//!
//! The dispatcher is the single forward path into the native runtime: it
//! hands a byte-buffer request across the boundary and receives either a
//! byte-buffer result or a raw failure. It owns no state between calls;
//! side effects happen inside the native runtime.

use std::fmt;
use std::sync::Arc;

use crate::errors::{BridgeError, BridgeResult};
use crate::wire::{
    self, CallId, ConstructorRequest, KwargsMap, MethodRequest, RawObjectRef, WireValue,
};

#[cfg(feature = "native")]
pub mod sys;

/// Forward entry points exposed by the native runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionSelector {
    GetVersion,
    ParseFunction,
    CancelCall,
    ConstructObject,
    CallMethod,
    DisposeObject,
}

impl FunctionSelector {
    /// Stable numeric code used on the C ABI.
    pub fn code(self) -> u32 {
        match self {
            FunctionSelector::GetVersion => 1,
            FunctionSelector::ParseFunction => 2,
            FunctionSelector::CancelCall => 3,
            FunctionSelector::ConstructObject => 4,
            FunctionSelector::CallMethod => 5,
            FunctionSelector::DisposeObject => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionSelector::GetVersion => "get_version",
            FunctionSelector::ParseFunction => "call_function_parse",
            FunctionSelector::CancelCall => "cancel_function_call",
            FunctionSelector::ConstructObject => "call_object_constructor",
            FunctionSelector::CallMethod => "call_object_method",
            FunctionSelector::DisposeObject => "dispose_object",
        }
    }
}

impl fmt::Display for FunctionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw error signal from the native side: a coarse status code plus an
/// optional diagnostic. The dispatcher relays the diagnostic verbatim and
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: i32,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)
    }
}

impl From<Failure> for BridgeError {
    fn from(failure: Failure) -> Self {
        BridgeError::Native {
            status: failure.status,
            message: failure.message,
        }
    }
}

/// The seam between the bridge and the native runtime.
///
/// Production builds forward to the linked native library (feature
/// `native`, [`sys::SystemTransport`]); tests supply in-process
/// implementations. Implementations must be callable from any thread and
/// are expected to return quickly - submit calls, not the long-running
/// operation itself.
pub trait NativeTransport: Send + Sync {
    fn invoke(&self, selector: FunctionSelector, request: &[u8]) -> Result<Vec<u8>, Failure>;
}

/// Stateless forwarding layer over a [`NativeTransport`], with typed
/// wrappers for each forward entry point.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn NativeTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn NativeTransport>) -> Self {
        Self { transport }
    }

    /// Blocking byte-buffer call into the native runtime.
    pub fn invoke(&self, selector: FunctionSelector, request: &[u8]) -> BridgeResult<Vec<u8>> {
        tracing::trace!(%selector, request_len = request.len(), "dispatching native call");
        match self.transport.invoke(selector, request) {
            Ok(reply) => Ok(reply),
            Err(failure) => {
                tracing::debug!(%selector, %failure, "native call failed");
                Err(failure.into())
            }
        }
    }

    /// `get_version() -> string`. The reply buffer is raw UTF-8.
    pub fn get_version(&self) -> BridgeResult<String> {
        let reply = self.invoke(FunctionSelector::GetVersion, &[])?;
        String::from_utf8(reply)
            .map_err(|_| BridgeError::malformed("invalid UTF-8 in version reply"))
    }

    /// Transmit an asynchronous parse request tagged with its call-ID.
    /// The reply is an acknowledgement only; the result arrives later
    /// through the reverse callback path.
    pub fn submit_parse(&self, call_id: CallId, kwargs: &KwargsMap) -> BridgeResult<()> {
        self.invoke(
            FunctionSelector::ParseFunction,
            &wire::encode_submit(call_id, kwargs),
        )?;
        Ok(())
    }

    /// Send a cancellation signal. The reply's first byte reports whether
    /// the native side still knew the call. Advisory either way.
    pub fn cancel(&self, call_id: CallId) -> BridgeResult<bool> {
        let reply = self.invoke(FunctionSelector::CancelCall, &wire::encode_cancel(call_id))?;
        match reply.first() {
            Some(&byte) => Ok(byte != 0),
            None => Err(BridgeError::malformed("empty cancel reply")),
        }
    }

    /// Synchronous constructor call; the reply is a raw object reference.
    pub fn construct(&self, request: &ConstructorRequest) -> BridgeResult<RawObjectRef> {
        let reply = self.invoke(
            FunctionSelector::ConstructObject,
            &wire::encode_constructor_request(request),
        )?;
        wire::decode_object_ref(&reply)
    }

    /// Synchronous method call; the reply is a single wire value.
    pub fn call_method(&self, request: &MethodRequest) -> BridgeResult<WireValue> {
        let reply = self.invoke(
            FunctionSelector::CallMethod,
            &wire::encode_method_request(request),
        )?;
        wire::decode_value(&reply)
    }

    /// Ask the native runtime to destroy the object behind a reference.
    pub fn dispose(&self, reference: RawObjectRef) -> BridgeResult<()> {
        self.invoke(
            FunctionSelector::DisposeObject,
            &wire::encode_object_ref(reference),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ObjectKind;
    use parking_lot::Mutex;

    /// Records invocations and replays scripted replies.
    struct ScriptedTransport {
        log: Mutex<Vec<FunctionSelector>>,
        reply: Mutex<Vec<Result<Vec<u8>, Failure>>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Vec<u8>, Failure>>) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                reply: Mutex::new(replies),
            }
        }
    }

    impl NativeTransport for ScriptedTransport {
        fn invoke(&self, selector: FunctionSelector, _request: &[u8]) -> Result<Vec<u8>, Failure> {
            self.log.lock().push(selector);
            self.reply.lock().remove(0)
        }
    }

    #[test]
    fn version_reply_decodes_utf8() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(b"0.26.1".to_vec())]));
        let dispatcher = Dispatcher::new(transport.clone());
        assert_eq!(dispatcher.get_version().unwrap(), "0.26.1");
        assert_eq!(transport.log.lock()[..], [FunctionSelector::GetVersion]);
    }

    #[test]
    fn failure_becomes_native_error_with_verbatim_diagnostic() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(Failure {
            status: 7,
            message: "parse stack exhausted".to_string(),
        })]));
        let dispatcher = Dispatcher::new(transport);
        let err = dispatcher.get_version().unwrap_err();
        assert_eq!(
            err,
            BridgeError::Native {
                status: 7,
                message: "parse stack exhausted".to_string(),
            }
        );
    }

    #[test]
    fn cancel_reply_byte_maps_to_bool() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(vec![1]), Ok(vec![0])]));
        let dispatcher = Dispatcher::new(transport);
        let id = CallId::from_raw(3).unwrap();
        assert!(dispatcher.cancel(id).unwrap());
        assert!(!dispatcher.cancel(id).unwrap());
    }

    #[test]
    fn construct_decodes_object_ref() {
        let reference = RawObjectRef {
            kind: ObjectKind::Collector,
            pointer: 0x40,
        };
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(wire::encode_object_ref(
            reference,
        ))]));
        let dispatcher = Dispatcher::new(transport);
        let request = ConstructorRequest {
            kind: ObjectKind::Collector,
            kwargs: KwargsMap::new(),
        };
        assert_eq!(dispatcher.construct(&request).unwrap(), reference);
    }
}
