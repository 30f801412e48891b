//! genbridge - FFI call bridge between a managed host and a natively
//! compiled config-generator runtime.
//!
//! The host passes structured arguments across the process/runtime
//! boundary as flat byte buffers, receives results asynchronously, holds
//! opaque handles to long-lived native objects, and can cancel in-flight
//! native operations. Two memory models meet here - a garbage-collected
//! caller and an ownership-based callee - connected only by byte buffers
//! and integer tokens, so the layering is strict:
//!
//! - [`wire`] - binary message schemas and the deterministic codec
//! - [`registry`] - opaque handle table for native object instances
//! - [`dispatch`] - synchronous forward calls into the native runtime
//! - [`callback`] - pending async calls, cancellation, reverse delivery
//! - [`facade`] - the ergonomic layer the application consumes
//! - [`capi`] - `extern "C"` surface for embedding hosts
//! - [`infrastructure`] - logging setup

pub mod callback;
pub mod capi;
pub mod dispatch;
pub mod errors;
pub mod facade;
pub mod infrastructure;
pub mod registry;
pub mod wire;

pub use callback::{CallHandle, CallStatus, CallbackEvent, CallbackManager};
pub use dispatch::{Dispatcher, Failure, FunctionSelector, NativeTransport};
pub use errors::{BridgeError, BridgeResult};
pub use facade::{
    kwargs_from_json, kwargs_to_json, Bridge, BridgeConfig, ObjectHandle, ParseJob,
};
pub use registry::{Handle, HandleRegistry};
pub use wire::{
    CallId, ConstructorRequest, KwargsMap, MapEntry, MethodRequest, ObjectKind, RawObjectRef,
    WireValue,
};
