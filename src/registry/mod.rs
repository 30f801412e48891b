//! Opaque handle registry for native object instances.
//!
//! The host never holds a dereferenceable native address: it holds a
//! registry-issued index, and [`HandleRegistry::resolve`] is the only path
//! from index to pointer. Use-after-free is ruled out by construction -
//! once a handle is invalidated, the registry answers `InvalidHandle`
//! forever, even if the native allocator later reuses the pointer
//! bit-pattern for an unrelated object.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::errors::{BridgeError, BridgeResult};
use crate::wire::{CallId, ObjectKind};

/// Opaque handle to a registered native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct HandleEntry {
    kind: ObjectKind,
    pointer: u64,
    live: bool,
    created_by: CallId,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: HashMap<u64, HandleEntry>,
    /// Reverse index over live entries only; enforces at most one live
    /// handle per native pointer.
    by_pointer: HashMap<u64, u64>,
    next: u64,
}

/// Shared table of live native object handles.
///
/// A single mutex guards both indexes; every critical section is short.
/// The registry owns only the handle-to-pointer mapping, never the
/// pointed-to memory.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    inner: Mutex<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new live entry for a native pointer.
    ///
    /// Fails with `DuplicateHandle` if the pointer is already registered
    /// live. That indicates native/registry desync and is surfaced hard.
    pub fn register(
        &self,
        kind: ObjectKind,
        pointer: u64,
        created_by: CallId,
    ) -> BridgeResult<Handle> {
        let mut inner = self.inner.lock();
        if inner.by_pointer.contains_key(&pointer) {
            tracing::error!(pointer, %kind, "duplicate live handle");
            return Err(BridgeError::DuplicateHandle { pointer, kind });
        }
        inner.next += 1;
        let handle = inner.next;
        inner.entries.insert(
            handle,
            HandleEntry {
                kind,
                pointer,
                live: true,
                created_by,
            },
        );
        inner.by_pointer.insert(pointer, handle);
        tracing::debug!(handle, %kind, %created_by, "registered native object");
        Ok(Handle(handle))
    }

    /// Look up a live handle. Dead or unknown handles fail with
    /// `InvalidHandle`.
    pub fn resolve(&self, handle: Handle) -> BridgeResult<(ObjectKind, u64)> {
        let inner = self.inner.lock();
        match inner.entries.get(&handle.0) {
            Some(entry) if entry.live => Ok((entry.kind, entry.pointer)),
            _ => Err(BridgeError::InvalidHandle { handle: handle.0 }),
        }
    }

    /// Clear liveness. Idempotent: invalidating a dead or unknown handle is
    /// a no-op returning `None`, because finalization races with explicit
    /// disposal are expected.
    ///
    /// Returns the `(kind, pointer)` pair when this call performed the
    /// transition, so the caller can issue the native destructor. The
    /// registry transition itself is synchronous and never waits on the
    /// native side.
    pub fn invalidate(&self, handle: Handle) -> Option<(ObjectKind, u64)> {
        let mut inner = self.inner.lock();
        let (kind, pointer) = match inner.entries.get_mut(&handle.0) {
            Some(entry) if entry.live => {
                entry.live = false;
                (entry.kind, entry.pointer)
            }
            _ => return None,
        };
        inner.by_pointer.remove(&pointer);
        tracing::debug!(handle = handle.0, %kind, "invalidated handle");
        Some((kind, pointer))
    }

    /// The call that created a handle, live or dead. Diagnostic surface.
    pub fn created_by(&self, handle: Handle) -> Option<CallId> {
        self.inner.lock().entries.get(&handle.0).map(|e| e.created_by)
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().by_pointer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_id(raw: u64) -> CallId {
        CallId::from_raw(raw).unwrap()
    }

    #[test]
    fn register_then_resolve() {
        let registry = HandleRegistry::new();
        let handle = registry
            .register(ObjectKind::Collector, 0x1000, call_id(1))
            .unwrap();
        assert_eq!(
            registry.resolve(handle).unwrap(),
            (ObjectKind::Collector, 0x1000)
        );
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.created_by(handle), Some(call_id(1)));
    }

    #[test]
    fn duplicate_live_pointer_is_rejected() {
        let registry = HandleRegistry::new();
        registry
            .register(ObjectKind::Collector, 0x1000, call_id(1))
            .unwrap();
        let err = registry
            .register(ObjectKind::TypeBuilder, 0x1000, call_id(2))
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::DuplicateHandle {
                pointer: 0x1000,
                kind: ObjectKind::TypeBuilder,
            }
        );
    }

    #[test]
    fn invalidate_is_idempotent() {
        let registry = HandleRegistry::new();
        let handle = registry
            .register(ObjectKind::Collector, 0x2000, call_id(1))
            .unwrap();
        assert_eq!(
            registry.invalidate(handle),
            Some((ObjectKind::Collector, 0x2000))
        );
        assert_eq!(registry.invalidate(handle), None);
        assert_eq!(
            registry.resolve(handle),
            Err(BridgeError::InvalidHandle {
                handle: handle.value()
            })
        );
    }

    #[test]
    fn pointer_reuse_does_not_revive_old_handle() {
        let registry = HandleRegistry::new();
        let first = registry
            .register(ObjectKind::Collector, 0x3000, call_id(1))
            .unwrap();
        registry.invalidate(first);

        // The native allocator hands the same address to a new object.
        let second = registry
            .register(ObjectKind::TypeBuilder, 0x3000, call_id(2))
            .unwrap();
        assert_ne!(first, second);
        assert!(registry.resolve(first).is_err());
        assert_eq!(
            registry.resolve(second).unwrap(),
            (ObjectKind::TypeBuilder, 0x3000)
        );
    }

    #[test]
    fn unknown_handle_is_invalid() {
        let registry = HandleRegistry::new();
        assert_eq!(
            registry.resolve(Handle(99)),
            Err(BridgeError::InvalidHandle { handle: 99 })
        );
        assert_eq!(registry.invalidate(Handle(99)), None);
    }
}
