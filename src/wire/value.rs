//! Logical value model for the bridge wire protocol.
//!
//! Everything that crosses the boundary is built from these types: a tagged
//! scalar union, ordered key/value argument bundles, and opaque references
//! to native-side object instances.

use std::fmt;

/// Identifier for one asynchronous operation, carried in both directions of
/// the callback protocol. Always non-zero; zero on the wire is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    /// Wrap a raw wire value, rejecting the reserved zero.
    pub fn from_raw(raw: u64) -> Option<CallId> {
        if raw == 0 {
            None
        } else {
            Some(CallId(raw))
        }
    }

    /// Internal constructor for allocator-issued identifiers.
    pub(crate) fn from_raw_unchecked(raw: u64) -> CallId {
        debug_assert_ne!(raw, 0);
        CallId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical kind of a native object instance reachable through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Accumulates generated declarations across multiple calls.
    Collector,
    /// Builds composite type descriptions incrementally.
    TypeBuilder,
}

impl ObjectKind {
    /// Wire tag. Zero is reserved so zeroed buffers never decode as a kind.
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            ObjectKind::Collector => 1,
            ObjectKind::TypeBuilder => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<ObjectKind> {
        match tag {
            1 => Some(ObjectKind::Collector),
            2 => Some(ObjectKind::TypeBuilder),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Collector => "collector",
            ObjectKind::TypeBuilder => "type_builder",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to a native object: kind tag plus the native pointer value as
/// an opaque 64-bit integer. The pointer is only ever round-tripped; the
/// host must never interpret or manipulate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawObjectRef {
    pub kind: ObjectKind,
    pub pointer: u64,
}

/// The scalar union crossing the boundary. Exactly one variant is populated
/// and the wire tag is authoritative.
#[derive(Debug, Clone)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    ObjectRef(RawObjectRef),
}

// Floats compare by bit pattern so that codec round-trips are exact and a
// NaN payload still equals itself after decode.
impl PartialEq for WireValue {
    fn eq(&self, other: &WireValue) -> bool {
        match (self, other) {
            (WireValue::Null, WireValue::Null) => true,
            (WireValue::Bool(a), WireValue::Bool(b)) => a == b,
            (WireValue::Int(a), WireValue::Int(b)) => a == b,
            (WireValue::Float(a), WireValue::Float(b)) => a.to_bits() == b.to_bits(),
            (WireValue::Str(a), WireValue::Str(b)) => a == b,
            (WireValue::ObjectRef(a), WireValue::ObjectRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for WireValue {}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        WireValue::Float(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Str(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Str(v)
    }
}

impl From<RawObjectRef> for WireValue {
    fn from(v: RawObjectRef) -> Self {
        WireValue::ObjectRef(v)
    }
}

/// One named argument. Order within a [`KwargsMap`] is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub key: String,
    pub value: WireValue,
}

/// Ordered named-argument bundle for a native constructor or method call.
///
/// Key uniqueness is a caller contract; the wire format neither enforces
/// nor repairs duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KwargsMap {
    entries: Vec<MapEntry>,
}

impl KwargsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<WireValue>) {
        self.entries.push(MapEntry {
            key: key.into(),
            value: value.into(),
        });
    }

    /// First entry with the given key, if any.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.iter()
    }
}

impl FromIterator<(String, WireValue)> for KwargsMap {
    fn from_iter<I: IntoIterator<Item = (String, WireValue)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(key, value)| MapEntry { key, value })
            .collect();
        Self { entries }
    }
}

/// Request to construct a native object of the given kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorRequest {
    pub kind: ObjectKind,
    pub kwargs: KwargsMap,
}

/// Request to invoke a named method on an existing native object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    pub object: RawObjectRef,
    pub method: String,
    pub kwargs: KwargsMap,
}
