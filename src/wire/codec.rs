//! Binary (de)serialization for the bridge message schemas.
//!
//! The layout is fixed and version-stable: single-byte tags, little-endian
//! `u32` lengths, little-endian 64-bit scalars, length-prefixed UTF-8
//! strings. Encoding the same logical value twice yields identical bytes,
//! so byte comparison is value comparison for the layers above.
//!
//! Decoding is strict: truncation, trailing bytes, invalid UTF-8, and
//! unknown structural tags all fail with `MalformedMessage`; an unknown
//! scalar-union tag fails with `UnsupportedValueKind`. Decode never
//! partially populates a result and never panics.

use crate::errors::{BridgeError, BridgeResult};
use crate::wire::value::{
    CallId, ConstructorRequest, KwargsMap, MethodRequest, ObjectKind, RawObjectRef, WireValue,
};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_OBJECT_REF: u8 = 5;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> BridgeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(BridgeError::malformed(format!(
                "truncated buffer while reading {} ({} bytes needed at offset {})",
                what, n, self.pos
            ))),
        }
    }

    fn u8(&mut self, what: &str) -> BridgeResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> BridgeResult<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u64(&mut self, what: &str) -> BridgeResult<u64> {
        let bytes = self.take(8, what)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn i64(&mut self, what: &str) -> BridgeResult<i64> {
        let bytes = self.take(8, what)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn f64(&mut self, what: &str) -> BridgeResult<f64> {
        let bytes = self.take(8, what)?;
        Ok(f64::from_bits(u64::from_le_bytes(bytes.try_into().unwrap())))
    }

    fn string(&mut self, what: &str) -> BridgeResult<String> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| BridgeError::malformed(format!("invalid UTF-8 in {}", what)))
    }

    /// Rejects trailing bytes after a complete top-level message.
    fn expect_end(&self) -> BridgeResult<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(BridgeError::malformed(format!(
                "{} trailing bytes after message",
                self.buf.len() - self.pos
            )))
        }
    }
}

fn write_object_ref(w: &mut Writer, r: RawObjectRef) {
    w.put_u8(r.kind.to_tag());
    w.put_u64(r.pointer);
}

fn read_object_ref(r: &mut Reader<'_>) -> BridgeResult<RawObjectRef> {
    let tag = r.u8("object kind tag")?;
    let kind = ObjectKind::from_tag(tag)
        .ok_or_else(|| BridgeError::malformed(format!("unknown object kind tag {:#04x}", tag)))?;
    let pointer = r.u64("object pointer")?;
    Ok(RawObjectRef { kind, pointer })
}

fn write_value(w: &mut Writer, v: &WireValue) {
    match v {
        WireValue::Null => w.put_u8(TAG_NULL),
        WireValue::Bool(b) => {
            w.put_u8(TAG_BOOL);
            w.put_u8(u8::from(*b));
        }
        WireValue::Int(i) => {
            w.put_u8(TAG_INT);
            w.put_i64(*i);
        }
        WireValue::Float(x) => {
            w.put_u8(TAG_FLOAT);
            w.put_f64(*x);
        }
        WireValue::Str(s) => {
            w.put_u8(TAG_STR);
            w.put_str(s);
        }
        WireValue::ObjectRef(r) => {
            w.put_u8(TAG_OBJECT_REF);
            write_object_ref(w, *r);
        }
    }
}

fn read_value(r: &mut Reader<'_>) -> BridgeResult<WireValue> {
    let tag = r.u8("value tag")?;
    match tag {
        TAG_NULL => Ok(WireValue::Null),
        TAG_BOOL => match r.u8("bool payload")? {
            0 => Ok(WireValue::Bool(false)),
            1 => Ok(WireValue::Bool(true)),
            other => Err(BridgeError::malformed(format!(
                "invalid bool payload {:#04x}",
                other
            ))),
        },
        TAG_INT => Ok(WireValue::Int(r.i64("int payload")?)),
        TAG_FLOAT => Ok(WireValue::Float(r.f64("float payload")?)),
        TAG_STR => Ok(WireValue::Str(r.string("string payload")?)),
        TAG_OBJECT_REF => Ok(WireValue::ObjectRef(read_object_ref(r)?)),
        tag => Err(BridgeError::UnsupportedValueKind { tag }),
    }
}

fn write_kwargs(w: &mut Writer, kwargs: &KwargsMap) {
    w.put_u32(kwargs.len() as u32);
    for entry in kwargs.iter() {
        w.put_str(&entry.key);
        write_value(w, &entry.value);
    }
}

fn read_kwargs(r: &mut Reader<'_>) -> BridgeResult<KwargsMap> {
    let count = r.u32("kwargs count")? as usize;
    let mut out = Vec::new();
    for _ in 0..count {
        let key = r.string("kwargs key")?;
        let value = read_value(r)?;
        out.push((key, value));
    }
    Ok(out.into_iter().collect::<KwargsMap>())
}

pub fn encode_value(v: &WireValue) -> Vec<u8> {
    let mut w = Writer::new();
    write_value(&mut w, v);
    w.finish()
}

pub fn decode_value(bytes: &[u8]) -> BridgeResult<WireValue> {
    let mut r = Reader::new(bytes);
    let value = read_value(&mut r)?;
    r.expect_end()?;
    Ok(value)
}

pub fn encode_kwargs(kwargs: &KwargsMap) -> Vec<u8> {
    let mut w = Writer::new();
    write_kwargs(&mut w, kwargs);
    w.finish()
}

pub fn decode_kwargs(bytes: &[u8]) -> BridgeResult<KwargsMap> {
    let mut r = Reader::new(bytes);
    let kwargs = read_kwargs(&mut r)?;
    r.expect_end()?;
    Ok(kwargs)
}

pub fn encode_object_ref(reference: RawObjectRef) -> Vec<u8> {
    let mut w = Writer::new();
    write_object_ref(&mut w, reference);
    w.finish()
}

pub fn decode_object_ref(bytes: &[u8]) -> BridgeResult<RawObjectRef> {
    let mut r = Reader::new(bytes);
    let reference = read_object_ref(&mut r)?;
    r.expect_end()?;
    Ok(reference)
}

pub fn encode_constructor_request(req: &ConstructorRequest) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u8(req.kind.to_tag());
    write_kwargs(&mut w, &req.kwargs);
    w.finish()
}

pub fn decode_constructor_request(bytes: &[u8]) -> BridgeResult<ConstructorRequest> {
    let mut r = Reader::new(bytes);
    let tag = r.u8("constructor kind tag")?;
    let kind = ObjectKind::from_tag(tag)
        .ok_or_else(|| BridgeError::malformed(format!("unknown object kind tag {:#04x}", tag)))?;
    let kwargs = read_kwargs(&mut r)?;
    r.expect_end()?;
    Ok(ConstructorRequest { kind, kwargs })
}

pub fn encode_method_request(req: &MethodRequest) -> Vec<u8> {
    let mut w = Writer::new();
    write_object_ref(&mut w, req.object);
    w.put_str(&req.method);
    write_kwargs(&mut w, &req.kwargs);
    w.finish()
}

pub fn decode_method_request(bytes: &[u8]) -> BridgeResult<MethodRequest> {
    let mut r = Reader::new(bytes);
    let object = read_object_ref(&mut r)?;
    let method = r.string("method name")?;
    let kwargs = read_kwargs(&mut r)?;
    r.expect_end()?;
    Ok(MethodRequest {
        object,
        method,
        kwargs,
    })
}

/// Envelope for an asynchronous submit: the caller-assigned call-ID
/// followed by the argument bundle.
pub fn encode_submit(call_id: CallId, kwargs: &KwargsMap) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u64(call_id.as_u64());
    write_kwargs(&mut w, kwargs);
    w.finish()
}

pub fn decode_submit(bytes: &[u8]) -> BridgeResult<(CallId, KwargsMap)> {
    let mut r = Reader::new(bytes);
    let raw = r.u64("call id")?;
    let call_id =
        CallId::from_raw(raw).ok_or_else(|| BridgeError::malformed("zero call id in submit"))?;
    let kwargs = read_kwargs(&mut r)?;
    r.expect_end()?;
    Ok((call_id, kwargs))
}

/// Envelope for a cancellation signal: just the call-ID.
pub fn encode_cancel(call_id: CallId) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u64(call_id.as_u64());
    w.finish()
}

pub fn decode_cancel(bytes: &[u8]) -> BridgeResult<CallId> {
    let mut r = Reader::new(bytes);
    let raw = r.u64("call id")?;
    let call_id =
        CallId::from_raw(raw).ok_or_else(|| BridgeError::malformed("zero call id in cancel"))?;
    r.expect_end()?;
    Ok(call_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_kwargs() -> KwargsMap {
        let mut kwargs = KwargsMap::new();
        kwargs.push("source", "amount: Int\n");
        kwargs.push("line", 42i64);
        kwargs.push("strict", true);
        kwargs
    }

    #[test]
    fn value_round_trips_every_variant() {
        let values = [
            WireValue::Null,
            WireValue::Bool(true),
            WireValue::Bool(false),
            WireValue::Int(-7),
            WireValue::Float(2.5),
            WireValue::Str("schema.conf".to_string()),
            WireValue::ObjectRef(RawObjectRef {
                kind: ObjectKind::Collector,
                pointer: 0xdead_beef,
            }),
        ];
        for value in values {
            let bytes = encode_value(&value);
            assert_eq!(decode_value(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn kwargs_round_trip_preserves_order() {
        let kwargs = sample_kwargs();
        let decoded = decode_kwargs(&encode_kwargs(&kwargs)).unwrap();
        let keys: Vec<_> = decoded.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["source", "line", "strict"]);
        assert_eq!(decoded, kwargs);
    }

    #[test]
    fn method_request_round_trip() {
        let req = MethodRequest {
            object: RawObjectRef {
                kind: ObjectKind::TypeBuilder,
                pointer: 0x10,
            },
            method: "add_field".to_string(),
            kwargs: sample_kwargs(),
        };
        let decoded = decode_method_request(&encode_method_request(&req)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn submit_envelope_round_trip() {
        let id = CallId::from_raw(9).unwrap();
        let (decoded_id, decoded_kwargs) =
            decode_submit(&encode_submit(id, &sample_kwargs())).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_kwargs, sample_kwargs());
    }

    #[test]
    fn zero_call_id_is_malformed() {
        let mut bytes = encode_cancel(CallId::from_raw(1).unwrap());
        bytes[..8].copy_from_slice(&0u64.to_le_bytes());
        assert!(matches!(
            decode_cancel(&bytes),
            Err(BridgeError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let bytes = encode_value(&WireValue::Str("truncate me".to_string()));
        for len in 0..bytes.len() {
            match decode_value(&bytes[..len]) {
                Err(BridgeError::MalformedMessage { .. }) => {}
                other => panic!("expected MalformedMessage for prefix {}, got {:?}", len, other),
            }
        }
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = encode_value(&WireValue::Int(1));
        bytes.push(0);
        assert!(matches!(
            decode_value(&bytes),
            Err(BridgeError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn unknown_value_tag_is_unsupported() {
        assert_eq!(
            decode_value(&[0x7f]),
            Err(BridgeError::UnsupportedValueKind { tag: 0x7f })
        );
    }

    #[test]
    fn unknown_object_kind_is_malformed() {
        let mut bytes = encode_object_ref(RawObjectRef {
            kind: ObjectKind::Collector,
            pointer: 1,
        });
        bytes[0] = 0xee;
        assert!(matches!(
            decode_object_ref(&bytes),
            Err(BridgeError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        // STR tag, length 1, invalid byte.
        let bytes = [TAG_STR, 1, 0, 0, 0, 0xff];
        assert!(matches!(
            decode_value(&bytes),
            Err(BridgeError::MalformedMessage { .. })
        ));
    }

    fn arb_wire_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            Just(WireValue::Null),
            any::<bool>().prop_map(WireValue::Bool),
            any::<i64>().prop_map(WireValue::Int),
            any::<f64>().prop_map(WireValue::Float),
            ".*".prop_map(WireValue::Str),
            ((1u8..=2), any::<u64>()).prop_map(|(tag, pointer)| {
                WireValue::ObjectRef(RawObjectRef {
                    kind: ObjectKind::from_tag(tag).unwrap(),
                    pointer,
                })
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_value_round_trip(value in arb_wire_value()) {
            let bytes = encode_value(&value);
            prop_assert_eq!(decode_value(&bytes).unwrap(), value);
        }

        #[test]
        fn prop_encoding_is_deterministic(value in arb_wire_value()) {
            prop_assert_eq!(encode_value(&value), encode_value(&value));
        }

        #[test]
        fn prop_kwargs_round_trip(pairs in proptest::collection::vec((".*", arb_wire_value()), 0..8)) {
            let kwargs: KwargsMap = pairs.into_iter().collect();
            let bytes = encode_kwargs(&kwargs);
            prop_assert_eq!(decode_kwargs(&bytes).unwrap(), kwargs);
        }
    }
}
