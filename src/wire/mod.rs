//! Wire protocol: logical value model plus the binary codec.

pub mod codec;
mod value;

pub use codec::{
    decode_cancel, decode_constructor_request, decode_kwargs, decode_method_request,
    decode_object_ref, decode_submit, decode_value, encode_cancel, encode_constructor_request,
    encode_kwargs, encode_method_request, encode_object_ref, encode_submit, encode_value,
};
pub use value::{
    CallId, ConstructorRequest, KwargsMap, MapEntry, MethodRequest, ObjectKind, RawObjectRef,
    WireValue,
};
