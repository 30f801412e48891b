//! Bridge error taxonomy.
//!
//! Codec and registry errors surface synchronously; asynchronous failures
//! arrive through the callback path and are translated into the same type
//! before they reach the awaiting caller.

use std::fmt;

use crate::wire::ObjectKind;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A buffer could not be decoded: truncated, trailing garbage, invalid
    /// UTF-8, or an unknown structural tag. Fatal to the current call only.
    MalformedMessage { detail: String },
    /// Unknown scalar-union tag. Never coerced to a default; version
    /// negotiation happens in the application layer, not here.
    UnsupportedValueKind { tag: u8 },
    /// A disposed or never-registered object handle was used. Caller bug.
    InvalidHandle { handle: u64 },
    /// The native side handed back a pointer that is already registered
    /// live. Registry/native desync; surfaced hard, never swallowed.
    DuplicateHandle { pointer: u64, kind: ObjectKind },
    /// The native runtime reported an error during a well-formed call.
    /// The diagnostic is relayed verbatim.
    Native { status: i32, message: String },
    /// Terminal outcome of a call whose cancellation was honored.
    Cancelled,
    /// The completion path was torn down before a terminal outcome arrived.
    Disconnected,
}

impl BridgeError {
    pub(crate) fn malformed(detail: impl Into<String>) -> BridgeError {
        BridgeError::MalformedMessage {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage { detail } => {
                write!(f, "malformed wire message: {}", detail)
            }
            Self::UnsupportedValueKind { tag } => {
                write!(f, "unsupported wire value tag: {:#04x}", tag)
            }
            Self::InvalidHandle { handle } => {
                write!(f, "invalid object handle: {}", handle)
            }
            Self::DuplicateHandle { pointer, kind } => {
                write!(
                    f,
                    "duplicate live handle for native pointer {:#x} (kind {})",
                    pointer, kind
                )
            }
            Self::Native { status, message } => {
                write!(f, "native runtime failure (status {}): {}", status, message)
            }
            Self::Cancelled => write!(f, "call cancelled"),
            Self::Disconnected => write!(f, "bridge disconnected before completion"),
        }
    }
}

impl std::error::Error for BridgeError {}
