//! Production transport over the linked native runtime.
//!
//! Enabled with the `native` feature so that the default build and test
//! suite link without the native library. Buffer ownership follows the
//! runtime's convention: every buffer it returns must be handed back
//! through `gbr_native_release` once copied.

use super::{Failure, FunctionSelector, NativeTransport};

extern "C" {
    /// Returns 0 on success. On success `out`/`out_len` describe the reply
    /// buffer; otherwise `err`/`err_len` describe a UTF-8 diagnostic. Both
    /// buffers are owned by the runtime until released.
    fn gbr_native_invoke(
        selector: u32,
        request: *const u8,
        request_len: usize,
        out: *mut *mut u8,
        out_len: *mut usize,
        err: *mut *mut u8,
        err_len: *mut usize,
    ) -> i32;

    fn gbr_native_release(ptr: *mut u8, len: usize);
}

unsafe fn copy_and_release(ptr: *mut u8, len: usize) -> Vec<u8> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    let copy = std::slice::from_raw_parts(ptr, len).to_vec();
    gbr_native_release(ptr, len);
    copy
}

/// Transport calling straight into the linked native library.
pub struct SystemTransport;

impl NativeTransport for SystemTransport {
    fn invoke(&self, selector: FunctionSelector, request: &[u8]) -> Result<Vec<u8>, Failure> {
        let mut out: *mut u8 = std::ptr::null_mut();
        let mut out_len: usize = 0;
        let mut err: *mut u8 = std::ptr::null_mut();
        let mut err_len: usize = 0;

        let status = unsafe {
            gbr_native_invoke(
                selector.code(),
                request.as_ptr(),
                request.len(),
                &mut out,
                &mut out_len,
                &mut err,
                &mut err_len,
            )
        };

        if status == 0 {
            Ok(unsafe { copy_and_release(out, out_len) })
        } else {
            let diagnostic = unsafe { copy_and_release(err, err_len) };
            Err(Failure {
                status,
                message: String::from_utf8_lossy(&diagnostic).into_owned(),
            })
        }
    }
}
