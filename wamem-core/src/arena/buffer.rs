//! Handing an arena to an embedding runtime as raw parts.
//!
//! The runtime receives `(data, len)` plus a C-ABI release callback and an
//! opaque context. The arena stays alive until the callback runs, which
//! must happen exactly once.

use super::Arena;
use crate::types::Address;
use std::ffi::c_void;
use std::sync::Arc;

/// Callback that drops the reference retained by [`RawBuffer::lend`].
pub type ReleaseFn = unsafe extern "C" fn(context: *mut c_void);

/// An arena lent out as raw parts.
#[repr(C)]
#[derive(Debug)]
#[must_use = "a lent buffer keeps its arena alive until released"]
pub struct RawBuffer {
    /// Start of the arena's usable memory.
    pub data: *mut u8,
    /// Usable bytes.
    pub len: usize,
    /// Drops the retained arena reference. Call once with `context`.
    pub release: ReleaseFn,
    /// Opaque argument for `release`.
    pub context: *mut c_void,
}

impl RawBuffer {
    /// Retain `arena` and expose it as raw parts.
    pub fn lend(arena: Arc<Arena>) -> Self {
        let data = arena.data().as_mut_ptr();
        let len = arena.size();
        tracing::debug!(arena = %arena.id(), data = %Address::from_ptr(data), len, "Lending arena");
        Self {
            data,
            len,
            release: release_arena,
            context: Arc::into_raw(arena).cast_mut().cast(),
        }
    }

    /// Release the retained reference from Rust.
    pub fn release(self) {
        // SAFETY: `self` is consumed, so the callback runs once for the
        // context it was paired with.
        unsafe { (self.release)(self.context) }
    }
}

/// Drop one strong reference to the [`Arena`] behind `context`.
///
/// # Safety
///
/// `context` must come from [`RawBuffer::lend`] and be released only once.
pub unsafe extern "C" fn release_arena(context: *mut c_void) {
    // SAFETY: produced by `Arc::into_raw` in `lend`.
    let arena = unsafe { Arc::from_raw(context.cast_const().cast::<Arena>()) };
    tracing::debug!(arena = %arena.id(), remaining = Arc::strong_count(&arena) - 1, "Released lent arena");
    drop(arena);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lend_keeps_arena_alive_until_release() {
        let arena = Arc::new(Arena::simple(100).unwrap());
        let weak = Arc::downgrade(&arena);
        let data = arena.data();

        let buffer = RawBuffer::lend(arena);
        assert_eq!(buffer.data, data.as_mut_ptr());
        assert_eq!(buffer.len, 100);
        assert!(weak.upgrade().is_some());

        unsafe { *buffer.data = 1 };
        buffer.release();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn callback_release_from_raw_parts() {
        let arena = Arc::new(Arena::simple(8).unwrap());
        let shared = Arc::clone(&arena);
        let buffer = RawBuffer::lend(shared);
        assert_eq!(Arc::strong_count(&arena), 2);

        let RawBuffer {
            release, context, ..
        } = buffer;
        unsafe { release(context) };
        assert_eq!(Arc::strong_count(&arena), 1);
    }
}
