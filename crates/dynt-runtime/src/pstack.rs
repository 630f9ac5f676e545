//! The GC-scanned pointer stack.
//!
//! A process-wide `mmap`ed region of value words, growing downward. The
//! current top is published in a static cell: generated code keeps it in
//! a dedicated register and hands it to every runtime routine as the
//! first argument; each runtime routine republishes it here so a
//! collector triggered by allocation sees the full stack.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::value::Value;

/// Size of the pointer-stack region in value words.
pub const PSTACK_WORDS: usize = 1 << 20;

static BASE: AtomicUsize = AtomicUsize::new(0);
static TOP: AtomicUsize = AtomicUsize::new(0);

/// Map the region and set the initial top one past its end.
pub(crate) fn init_pstack() {
    let bytes = PSTACK_WORDS * std::mem::size_of::<Value>();
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        crate::fatal("cannot map the pointer stack");
    }
    BASE.store(base as usize, Ordering::Release);
    TOP.store(base as usize + bytes, Ordering::Release);
}

/// Publish a new top. Runtime routines call this on entry with their
/// first argument; a null top (runtime-internal callers) keeps the
/// current published value.
#[inline]
pub fn publish(top: *mut Value) {
    if !top.is_null() {
        TOP.store(top as usize, Ordering::Relaxed);
    }
}

/// The current published top.
#[inline]
pub fn top() -> *mut Value {
    TOP.load(Ordering::Relaxed) as *mut Value
}

/// Base of the mapped region (diagnostics and bounds checks).
pub fn base() -> *mut Value {
    BASE.load(Ordering::Relaxed) as *mut Value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_publishes_a_full_region() {
        crate::globals::init();
        let base = base() as usize;
        let top = top() as usize;
        assert!(base != 0);
        assert!(top >= base);
        assert!(top <= base + PSTACK_WORDS * std::mem::size_of::<Value>());
    }

    #[test]
    fn null_publish_keeps_the_current_top() {
        crate::globals::init();
        let before = top();
        publish(std::ptr::null_mut());
        assert_eq!(top(), before);
    }
}
