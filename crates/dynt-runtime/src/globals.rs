//! Process-wide runtime state: the singletons, the empty shape, the
//! global object, the interner and the heap.
//!
//! [`init`] creates everything exactly once, before any compile; the rest
//! of the crate reaches the state through the lookup accessors. The
//! `*_cell_addr` accessors expose the fixed addresses of the cells
//! holding the singletons so the emitter can load them indirectly
//! (`movabs addr; mov reg, [reg]`), leaving a relocating collector free
//! to update the cells.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Once, OnceLock};

use dynt_core::InternPool;
use tracing::debug;

use crate::heap::Heap;
use crate::pstack;
use crate::shape::Shape;
use crate::value::{
    BoolVal, DESC_BOOL, DESC_OBJECT, DESC_UNDEFINED, Header, ObjectVal, UndefinedVal, Value,
};

static HEAP: OnceLock<&'static Heap> = OnceLock::new();
static INTERN: OnceLock<InternPool> = OnceLock::new();
static EMPTY_SHAPE: OnceLock<&'static Shape> = OnceLock::new();

static UNDEFINED_CELL: AtomicUsize = AtomicUsize::new(0);
static TRUE_CELL: AtomicUsize = AtomicUsize::new(0);
static FALSE_CELL: AtomicUsize = AtomicUsize::new(0);
static GLOBAL_OBJECT_CELL: AtomicUsize = AtomicUsize::new(0);

static INIT: Once = Once::new();

/// Initialise the runtime. Idempotent; must run before any compile.
pub fn init() {
    INIT.call_once(init_inner);
}

fn init_inner() {
    let heap: &'static Heap = Box::leak(Box::new(Heap::new()));
    HEAP.set(heap).ok();
    INTERN.set(InternPool::new()).ok();

    let undefined = heap.alloc(UndefinedVal { header: Header::new(&DESC_UNDEFINED) });
    UNDEFINED_CELL.store(&undefined.header as *const Header as usize, Ordering::Release);

    let false_val = heap.alloc(BoolVal { header: Header::new(&DESC_BOOL), value: 0 });
    FALSE_CELL.store(&false_val.header as *const Header as usize, Ordering::Release);
    let true_val = heap.alloc(BoolVal { header: Header::new(&DESC_BOOL), value: 1 });
    TRUE_CELL.store(&true_val.header as *const Header as usize, Ordering::Release);

    let empty = heap.alloc(Shape::empty());
    EMPTY_SHAPE.set(empty).ok();

    let global = heap.alloc(ObjectVal {
        header: Header::new(&DESC_OBJECT),
        shape: std::cell::Cell::new(empty),
        members: std::cell::RefCell::new(Vec::new()),
    });
    GLOBAL_OBJECT_CELL.store(&global.header as *const Header as usize, Ordering::Release);

    pstack::init_pstack();

    debug!("runtime initialised");
}

/// The process heap.
pub fn heap() -> &'static Heap {
    HEAP.get().expect("runtime not initialised")
}

/// The shared member-name and identifier interner.
pub fn intern_pool() -> &'static InternPool {
    INTERN.get().expect("runtime not initialised")
}

/// The root of the shape transition tree.
pub fn empty_shape() -> &'static Shape {
    EMPTY_SHAPE.get().expect("runtime not initialised")
}

/// The `undefined` singleton.
pub fn undefined() -> Value {
    Value(UNDEFINED_CELL.load(Ordering::Acquire) as *const Header)
}

/// One of the two boolean singletons.
pub fn boolean(value: bool) -> Value {
    let cell = if value { &TRUE_CELL } else { &FALSE_CELL };
    Value(cell.load(Ordering::Acquire) as *const Header)
}

/// The process-lifetime global object.
pub fn global_object() -> Value {
    Value(GLOBAL_OBJECT_CELL.load(Ordering::Acquire) as *const Header)
}

/// Fixed cell addresses for the emitter.
pub fn undefined_cell_addr() -> usize {
    UNDEFINED_CELL.as_ptr() as usize
}

pub fn true_cell_addr() -> usize {
    TRUE_CELL.as_ptr() as usize
}

pub fn false_cell_addr() -> usize {
    FALSE_CELL.as_ptr() as usize
}

pub fn global_object_cell_addr() -> usize {
    GLOBAL_OBJECT_CELL.as_ptr() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynt_core::ValueKind;

    #[test]
    fn init_is_idempotent() {
        init();
        let u1 = undefined();
        init();
        assert!(u1.same(undefined()));
    }

    #[test]
    fn singletons_have_their_kinds() {
        init();
        assert_eq!(undefined().kind(), ValueKind::BoxedUndefined);
        assert_eq!(boolean(true).kind(), ValueKind::BoxedBool);
        assert_eq!(boolean(false).kind(), ValueKind::BoxedBool);
        assert_eq!(global_object().kind(), ValueKind::Object);
    }

    #[test]
    fn emitter_cells_deref_to_the_singletons() {
        init();
        let cell = undefined_cell_addr() as *const usize;
        let loaded = unsafe { *cell };
        assert_eq!(loaded, undefined().0 as usize);

        let cell = global_object_cell_addr() as *const usize;
        let loaded = unsafe { *cell };
        assert_eq!(loaded, global_object().0 as usize);
    }

    #[test]
    fn global_object_starts_with_the_empty_shape() {
        init();
        let global = global_object().as_object().expect("an object");
        assert_eq!(global.shape.get().size(), global.members.borrow().len());
    }
}
