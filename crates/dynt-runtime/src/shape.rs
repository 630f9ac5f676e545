//! Object shapes.
//!
//! An object never owns its key-to-slot map; it points at a node in the
//! shape transition tree rooted at the empty shape. Two objects that add
//! the same keys in the same order end up sharing the identical shape
//! node, so a member lookup is one map probe and member storage stays a
//! dense array.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::trace;

use dynt_core::InternedStr;

use crate::globals::heap;

pub struct Shape {
    /// Number of member slots an object with this shape has.
    size: usize,
    /// Key to member-slot index, for every key reachable by this shape.
    members: HashMap<InternedStr, usize>,
    /// Key to successor shape, filled in as objects grow.
    children: RwLock<HashMap<InternedStr, &'static Shape>>,
}

impl Shape {
    /// The root shape with no members.
    pub fn empty() -> Self {
        Self { size: 0, members: HashMap::new(), children: RwLock::new(HashMap::new()) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slot index of `key`, if this shape has it.
    pub fn member_index(&self, key: InternedStr) -> Option<usize> {
        self.members.get(&key).copied()
    }

    /// The shape an object moves to when it adds `key`. Reuses an
    /// existing child so shapes are shared; otherwise allocates a new
    /// tree node whose slot for `key` is this shape's size.
    pub fn transition(&'static self, key: InternedStr) -> &'static Shape {
        if let Some(&child) = self.children.read().get(&key) {
            return child;
        }

        let mut children = self.children.write();
        // re-check: another transition may have added it between locks
        if let Some(&child) = children.get(&key) {
            return child;
        }

        let mut members = self.members.clone();
        members.insert(key, self.size);
        let child = heap().alloc(Shape {
            size: self.size + 1,
            members,
            children: RwLock::new(HashMap::new()),
        });
        children.insert(key, child);
        trace!(size = child.size, "shape transition");
        child
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape(size={})", self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::{empty_shape, init, intern_pool};

    #[test]
    fn empty_shape_has_no_members() {
        init();
        let empty = empty_shape();
        assert_eq!(empty.size(), 0);
        let x = intern_pool().intern("x");
        assert_eq!(empty.member_index(x), None);
    }

    #[test]
    fn same_insertion_order_shares_the_shape_node() {
        init();
        let x = intern_pool().intern("x");
        let y = intern_pool().intern("y");

        let a = empty_shape().transition(x).transition(y);
        let b = empty_shape().transition(x).transition(y);
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn different_insertion_order_diverges() {
        init();
        let x = intern_pool().intern("x");
        let y = intern_pool().intern("y");

        let xy = empty_shape().transition(x).transition(y);
        let yx = empty_shape().transition(y).transition(x);
        assert!(!std::ptr::eq(xy, yx));
        // both still map both keys, at swapped slots
        assert_eq!(xy.member_index(x), Some(0));
        assert_eq!(xy.member_index(y), Some(1));
        assert_eq!(yx.member_index(y), Some(0));
        assert_eq!(yx.member_index(x), Some(1));
    }

    #[test]
    fn transition_appends_the_next_slot() {
        init();
        let a = intern_pool().intern("a");
        let b = intern_pool().intern("b");
        let c = intern_pool().intern("c");

        let shape = empty_shape().transition(a).transition(b).transition(c);
        assert_eq!(shape.size(), 3);
        assert_eq!(shape.member_index(c), Some(2));
    }
}
