//! Shared string interner for identifier and member-name keys.

use parking_lot::RwLock;
use std::sync::Arc;

use string_interner::StringInterner;
use string_interner::backend::DefaultBackend;
use string_interner::symbol::DefaultSymbol;

/// Interned string symbol backed by a `StringInterner`.
pub type InternedStr = DefaultSymbol;

/// Shared string interner used across the compiler core and the runtime.
///
/// Identifier names in the IR builder's environment and member-name keys in
/// object shapes both go through one of these pools, so equality is symbol
/// equality.
#[derive(Clone, Debug)]
pub struct InternPool {
    inner: Arc<RwLock<StringInterner<DefaultBackend>>>,
}

impl Default for InternPool {
    fn default() -> Self {
        Self::new()
    }
}

impl InternPool {
    /// Create a new shared interner pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StringInterner::new())),
        }
    }

    /// Intern the provided string slice and return its symbol.
    #[inline]
    pub fn intern<S>(&self, value: S) -> InternedStr
    where
        S: AsRef<str>,
    {
        self.inner.write().get_or_intern(value.as_ref())
    }

    /// Look up a symbol without interning.
    pub fn get<S>(&self, value: S) -> Option<InternedStr>
    where
        S: AsRef<str>,
    {
        self.inner.read().get(value.as_ref())
    }

    /// Resolve an interned symbol back into an owned string.
    pub fn resolve_owned(&self, symbol: InternedStr) -> Option<String> {
        self.inner.read().resolve(symbol).map(|s| s.to_owned())
    }

    /// Resolve an interned symbol and apply a closure while the borrow is active.
    pub fn with_resolved<R, F>(&self, symbol: InternedStr, f: F) -> Option<R>
    where
        F: FnOnce(&str) -> R,
    {
        self.inner.read().resolve(symbol).map(f)
    }

    /// Get the number of interned strings (for diagnostics).
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_stable_symbol() {
        let pool = InternPool::default();
        let first = pool.intern("foo");
        let second = pool.intern("foo");
        assert_eq!(
            first, second,
            "Interned symbols should be stable for the same string"
        );
    }

    #[test]
    fn resolve_owned_recovers_string() {
        let pool = InternPool::default();
        let sym = pool.intern("bar");
        let resolved = pool
            .resolve_owned(sym)
            .expect("symbol should resolve to a string");
        assert_eq!(resolved, "bar");
    }

    #[test]
    fn get_does_not_intern() {
        let pool = InternPool::default();
        assert!(pool.get("baz").is_none());
        let sym = pool.intern("baz");
        assert_eq!(pool.get("baz"), Some(sym));
    }

    #[test]
    fn with_resolved_provides_borrowed_str() {
        let pool = InternPool::default();
        let sym = pool.intern("qux");
        let length = pool
            .with_resolved(sym, |s| s.len())
            .expect("symbol should resolve to a closure result");
        assert_eq!(length, 3);
    }
}
