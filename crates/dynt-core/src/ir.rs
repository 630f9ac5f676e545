//! Intermediate representation for one compiled function.
//!
//! The IR is a flat, ordered instruction sequence in single-assignment
//! style: each instruction produces at most one value, and instructions
//! refer to earlier instructions by index (`left`, `right`, `third`).
//!
//! Variables that diverge across branches are merged with explicit
//! [`Op::Unify`] instructions instead of block-structured phi nodes. A
//! `Unify` forces its two operands to share one storage slot and one
//! refined result type; the `uidx` field on every instruction points
//! toward the canonical representative of its unification class.
//!
//! Control flow is expressed with paired markers resolved to code offsets
//! at emit time: `If`/`IfElse`/`IfEnd` and `While`/`WCond`/`WEnd`. These
//! are the only instructions whose operand index may refer forward.
//!
//! # Frame discipline
//!
//! Every function body is bracketed by `Alloca`/`Palloca` at the start and
//! `Ppopa`/`Popa` at the end. `Alloca` reserves the data-stack frame for
//! unboxed scalars; `Palloca` reserves the pointer-stack frame that the
//! garbage collector scans. The storage allocator backpatches their
//! immediates with the final frame sizes in 8-byte words.

use smallvec::SmallVec;
use strum_macros::{Display, EnumIter, FromRepr};

/// Runtime value kinds plus the meta-kinds that only occur as IR result
/// types.
///
/// `Nil` means "no value" (markers, stores). `Boxed` is heap-allocated with
/// a statically unknown kind. `BoxedUndefined` / `BoxedBool` / `BoxedInt`
/// are scalars that have been boxed but whose underlying kind is still
/// known, so the emitter can unbox them with a single load.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumIter, FromRepr,
)]
#[repr(u8)]
pub enum ValueKind {
    #[default]
    Nil,

    // unboxed (raw) data
    Undefined,
    Bool,
    Int,

    // boxed data
    Boxed,
    BoxedUndefined,
    BoxedBool,
    BoxedInt,
    String,
    Object,
    Function,
}

impl ValueKind {
    /// Whether values of this kind live in the heap and must be traced.
    #[inline]
    pub fn is_boxed(self) -> bool {
        self >= ValueKind::Boxed
    }

    /// The kind after boxing, for the scalar kinds that have a boxed twin.
    pub fn boxed(self) -> ValueKind {
        match self {
            ValueKind::Undefined => ValueKind::BoxedUndefined,
            ValueKind::Bool => ValueKind::BoxedBool,
            ValueKind::Int => ValueKind::BoxedInt,
            other => other,
        }
    }
}

/// IR opcodes: the lowered parse-tree operations plus IR-only bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
pub enum Op {
    /// Keeps its `left` operand live without generating code.
    Nop,
    /// Forces `left` and `right` into one storage slot and one type.
    Unify,
    /// Type-specialisation hook: coerce `left` to the kind in `imm`, or
    /// branch to the matching `SpeculateFail` on tag mismatch.
    Speculate,
    /// Landing label for a failed `Speculate`.
    SpeculateFail,

    // frame brackets
    Alloca,
    Palloca,
    Popa,
    Ppopa,

    // control-flow markers
    If,
    IfElse,
    IfEnd,
    While,
    WCond,
    WEnd,

    // values
    Nil,
    Param,
    Top,
    Num,
    Str,
    False,
    True,
    Obj,

    // data movement
    Assign,
    AssignMember,
    AssignIndex,
    Member,
    Index,
    Arg,

    // calls and return
    Call,
    IntrinsicCall,
    Return,

    // operators
    Not,
    Typeof,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Mod,
    Div,
}

/// Where the storage allocator placed an instruction's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum Storage {
    /// No slot assigned (markers, or results living in the return register).
    #[default]
    None,
    /// Data-stack slot: unboxed scalars, invisible to the collector.
    Data,
    /// Pointer-stack slot: scanned by the collector.
    Pointer,
    /// Argument slot in the low region of the pointer-stack frame.
    Arg,
}

/// One IR instruction.
///
/// `left`/`right`/`third` are indices of earlier instructions (0 doubles as
/// "absent": index 0 is always the `Alloca` bracket, which produces no
/// value). `imm` is an integer immediate; `name` is the pointer immediate
/// used for member keys, string lexemes and intrinsic names.
#[derive(Debug, Clone)]
pub struct Insn {
    pub op: Op,
    pub rtype: ValueKind,

    pub imm: i64,
    pub name: Option<Box<str>>,
    pub left: usize,
    pub right: usize,
    pub third: usize,

    // storage-allocator outputs
    pub storage: Storage,
    pub addr: usize,
    pub uidx: usize,
    pub last_used: SmallVec<[usize; 4]>,
}

impl Insn {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            rtype: ValueKind::Nil,
            imm: 0,
            name: None,
            left: 0,
            right: 0,
            third: 0,
            storage: Storage::None,
            addr: 0,
            uidx: 0,
            last_used: SmallVec::new(),
        }
    }

    pub fn with_type(mut self, rtype: ValueKind) -> Self {
        self.rtype = rtype;
        self
    }

    pub fn with_left(mut self, left: usize) -> Self {
        self.left = left;
        self
    }

    pub fn with_right(mut self, right: usize) -> Self {
        self.right = right;
        self
    }

    pub fn with_third(mut self, third: usize) -> Self {
        self.third = third;
        self
    }

    pub fn with_imm(mut self, imm: i64) -> Self {
        self.imm = imm;
        self
    }

    pub fn with_name(mut self, name: impl Into<Box<str>>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The ordered IR of one function.
#[derive(Debug, Default)]
pub struct Ir {
    insns: Vec<Insn>,
}

impl Ir {
    pub fn new() -> Self {
        Self { insns: Vec::new() }
    }

    /// Append an instruction, returning its index.
    pub fn push(&mut self, insn: Insn) -> usize {
        let idx = self.insns.len();
        self.insns.push(insn);
        idx
    }

    /// Index the next pushed instruction will get.
    #[inline]
    pub fn next_index(&self) -> usize {
        self.insns.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &Insn {
        &self.insns[idx]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut Insn {
        &mut self.insns[idx]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    /// Follow `uidx` links to the canonical representative of `idx`'s
    /// unification class. Terminates because links always point forward
    /// toward a fixed point.
    pub fn canonical(&self, idx: usize) -> usize {
        let mut cur = idx;
        while self.insns[cur].uidx != cur {
            cur = self.insns[cur].uidx;
        }
        cur
    }

    /// The refined result kind of `idx`, read through its canonical
    /// representative.
    #[inline]
    pub fn kind_of(&self, idx: usize) -> ValueKind {
        self.insns[self.canonical(idx)].rtype
    }
}

impl std::ops::Index<usize> for Ir {
    type Output = Insn;

    fn index(&self, idx: usize) -> &Insn {
        &self.insns[idx]
    }
}

impl std::ops::IndexMut<usize> for Ir {
    fn index_mut(&mut self, idx: usize) -> &mut Insn {
        &mut self.insns[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ordering_splits_boxed_from_unboxed() {
        assert!(!ValueKind::Nil.is_boxed());
        assert!(!ValueKind::Undefined.is_boxed());
        assert!(!ValueKind::Bool.is_boxed());
        assert!(!ValueKind::Int.is_boxed());
        assert!(ValueKind::Boxed.is_boxed());
        assert!(ValueKind::BoxedInt.is_boxed());
        assert!(ValueKind::String.is_boxed());
        assert!(ValueKind::Object.is_boxed());
        assert!(ValueKind::Function.is_boxed());
    }

    #[test]
    fn boxing_maps_scalars_to_their_boxed_twin() {
        assert_eq!(ValueKind::Int.boxed(), ValueKind::BoxedInt);
        assert_eq!(ValueKind::Bool.boxed(), ValueKind::BoxedBool);
        assert_eq!(ValueKind::Undefined.boxed(), ValueKind::BoxedUndefined);
        assert_eq!(ValueKind::String.boxed(), ValueKind::String);
    }

    #[test]
    fn canonical_follows_uidx_chains() {
        let mut ir = Ir::new();
        for i in 0..4 {
            let mut insn = Insn::new(Op::Nop);
            insn.uidx = i;
            ir.push(insn);
        }
        ir.get_mut(0).uidx = 2;
        ir.get_mut(2).uidx = 3;
        assert_eq!(ir.canonical(0), 3);
        assert_eq!(ir.canonical(1), 1);
        assert_eq!(ir.canonical(3), 3);
    }
}
