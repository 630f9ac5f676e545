//! Native-code emitter: one forward walk over allocated IR.
//!
//! # Register convention
//!
//! RDI holds the pointer-stack top and is never clobbered by generated
//! code; every runtime call saves it to `[rbp-8]` and restores it after,
//! because the callee may move the collector. RSP/RBP are the ordinary
//! data-stack and frame pointers. A generated function receives
//! `(pointer-stack top, argc, argv)` in RDI/RSI/RDX and returns its boxed
//! result in RAX.
//!
//! `[rdi+0]` and `[rdi+8]` are pointer scratch (boxed temporaries live
//! there across runtime calls so the collector can see them); `[rbp-16]`
//! is non-pointer scratch and `[rbp-8]` is the RDI save slot. Outgoing
//! arguments are written to `[rdi+16+8i]`, the low region of the pointer
//! frame, which is exactly the argv array the callee receives.
//!
//! Operand loads go through the storage allocator's slot assignments;
//! boxing and unboxing are driven by the canonical result kinds the type
//! flow computed. The walk never reorders or patches code after the
//! fact, except for resolving forward-jump labels.

use std::collections::HashMap;

use dynt_core::{Ir, Op, Storage, ValueKind};
use dynt_error::{Error, Result};
use dynt_runtime::{globals, ops, value};
use tracing::debug;

use crate::asm::{Asm, Cc, Label, Mem, Operand, Reg, mem};

/// Addresses of the runtime routines emitted code calls.
mod rt {
    use dynt_runtime::abi;
    use dynt_runtime::value::Value;

    type V = Value;

    pub fn box_bool() -> usize {
        (abi::rt_box_bool as extern "C" fn(*mut V, i64) -> V) as usize
    }

    pub fn box_int() -> usize {
        (abi::rt_box_int as extern "C" fn(*mut V, i64) -> V) as usize
    }

    pub fn to_bool() -> usize {
        (abi::rt_to_bool as extern "C" fn(*mut V, V) -> i64) as usize
    }

    pub fn to_number() -> usize {
        (abi::rt_to_number as extern "C" fn(*mut V, V) -> i64) as usize
    }

    pub fn to_string() -> usize {
        (abi::rt_to_string as extern "C" fn(*mut V, V) -> V) as usize
    }

    pub fn add() -> usize {
        (abi::rt_add as extern "C" fn(*mut V, V, V) -> V) as usize
    }

    pub fn equal() -> usize {
        (abi::rt_equal as extern "C" fn(*mut V, V, V) -> i64) as usize
    }

    pub fn type_of() -> usize {
        (abi::rt_typeof as extern "C" fn(*mut V, V) -> V) as usize
    }

    pub fn assert_function() -> usize {
        (abi::rt_assert_function as extern "C" fn(*mut V, V) -> V) as usize
    }

    pub fn new_object() -> usize {
        (abi::rt_new_object as extern "C" fn(*mut V) -> V) as usize
    }

    pub fn object_get() -> usize {
        (abi::rt_object_get as extern "C" fn(*mut V, V, V) -> V) as usize
    }

    pub fn object_set() -> usize {
        (abi::rt_object_set as extern "C" fn(*mut V, V, V, V) -> V) as usize
    }

    pub fn call() -> usize {
        (abi::rt_call as extern "C" fn(*mut V, V, u64, *const V) -> V) as usize
    }

    pub fn speculate_fail() -> usize {
        (abi::rt_speculate_fail as extern "C" fn(*mut V) -> V) as usize
    }
}

/// Pointer scratch slot 0: `[rdi+0]`.
const P_SCRATCH0: Mem = Mem { base: Reg::Rdi, disp: 0 };
/// Pointer scratch slot 1: `[rdi+8]`.
const P_SCRATCH1: Mem = Mem { base: Reg::Rdi, disp: 8 };
/// Non-pointer scratch: `[rbp-16]`.
const F_SCRATCH: Mem = Mem { base: Reg::Rbp, disp: -16 };
/// RDI save slot across runtime calls: `[rbp-8]`.
const P_SAVE: Mem = Mem { base: Reg::Rbp, disp: -8 };

/// Emit native code for one function's allocated IR.
pub fn emit(ir: &Ir) -> Result<Vec<u8>> {
    let mut emitter = Emitter {
        ir,
        asm: Asm::new(),
        returns: Vec::new(),
        pending: HashMap::new(),
        loop_heads: HashMap::new(),
        last_arg: 0,
    };

    let mut failures: Vec<Error> = Vec::new();
    for i in 0..ir.len() {
        if let Err(err) = emitter.emit_insn(i) {
            // keep walking so one compile reports every bad instruction
            failures.push(err.with_context("index", i.to_string()));
        }
    }

    if let Some(first) = failures.into_iter().next() {
        return Err(first.with_operation("emitter::emit"));
    }

    debug!(insns = ir.len(), bytes = emitter.asm.len(), "emitted function");
    Ok(emitter.asm.into_bytes())
}

struct Emitter<'a> {
    ir: &'a Ir,
    asm: Asm,
    /// Forward jumps from every `Return` to the single epilogue.
    returns: Vec<Label>,
    /// Open forward jumps, keyed by the IR index that created them.
    pending: HashMap<usize, Label>,
    /// Code offsets of loop heads, keyed by the `While` marker's index.
    loop_heads: HashMap<usize, usize>,
    /// Position immediate of the most recent `Arg`.
    last_arg: i64,
}

impl<'a> Emitter<'a> {
    /// The memory (or register) home of instruction `i`'s result.
    fn target(&self, i: usize) -> Operand {
        let insn = &self.ir[i];
        match insn.storage {
            Storage::Data => mem(Reg::Rsp, (insn.addr * 8) as i32),
            Storage::Pointer | Storage::Arg => mem(Reg::Rdi, (insn.addr * 8 + 16) as i32),
            Storage::None => Operand::Reg(Reg::Rax),
        }
    }

    /// Load operand `idx` into `def`, returning its canonical kind.
    fn load(&mut self, idx: usize, def: Reg) -> ValueKind {
        let canon = self.ir.canonical(idx);
        let insn = &self.ir[canon];
        match insn.storage {
            Storage::Data => {
                self.asm.mov(Operand::Reg(def), mem(Reg::Rsp, (insn.addr * 8) as i32))
            }
            Storage::Pointer | Storage::Arg => self
                .asm
                .mov(Operand::Reg(def), mem(Reg::Rdi, (insn.addr * 8 + 16) as i32)),
            Storage::None => {}
        }
        insn.rtype
    }

    /// Call a runtime routine, keeping RDI (the pointer-stack top) safe.
    fn jcall(&mut self, addr: usize) {
        self.asm.mov(Operand::Mem(P_SAVE), Operand::Reg(Reg::Rdi));
        self.asm.mov_imm64(Reg::Rax, addr as u64);
        self.asm.call_reg(Reg::Rax);
        self.asm.mov(Operand::Reg(Reg::Rdi), Operand::Mem(P_SAVE));
    }

    /// Load a 64-bit immediate with the short form when it fits.
    fn mov_imm(&mut self, dst: Reg, v: i64) {
        if i32::try_from(v).is_ok() {
            self.asm.mov(Operand::Reg(dst), Operand::Imm(v));
        } else {
            self.asm.mov_imm64(dst, v as u64);
        }
    }

    /// `dst = *cell` for a fixed global cell address.
    fn load_cell(&mut self, cell_addr: usize, dst: Reg) {
        self.asm.mov_imm64(dst, cell_addr as u64);
        self.asm.mov(Operand::Reg(dst), mem(dst, 0));
    }

    /// Pin a runtime string constant and return its cell address.
    fn pin_string(&mut self, text: &str) -> usize {
        let cell = globals::heap().pin(value::box_str(text));
        cell as *const _ as usize
    }

    /// Box the value in `src` (of the given kind) into `target`.
    ///
    /// Already-boxed kinds just move. RAX and RSI are clobbered on the
    /// scalar paths, which call the runtime boxers.
    fn box_into(&mut self, kind: ValueKind, target: Operand, src: Reg) {
        match kind {
            ValueKind::Undefined | ValueKind::Nil => {
                self.load_cell(globals::undefined_cell_addr(), Reg::Rax);
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }
            ValueKind::Bool => {
                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(src));
                self.jcall(rt::box_bool());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }
            ValueKind::Int => {
                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(src));
                self.jcall(rt::box_int());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }
            _ => self.asm.mov(target, Operand::Reg(src)),
        }
    }

    /// Leave the boolean of operand `idx` in RAX as 0/1.
    fn coerce_bool(&mut self, idx: usize) {
        let kind = self.load(idx, Reg::Rax);
        match kind {
            ValueKind::Bool => {}
            ValueKind::BoxedBool => {
                self.asm.mov(Operand::Reg(Reg::Rax), mem(Reg::Rax, 8));
            }
            _ => {
                self.box_into(kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.jcall(rt::to_bool());
            }
        }
    }

    /// Leave the numeric value of operand `idx` in `[rbp-16]`.
    fn coerce_int_left(&mut self, idx: usize) {
        let kind = self.load(idx, Reg::Rax);
        match kind {
            ValueKind::BoxedInt => {
                self.asm.mov(Operand::Reg(Reg::Rax), mem(Reg::Rax, 8));
            }
            ValueKind::Int => {}
            _ => {
                self.box_into(kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.jcall(rt::to_number());
            }
        }
        self.asm.mov(Operand::Mem(F_SCRATCH), Operand::Reg(Reg::Rax));
    }

    /// Leave the numeric value of operand `idx` in RDX. Must run after
    /// `coerce_int_left`, whose result it leaves untouched.
    fn coerce_int_right(&mut self, idx: usize) {
        let kind = self.load(idx, Reg::Rdx);
        match kind {
            ValueKind::BoxedInt => {
                self.asm.mov(Operand::Reg(Reg::Rdx), mem(Reg::Rdx, 8));
            }
            ValueKind::Int => {}
            _ => {
                self.box_into(kind, Operand::Reg(Reg::Rsi), Reg::Rdx);
                self.jcall(rt::to_number());
                self.asm.mov(Operand::Reg(Reg::Rdx), Operand::Reg(Reg::Rax));
            }
        }
    }

    /// Take the open forward jump created by IR index `idx`.
    fn take_pending(&mut self, idx: usize) -> Result<Label> {
        self.pending.remove(&idx).ok_or_else(|| {
            Error::bad_marker(format!("no open jump for marker operand {}", idx))
        })
    }

    fn emit_insn(&mut self, i: usize) -> Result<()> {
        let ir = self.ir;
        let insn = &ir[i];
        let op = insn.op;
        let (left, right, third) = (insn.left, insn.right, insn.third);
        let imm = insn.imm;
        let target_kind = self.ir.kind_of(i);
        let target = self.target(i);

        match op {
            // ---- frame brackets ------------------------------------------
            Op::Alloca => {
                let words = even_words(imm);
                self.asm.push(Reg::Rbp);
                self.asm.mov(Operand::Reg(Reg::Rbp), Operand::Reg(Reg::Rsp));
                self.asm.sub(Operand::Reg(Reg::Rsp), Operand::Imm(words * 8));
            }

            Op::Popa => {
                let words = even_words(imm);
                self.asm.add(Operand::Reg(Reg::Rsp), Operand::Imm(words * 8));
                self.asm.pop(Reg::Rbp);
                self.asm.ret();
            }

            Op::Palloca => {
                // the whole frame starts out as valid references
                let bytes = imm * 8 + 16;
                self.asm.sub(Operand::Reg(Reg::Rdi), Operand::Imm(bytes));
                self.load_cell(globals::undefined_cell_addr(), Reg::Rax);
                for off in (0..bytes).step_by(8) {
                    self.asm.mov(mem(Reg::Rdi, off as i32), Operand::Reg(Reg::Rax));
                }
            }

            Op::Ppopa => {
                for label in std::mem::take(&mut self.returns) {
                    self.asm.patch(label);
                }
                let bytes = imm * 8 + 16;
                self.asm.add(Operand::Reg(Reg::Rdi), Operand::Imm(bytes));
            }

            // ---- parameters and values -----------------------------------
            Op::Param => {
                // the slot already holds undefined when the caller passed
                // fewer arguments
                self.asm.cmp(Operand::Reg(Reg::Rsi), Operand::Imm(imm));
                let missing = self.asm.jcc_forward(Cc::Le);
                self.asm
                    .mov(Operand::Reg(Reg::Rax), mem(Reg::Rdx, (imm * 8) as i32));
                self.asm.mov(target, Operand::Reg(Reg::Rax));
                self.asm.patch(missing);
            }

            Op::Nil => {
                self.load_cell(globals::undefined_cell_addr(), Reg::Rax);
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Top => {
                self.load_cell(globals::global_object_cell_addr(), Reg::Rax);
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Num => {
                if target_kind.is_boxed() {
                    self.mov_imm(Reg::Rsi, imm);
                    self.jcall(rt::box_int());
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                } else {
                    self.mov_imm(Reg::Rax, imm);
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }
            }

            Op::Str => {
                let lexeme = insn.name.as_deref().unwrap_or("\"\"");
                let string = ops::unquote(value::box_str(lexeme));
                let cell = globals::heap().pin(string);
                self.load_cell(cell as *const _ as usize, Reg::Rax);
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::False | Op::True => {
                if target_kind.is_boxed() {
                    let cell = if op == Op::True {
                        globals::true_cell_addr()
                    } else {
                        globals::false_cell_addr()
                    };
                    self.load_cell(cell, Reg::Rax);
                } else {
                    let raw = (op == Op::True) as i64;
                    self.asm.mov(Operand::Reg(Reg::Rax), Operand::Imm(raw));
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Obj => {
                self.jcall(rt::new_object());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            // ---- data movement -------------------------------------------
            Op::Assign => {
                let kind = self.load(left, Reg::Rax);
                if target_kind.is_boxed() {
                    self.box_into(kind, target, Reg::Rax);
                } else {
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }
            }

            Op::Member => {
                let kind = self.load(left, Reg::Rax);
                self.box_into(kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                let name = insn.name.as_deref().unwrap_or("");
                let cell = self.pin_string(name);
                self.load_cell(cell, Reg::Rdx);
                self.jcall(rt::object_get());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::AssignMember => {
                let obj_kind = self.load(left, Reg::Rax);
                self.box_into(obj_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.asm.mov(Operand::Mem(P_SCRATCH0), Operand::Reg(Reg::Rsi));

                let val_kind = self.load(right, Reg::Rax);
                self.box_into(val_kind, Operand::Reg(Reg::Rcx), Reg::Rax);

                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                let name = insn.name.as_deref().unwrap_or("");
                let cell = self.pin_string(name);
                self.load_cell(cell, Reg::Rdx);
                self.jcall(rt::object_set());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Index => {
                let obj_kind = self.load(left, Reg::Rax);
                self.box_into(obj_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.asm.mov(Operand::Mem(P_SCRATCH0), Operand::Reg(Reg::Rsi));

                let key_kind = self.load(right, Reg::Rax);
                self.box_into(key_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.jcall(rt::to_string());
                self.asm.mov(Operand::Reg(Reg::Rdx), Operand::Reg(Reg::Rax));
                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                self.jcall(rt::object_get());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::AssignIndex => {
                let obj_kind = self.load(left, Reg::Rax);
                self.box_into(obj_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.asm.mov(Operand::Mem(P_SCRATCH0), Operand::Reg(Reg::Rsi));

                let key_kind = self.load(right, Reg::Rax);
                self.box_into(key_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.jcall(rt::to_string());
                self.asm.mov(Operand::Mem(P_SCRATCH1), Operand::Reg(Reg::Rax));

                let val_kind = self.load(third, Reg::Rax);
                self.box_into(val_kind, Operand::Reg(Reg::Rcx), Reg::Rax);

                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                self.asm.mov(Operand::Reg(Reg::Rdx), Operand::Mem(P_SCRATCH1));
                self.jcall(rt::object_set());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            // ---- calls and return ----------------------------------------
            Op::Arg => {
                self.last_arg = imm;
                let kind = self.load(left, Reg::Rax);
                self.box_into(kind, target, Reg::Rax);
            }

            Op::Call => {
                let callee_kind = self.load(left, Reg::Rax);
                self.box_into(callee_kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.asm.mov(Operand::Mem(P_SCRATCH0), Operand::Reg(Reg::Rsi));
                self.jcall(rt::assert_function());

                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                self.asm
                    .mov(Operand::Reg(Reg::Rdx), Operand::Imm(self.last_arg + 1));
                self.asm.lea(Reg::Rcx, Mem { base: Reg::Rdi, disp: 16 });
                self.jcall(rt::call());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::IntrinsicCall => {
                let name = insn.name.as_deref().unwrap_or("");
                let native = dynt_runtime::call::resolve_intrinsic(name);
                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Imm(imm));
                self.asm.lea(Reg::Rdx, Mem { base: Reg::Rdi, disp: 16 });
                self.jcall(native as usize);
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Return => {
                let kind = self.load(left, Reg::Rax);
                self.box_into(kind, Operand::Reg(Reg::Rax), Reg::Rax);
                let label = self.asm.jmp_forward();
                self.returns.push(label);
            }

            // ---- control flow --------------------------------------------
            Op::If | Op::WCond => {
                self.coerce_bool(left);
                self.asm.cmp(Operand::Reg(Reg::Rax), Operand::Imm(0));
                let label = self.asm.jcc_forward(Cc::E);
                self.pending.insert(i, label);
            }

            Op::IfElse => {
                let end = self.asm.jmp_forward();
                let taken = self.take_pending(left)?;
                self.asm.patch(taken);
                self.pending.insert(i, end);
            }

            Op::IfEnd => {
                let end = self.take_pending(left)?;
                self.asm.patch(end);
            }

            Op::While => {
                self.loop_heads.insert(i, self.asm.len());
            }

            Op::WEnd => {
                let head = *self
                    .loop_heads
                    .get(&left)
                    .ok_or_else(|| Error::bad_marker("loop end without a head"))?;
                self.asm.jmp_backward(head);
                let exit = self.take_pending(right)?;
                self.asm.patch(exit);
            }

            // ---- operators -----------------------------------------------
            Op::Add => self.emit_add(i, target, target_kind),

            Op::Sub | Op::Mul => {
                self.coerce_int_left(left);
                self.coerce_int_right(right);
                self.asm.mov(Operand::Reg(Reg::Rax), Operand::Mem(F_SCRATCH));
                if op == Op::Sub {
                    self.asm.sub(Operand::Reg(Reg::Rax), Operand::Reg(Reg::Rdx));
                } else {
                    self.asm.imul(Reg::Rax, Operand::Reg(Reg::Rdx));
                }
                if target_kind.is_boxed() {
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_int());
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Div | Op::Mod => {
                self.coerce_int_left(left);
                self.coerce_int_right(right);
                // divisor out of RDX, which the divide widens into
                self.asm.mov(Operand::Reg(Reg::Rcx), Operand::Reg(Reg::Rdx));
                self.asm.mov(Operand::Reg(Reg::Rax), Operand::Mem(F_SCRATCH));
                self.asm.cqo();
                self.asm.idiv(Reg::Rcx);
                if op == Op::Mod {
                    self.asm.mov(Operand::Reg(Reg::Rax), Operand::Reg(Reg::Rdx));
                }
                if target_kind.is_boxed() {
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_int());
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Lt | Op::Gt | Op::Le | Op::Ge => {
                self.coerce_int_left(left);
                self.coerce_int_right(right);
                self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(F_SCRATCH));
                self.asm.mov(Operand::Reg(Reg::Rax), Operand::Imm(1));
                self.asm.cmp(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rdx));
                let cc = match op {
                    Op::Lt => Cc::L,
                    Op::Gt => Cc::G,
                    Op::Le => Cc::Le,
                    _ => Cc::Ge,
                };
                let holds = self.asm.jcc_forward(cc);
                self.asm.mov(Operand::Reg(Reg::Rax), Operand::Imm(0));
                self.asm.patch(holds);

                if target_kind.is_boxed() {
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_bool());
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Eq | Op::Ne => {
                let lk = self.ir.kind_of(left);
                let rk = self.ir.kind_of(right);
                let scalar = matches!(
                    lk,
                    ValueKind::Int | ValueKind::Bool | ValueKind::Undefined
                );

                if lk == rk && scalar {
                    self.load(left, Reg::Rsi);
                    self.load(right, Reg::Rdx);
                    self.asm.mov(Operand::Reg(Reg::Rax), Operand::Imm(1));
                    self.asm.cmp(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rdx));
                    let holds = self.asm.jcc_forward(Cc::E);
                    self.asm.mov(Operand::Reg(Reg::Rax), Operand::Imm(0));
                    self.asm.patch(holds);
                } else {
                    let l = self.load(left, Reg::Rax);
                    self.box_into(l, Operand::Mem(P_SCRATCH0), Reg::Rax);
                    let r = self.load(right, Reg::Rax);
                    self.box_into(r, Operand::Reg(Reg::Rdx), Reg::Rax);
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                    self.jcall(rt::equal());
                }

                if op == Op::Ne {
                    self.asm.xor(Operand::Reg(Reg::Rax), Operand::Imm(1));
                }
                if target_kind.is_boxed() {
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_bool());
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Not => {
                self.coerce_bool(left);
                self.asm.xor(Operand::Reg(Reg::Rax), Operand::Imm(1));
                if target_kind.is_boxed() {
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_bool());
                }
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            Op::Typeof => {
                let kind = self.load(left, Reg::Rax);
                self.box_into(kind, Operand::Reg(Reg::Rsi), Reg::Rax);
                self.jcall(rt::type_of());
                self.asm.mov(target, Operand::Reg(Reg::Rax));
            }

            // ---- speculation ---------------------------------------------
            Op::Speculate => self.emit_speculate(i, target)?,

            Op::SpeculateFail => {
                // nothing to land when the speculation resolved statically
                if let Some(fail) = self.pending.remove(&left) {
                    let skip = self.asm.jmp_forward();
                    self.asm.patch(fail);
                    self.jcall(rt::speculate_fail());
                    self.asm.patch(skip);
                }
            }

            Op::Nop | Op::Unify => {}
        }

        Ok(())
    }

    /// `Add` has fast paths keyed on the operand kind pair; everything
    /// else goes through the runtime's generic add.
    fn emit_add(&mut self, i: usize, target: Operand, target_kind: ValueKind) {
        let ir = self.ir;
        let insn = &ir[i];
        let (left, right) = (insn.left, insn.right);
        let lk = ir.kind_of(left);
        let rk = ir.kind_of(right);

        if lk == rk {
            match lk {
                ValueKind::Int => {
                    self.load(left, Reg::Rax);
                    self.load(right, Reg::Rdx);
                    if target_kind.is_boxed() {
                        self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                        self.asm.add(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rdx));
                        self.jcall(rt::box_int());
                    } else {
                        self.asm.add(Operand::Reg(Reg::Rax), Operand::Reg(Reg::Rdx));
                    }
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }

                ValueKind::BoxedInt => {
                    // the one boxed case worth unboxing inline
                    let tmp = if target_kind.is_boxed() { Reg::Rsi } else { Reg::Rax };
                    self.load(left, Reg::Rax);
                    self.load(right, Reg::Rdx);
                    self.asm.mov(Operand::Reg(tmp), mem(Reg::Rax, 8));
                    self.asm.add(Operand::Reg(tmp), mem(Reg::Rdx, 8));
                    if target_kind.is_boxed() {
                        self.jcall(rt::box_int());
                    }
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }

                ValueKind::Bool => {
                    // box both, then the generic add concatenates
                    self.load(left, Reg::Rax);
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_bool());
                    self.asm.mov(Operand::Mem(P_SCRATCH0), Operand::Reg(Reg::Rax));
                    self.load(right, Reg::Rax);
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Reg(Reg::Rax));
                    self.jcall(rt::box_bool());
                    self.asm.mov(Operand::Reg(Reg::Rdx), Operand::Reg(Reg::Rax));
                    self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
                    self.jcall(rt::add());
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }

                ValueKind::Undefined | ValueKind::Nil => {
                    self.load_cell(globals::undefined_cell_addr(), Reg::Rsi);
                    self.asm.mov(Operand::Reg(Reg::Rdx), Operand::Reg(Reg::Rsi));
                    self.jcall(rt::add());
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }

                _ => {
                    // same boxed kind: straight to the generic add
                    self.load(left, Reg::Rsi);
                    self.load(right, Reg::Rdx);
                    self.jcall(rt::add());
                    self.asm.mov(target, Operand::Reg(Reg::Rax));
                }
            }
            return;
        }

        // mixed kinds: box both sides and let the runtime sort it out
        let l = self.load(left, Reg::Rax);
        self.box_into(l, Operand::Mem(P_SCRATCH0), Reg::Rax);
        let r = self.load(right, Reg::Rax);
        self.box_into(r, Operand::Reg(Reg::Rdx), Reg::Rax);
        self.asm.mov(Operand::Reg(Reg::Rsi), Operand::Mem(P_SCRATCH0));
        self.jcall(rt::add());
        self.asm.mov(target, Operand::Reg(Reg::Rax));
    }

    /// Type speculation: trivial move, inline box/unbox, or a tag check
    /// branching to the paired `SpeculateFail`.
    fn emit_speculate(&mut self, i: usize, target: Operand) -> Result<()> {
        let ir = self.ir;
        let insn = &ir[i];
        let left = insn.left;
        let desired = ValueKind::from_repr(insn.imm as u8)
            .ok_or_else(|| Error::unsupported_op(format!("Speculate to kind {}", insn.imm)))?;
        let kind = self.load(left, Reg::Rax);

        if kind == desired {
            self.asm.mov(target, Operand::Reg(Reg::Rax));
        } else if !desired.is_boxed() && kind == desired.boxed() {
            if desired != ValueKind::Undefined {
                self.asm.mov(Operand::Reg(Reg::Rax), mem(Reg::Rax, 8));
            }
            self.asm.mov(target, Operand::Reg(Reg::Rax));
        } else if desired.is_boxed() && desired == kind.boxed() {
            self.box_into(kind, target, Reg::Rax);
        } else if !kind.is_boxed() {
            // statically wrong and not even boxed: always the slow path
            let fail = self.asm.jmp_forward();
            self.pending.insert(i, fail);
        } else {
            // runtime tag check against the expected kind
            self.asm.mov(Operand::Reg(Reg::Rcx), mem(Reg::Rax, 0));
            self.asm.mov(Operand::Reg(Reg::Rcx), mem(Reg::Rcx, 0));
            self.asm
                .cmp(Operand::Reg(Reg::Rcx), Operand::Imm(desired.boxed() as u8 as i64));
            let fail = self.asm.jcc_forward(Cc::Ne);
            self.pending.insert(i, fail);

            if !desired.is_boxed() && desired != ValueKind::Undefined {
                self.asm.mov(Operand::Reg(Reg::Rax), mem(Reg::Rax, 8));
            }
            self.asm.mov(target, Operand::Reg(Reg::Rax));
        }
        Ok(())
    }
}

/// Data-frame size in words: requested slots plus two scratch words,
/// rounded up to even so RSP stays 16-byte aligned at every call site.
fn even_words(slots: i64) -> i64 {
    let words = slots + 2;
    if words % 2 == 1 { words + 1 } else { words }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynt_core::compile_ir;
    use dynt_syntax::{NodeKind, parse};
    use pretty_assertions::assert_eq;

    fn emit_src(src: &str) -> Vec<u8> {
        dynt_runtime::init();
        let top = parse(src.as_bytes()).expect("source should parse");
        let fun = top
            .children
            .iter()
            .find(|n| n.kind == NodeKind::FunDecl)
            .expect("a function");
        let ir = compile_ir(fun).expect("ir should build");
        emit(&ir).expect("emission should succeed")
    }

    #[test]
    fn functions_open_with_the_standard_prologue() {
        let code = emit_src("function f() {}");
        // push rbp; mov rbp, rsp; sub rsp, imm32
        assert_eq!(code[0], 0x55);
        assert_eq!(&code[1..4], &[0x48, 0x89, 0xE5]);
        assert_eq!(&code[4..7], &[0x48, 0x81, 0xEC]);
    }

    #[test]
    fn functions_close_with_a_single_ret() {
        let code = emit_src("function f(a) { if (a) { return 1; } return 2; }");
        let rets = code.iter().filter(|&&b| b == 0xC3).count();
        // one epilogue ret; returns jump to it (0xC3 may appear inside
        // immediates, so only check the final byte and that it is unique
        // as an instruction by construction of the epilogue)
        assert_eq!(*code.last().unwrap(), 0xC3);
        assert!(rets >= 1);
    }

    #[test]
    fn data_frame_words_round_to_even() {
        assert_eq!(even_words(0), 2);
        assert_eq!(even_words(1), 4);
        assert_eq!(even_words(2), 4);
        assert_eq!(even_words(3), 6);
        assert_eq!(even_words(4), 6);
    }

    #[test]
    fn emission_covers_every_scenario_shape() {
        // shapes from the end-to-end scenarios, emitted without error
        for src in [
            "function main() { $print(1 + 2); }",
            r#"function main() { $print("a" + 1); }"#,
            "function main() { var i; var s; i = 0; s = 0; \
             while (i < 5) { s = s + i; i = i + 1; } $print(s); }",
            "function main() { var o; o = {}; o.x = 1; o.y = 2; $print(o.x + o.y); }",
            "function main() { $print(typeof 1); $print(typeof \"a\"); $print(typeof {}); }",
            "function fact(n) { if (n < 2) { return 1; } return n * fact(n - 1); }",
            "function f(a, b) { return a && b || !a; }",
            "function f(o, k) { o[k] = o[k] + 1; return o[k]; }",
            "function f(a) { return a == 1 != (a < 2); }",
            "function f(a) { return a % 3 / 2 - 1; }",
        ] {
            let code = emit_src(src);
            assert!(!code.is_empty(), "no code for {src}");
        }
    }

    #[test]
    fn while_loops_emit_a_backward_jump() {
        let code = emit_src("function f() { var i; i = 0; while (i < 3) { i = i + 1; } }");
        // at least one E9 with a negative rel32
        let mut found = false;
        for w in 0..code.len().saturating_sub(4) {
            if code[w] == 0xE9 {
                let rel = i32::from_le_bytes(code[w + 1..w + 5].try_into().unwrap());
                if rel < 0 {
                    found = true;
                }
            }
        }
        assert!(found, "no backward jump in loop body");
    }

    #[test]
    fn every_runtime_call_saves_and_restores_the_pointer_register() {
        let code = emit_src("function f(a) { return a + 1; }");
        // mov [rbp-8], rdi  precedes every call rax; count both
        let saves = count_pattern(&code, &[0x48, 0x89, 0x7D, 0xF8]);
        let restores = count_pattern(&code, &[0x48, 0x8B, 0x7D, 0xF8]);
        let calls = count_pattern(&code, &[0xFF, 0xD0]);
        assert_eq!(saves, calls);
        assert_eq!(restores, calls);
        assert!(calls >= 1);
    }

    fn count_pattern(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn speculation_ir(operand_kind: ValueKind, desired: ValueKind) -> Ir {
        use dynt_core::{Insn, allocate_storage, flow_types};

        let mut ir = Ir::new();
        ir.push(Insn::new(Op::Alloca));
        ir.push(Insn::new(Op::Palloca));
        let value = ir.push(Insn::new(Op::Param).with_type(operand_kind).with_imm(0));
        let spec = ir.push(
            Insn::new(Op::Speculate)
                .with_type(desired)
                .with_left(value)
                .with_imm(desired as u8 as i64),
        );
        ir.push(Insn::new(Op::SpeculateFail).with_left(spec));
        let ret = ir.push(Insn::new(Op::Nil).with_type(ValueKind::Undefined));
        ir.push(Insn::new(Op::Return).with_left(ret));
        ir.push(Insn::new(Op::Ppopa));
        ir.push(Insn::new(Op::Popa));
        flow_types(&mut ir);
        allocate_storage(&mut ir);
        ir
    }

    #[test]
    fn speculation_with_a_tag_check_emits_a_fail_path() {
        dynt_runtime::init();
        let ir = speculation_ir(ValueKind::Boxed, ValueKind::Int);
        let code = emit(&ir).expect("speculation should emit");
        // the fail path calls the runtime stub, so there is at least one
        // call and one conditional forward jump (0F 85 = jne rel32)
        assert!(count_pattern(&code, &[0xFF, 0xD0]) >= 1);
        assert!(count_pattern(&code, &[0x0F, 0x85]) >= 1);
    }

    #[test]
    fn statically_resolved_speculation_needs_no_fail_path() {
        dynt_runtime::init();
        // lifting an int to a boxed int never branches, and the orphaned
        // fail marker emits nothing
        let ir = speculation_ir(ValueKind::Int, ValueKind::BoxedInt);
        let unboxed = speculation_ir(ValueKind::BoxedInt, ValueKind::Int);
        for ir in [ir, unboxed] {
            let code = emit(&ir).expect("speculation should emit");
            assert!(!code.is_empty());
        }
    }
}
