//! Storage allocation: give every live instruction a home.
//!
//! Unboxed scalars go on the data stack; anything that may hold a heap
//! reference goes on the pointer stack, which the collector scans. Slots
//! are handed out lowest-free-first in one forward walk and returned to
//! the pool at each value's last use, found by a prior reverse walk.
//!
//! `Arg` instructions are special twice over. Their slot is fixed by the
//! argument position: the low region of the pointer-stack frame doubles as
//! the outgoing argument array, so the callee finds its arguments in
//! place. And a call plus the `Arg`s feeding it form one interference
//! region: the call's last-use list carries the callee and every
//! argument's canonical index, so none of them can be freed while the
//! argument window is still being filled.
//!
//! Finalisation biases pointer-stack addresses past the argument region's
//! high-water mark and backpatches the frame-size immediates of
//! `Alloca`/`Popa`/`Palloca`/`Ppopa` in 8-byte words.

use tracing::trace;

use crate::ir::{Ir, Op, Storage, ValueKind};

/// At least this many words of the pointer frame are reserved as argument
/// and runtime scratch space even for leaf functions.
pub const MIN_ARG_WORDS: usize = 2;

/// Run last-use analysis and slot assignment over typed IR.
pub fn allocate_storage(ir: &mut Ir) {
    find_last_uses(ir);
    assign_slots(ir);
}

/// Reverse walk: the first time a canonical index is seen used, the using
/// instruction is its last use.
fn find_last_uses(ir: &mut Ir) {
    let len = ir.len();
    let mut noted = vec![false; len];
    // the call whose argument window the reverse walk is currently inside
    let mut pending_call: Option<usize> = None;

    for i in (0..len).rev() {
        let op = ir[i].op;

        if op == Op::Arg {
            // the argument value belongs to the call's interference region
            if let Some(call) = pending_call {
                let canon = ir.canonical(i);
                if !noted[canon] {
                    noted[canon] = true;
                    ir[call].last_used.push(canon);
                }
            }
            // the operand's last use stays on the Arg itself
            let mut last = ir[i].last_used.clone();
            note_use(ir, &mut noted, ir[i].left, &mut last);
            ir[i].last_used = last;
            continue;
        }

        let mut last = ir[i].last_used.clone();
        note_use(ir, &mut noted, ir[i].uidx, &mut last);
        note_use(ir, &mut noted, ir[i].left, &mut last);
        note_use(ir, &mut noted, ir[i].right, &mut last);
        note_use(ir, &mut noted, ir[i].third, &mut last);
        ir[i].last_used = last;

        if matches!(op, Op::Call | Op::IntrinsicCall) {
            pending_call = Some(i);
        }
    }
}

fn note_use(
    ir: &Ir,
    noted: &mut [bool],
    idx: usize,
    out: &mut smallvec::SmallVec<[usize; 4]>,
) {
    if idx == 0 {
        return;
    }
    let canon = ir.canonical(idx);
    if !noted[canon] {
        noted[canon] = true;
        out.push(canon);
    }
}

/// Forward walk handing out the lowest free slot per value, reusing slots
/// after their last use, then backpatching frame sizes.
fn assign_slots(ir: &mut Ir) {
    let len = ir.len();
    let mut data_free = SlotMap::new(len);
    let mut ptr_free = SlotMap::new(len);
    let mut arg_high = 0usize;

    for i in 0..len {
        if ir[i].op == Op::Arg {
            let addr = ir[i].imm as usize;
            ir[i].storage = Storage::Arg;
            ir[i].addr = addr;
            let canon = ir.canonical(i);
            ir[canon].storage = Storage::Arg;
            ir[canon].addr = addr;
            arg_high = arg_high.max(addr + 1);
            continue;
        }

        // markers and stores produce nothing
        if ir[i].rtype == ValueKind::Nil {
            continue;
        }

        let canon = ir.canonical(i);
        if ir[canon].storage != Storage::None {
            ir[i].storage = ir[canon].storage;
            ir[i].addr = ir[canon].addr;
        } else {
            let (storage, map) = if ir[canon].rtype.is_boxed() {
                (Storage::Pointer, &mut ptr_free)
            } else {
                (Storage::Data, &mut data_free)
            };
            let addr = map.take_lowest();
            ir[i].storage = storage;
            ir[i].addr = addr;
            ir[canon].storage = storage;
            ir[canon].addr = addr;
        }

        // return the slots of everything that died here
        for k in 0..ir[i].last_used.len() {
            let dead = ir[i].last_used[k];
            match ir[dead].storage {
                Storage::Pointer => ptr_free.release(ir[dead].addr),
                Storage::Data => data_free.release(ir[dead].addr),
                _ => {}
            }
        }
    }

    let arg_words = arg_high.max(MIN_ARG_WORDS);
    let data_words = data_free.high_water();
    let ptr_words = ptr_free.high_water() + arg_words;

    for i in 0..len {
        if ir[i].storage == Storage::Pointer {
            ir[i].addr += arg_words;
        }
        match ir[i].op {
            Op::Alloca | Op::Popa => ir[i].imm = data_words as i64,
            Op::Palloca | Op::Ppopa => ir[i].imm = ptr_words as i64,
            _ => {}
        }
    }

    trace!(data_words, ptr_words, arg_words, "allocated storage");
}

/// Lowest-free-first slot bitmap with a high-water mark.
struct SlotMap {
    used: Vec<bool>,
    high: usize,
}

impl SlotMap {
    fn new(capacity: usize) -> Self {
        Self { used: vec![false; capacity.max(1)], high: 0 }
    }

    fn take_lowest(&mut self) -> usize {
        let slot = self.used.iter().position(|&u| !u).unwrap_or_else(|| {
            self.used.push(false);
            self.used.len() - 1
        });
        self.used[slot] = true;
        self.high = self.high.max(slot + 1);
        slot
    }

    fn release(&mut self, slot: usize) {
        if slot < self.used.len() {
            self.used[slot] = false;
        }
    }

    fn high_water(&self) -> usize {
        self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_builder::build_ir;
    use crate::typeflow::flow_types;
    use dynt_syntax::{NodeKind, parse};
    use pretty_assertions::assert_eq;

    fn allocated_ir(src: &str) -> Ir {
        let top = parse(src.as_bytes()).expect("source should parse");
        let fun = top
            .children
            .iter()
            .find(|n| n.kind == NodeKind::FunDecl)
            .expect("a function");
        let mut ir = build_ir(fun).expect("ir should build");
        flow_types(&mut ir);
        allocate_storage(&mut ir);
        ir
    }

    #[test]
    fn args_sit_at_their_position() {
        let ir = allocated_ir("function f() { g(1, 2, 3); }");
        let args: Vec<_> = ir.iter().filter(|i| i.op == Op::Arg).collect();
        assert_eq!(args.len(), 4); // receiver + 3
        for (pos, arg) in args.iter().enumerate() {
            assert_eq!(arg.storage, Storage::Arg);
            assert_eq!(arg.addr, pos);
        }
    }

    #[test]
    fn frame_sizes_are_backpatched_symmetrically() {
        let ir = allocated_ir("function f() { var x; x = 1; return x + 2; }");
        let alloca = ir.iter().find(|i| i.op == Op::Alloca).unwrap();
        let popa = ir.iter().find(|i| i.op == Op::Popa).unwrap();
        assert_eq!(alloca.imm, popa.imm);
        let palloca = ir.iter().find(|i| i.op == Op::Palloca).unwrap();
        let ppopa = ir.iter().find(|i| i.op == Op::Ppopa).unwrap();
        assert_eq!(palloca.imm, ppopa.imm);
    }

    #[test]
    fn arg_scratch_is_always_reserved() {
        // leaf function, no calls: the pointer frame still carries the
        // two-word argument scratch region
        let ir = allocated_ir("function f() { var x; x = {}; }");
        let palloca = ir.iter().find(|i| i.op == Op::Palloca).unwrap();
        assert!(palloca.imm >= MIN_ARG_WORDS as i64);
    }

    #[test]
    fn pointer_slots_are_biased_past_the_arg_region() {
        let ir = allocated_ir("function f() { var o; o = {}; g(1, 2, 3); return o; }");
        // four arg slots (receiver + 3) beat the two-word minimum
        for insn in ir.iter() {
            if insn.storage == Storage::Pointer {
                assert!(insn.addr >= 4, "pointer slot {} inside arg region", insn.addr);
            }
        }
    }

    #[test]
    fn unboxed_results_go_on_the_data_stack() {
        let ir = allocated_ir("function f() { return 1 + 2; }");
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.storage, Storage::Data);
    }

    #[test]
    fn boxed_results_go_on_the_pointer_stack() {
        let ir = allocated_ir("function f(a) { return a + 1; }");
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.storage, Storage::Pointer);
    }

    #[test]
    fn unified_instructions_share_one_slot() {
        let ir = allocated_ir(
            "function f(a) { var x; if (a) { x = 1; } else { x = 2; } return x; }",
        );
        let assigns: Vec<_> = ir.iter().filter(|i| i.op == Op::Assign).collect();
        let unify = ir.iter().find(|i| i.op == Op::Unify).unwrap();
        assert_eq!(assigns.len(), 2);
        for assign in &assigns {
            assert_eq!(assign.storage, unify.storage);
            assert_eq!(assign.addr, unify.addr);
        }
    }

    #[test]
    fn dead_slots_are_reused() {
        // `1 + 2` dies feeding the first assign; the second expression can
        // reuse its data slot
        let ir = allocated_ir(
            "function f() { var x; var y; x = 1 + 2; y = 3 + 4; return y; }",
        );
        let adds: Vec<_> = ir.iter().filter(|i| i.op == Op::Add).collect();
        assert_eq!(adds.len(), 2);
        assert_eq!(adds[0].addr, adds[1].addr);
    }

    #[test]
    fn loop_carried_values_keep_their_slot() {
        let ir = allocated_ir(
            "function f() { var i; var s; i = 0; s = 0; \
             while (i < 5) { s = s + i; i = i + 1; } return s; }",
        );
        // every member of each unify class agrees on storage
        for idx in 0..ir.len() {
            let canon = ir.canonical(idx);
            if ir[idx].rtype != ValueKind::Nil && ir[canon].storage != Storage::None {
                assert_eq!(ir[idx].storage, ir[canon].storage);
                assert_eq!(ir[idx].addr, ir[canon].addr);
            }
        }
    }

    #[test]
    fn call_region_holds_callee_and_args() {
        let ir = allocated_ir("function f() { g(1, 2); }");
        let call_idx = ir.iter().position(|i| i.op == Op::Call).unwrap();
        let call = &ir[call_idx];
        // callee (the global member load) and the three arg values
        let member_idx = ir.iter().position(|i| i.op == Op::Member).unwrap();
        assert!(call.last_used.contains(&ir.canonical(member_idx)));
        let arg_canons: Vec<usize> = ir
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == Op::Arg)
            .map(|(idx, _)| ir.canonical(idx))
            .collect();
        for canon in arg_canons {
            assert!(call.last_used.contains(&canon));
        }
    }

    #[test]
    fn slot_map_hands_out_lowest_free() {
        let mut map = SlotMap::new(4);
        assert_eq!(map.take_lowest(), 0);
        assert_eq!(map.take_lowest(), 1);
        assert_eq!(map.take_lowest(), 2);
        map.release(1);
        assert_eq!(map.take_lowest(), 1);
        assert_eq!(map.take_lowest(), 3);
        assert_eq!(map.high_water(), 4);
    }
}
