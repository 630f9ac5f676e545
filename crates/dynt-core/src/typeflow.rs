//! Type propagation over the IR.
//!
//! Two passes. The unification pass collapses `Unify` chains into `uidx`
//! links: afterwards every instruction's `uidx` points toward the canonical
//! representative of its equivalence class. The flow pass then iterates
//! opcode-specific refinement rules to a fixed point, so that straight-line
//! integer arithmetic stays unboxed and only genuinely polymorphic values
//! degrade to `Boxed`.
//!
//! Operand kinds are read through the canonical walk, with one exception:
//! the `Unify` rule reads its operands' own annotations. Reading them
//! through the canonical walk would observe the unification's own kind and
//! make the rule vacuous; reading the operands directly is what lets a
//! join of two `Bool` conditions stay `Bool`.

use tracing::trace;

use crate::ir::{Ir, Op, ValueKind};

/// Run both passes.
pub fn flow_types(ir: &mut Ir) {
    unify_pass(ir);
    flow_pass(ir);
}

/// Seed every `uidx` with its own index, then point both operands of each
/// `Unify` at the unification. Processing in reverse order collapses
/// chains of unifications onto the final representative in a single pass,
/// because a `Unify`'s operands always precede it.
fn unify_pass(ir: &mut Ir) {
    for i in 0..ir.len() {
        ir[i].uidx = i;
    }

    for i in (0..ir.len()).rev() {
        if ir[i].op == Op::Unify {
            let canon = ir[i].uidx;
            let (left, right) = (ir[i].left, ir[i].right);
            ir[left].uidx = canon;
            ir[right].uidx = canon;
        }
    }
}

/// Iterate refinement rules until nothing changes.
///
/// Each rule writes the instruction's own annotation; readers elsewhere see
/// the class kind through the canonical walk. The iteration count is
/// bounded defensively; convergence is expected in a handful of rounds.
fn flow_pass(ir: &mut Ir) {
    let limit = 2 * ir.len() + 8;
    for round in 0..limit {
        let mut changed = false;

        for i in 0..ir.len() {
            let op = ir[i].op;
            let old = ir[i].rtype;

            let new = match op {
                // a move: same kind as what it moves
                Op::Assign => ir.kind_of(ir[i].left),
                // a member store produces the stored value
                Op::AssignMember => ir.kind_of(ir[i].right),
                Op::AssignIndex => ir.kind_of(ir[i].third),

                Op::Add => {
                    let l = ir.kind_of(ir[i].left);
                    let r = ir.kind_of(ir[i].right);
                    add_kind(l, r, old)
                }

                Op::Unify => {
                    let l = ir[ir[i].left].rtype;
                    let r = ir[ir[i].right].rtype;
                    unify_kind(l, r, old)
                }

                _ => continue,
            };

            if new != old {
                ir[i].rtype = new;
                changed = true;
            }
        }

        if !changed {
            trace!(rounds = round + 1, "type flow converged");
            return;
        }
    }
}

fn is_integral(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::Int | ValueKind::BoxedInt)
}

/// Result kind of `Add`: integer addition when both sides are integral,
/// string concatenation when either side is known to be non-numeric.
fn add_kind(l: ValueKind, r: ValueKind, current: ValueKind) -> ValueKind {
    if is_integral(l) && is_integral(r) {
        ValueKind::Int
    } else if l != ValueKind::Boxed && r != ValueKind::Boxed {
        // both kinds known, not both integers: concatenation
        ValueKind::String
    } else if (l == ValueKind::Boxed && r != ValueKind::Boxed && !is_integral(r))
        || (r == ValueKind::Boxed && l != ValueKind::Boxed && !is_integral(l))
    {
        // one side is known non-numeric, so the result must be a string
        ValueKind::String
    } else {
        current
    }
}

/// Result kind of a unification.
fn unify_kind(l: ValueKind, r: ValueKind, current: ValueKind) -> ValueKind {
    if l == r {
        l
    } else if (l == ValueKind::Bool && r == ValueKind::BoxedBool)
        || (l == ValueKind::BoxedBool && r == ValueKind::Bool)
    {
        ValueKind::BoxedBool
    } else if (l == ValueKind::Int && r == ValueKind::BoxedInt)
        || (l == ValueKind::BoxedInt && r == ValueKind::Int)
    {
        ValueKind::BoxedInt
    } else if l == ValueKind::Nil || r == ValueKind::Nil {
        current
    } else {
        ValueKind::Boxed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Insn;
    use crate::ir_builder::build_ir;
    use dynt_syntax::{NodeKind, parse};
    use pretty_assertions::assert_eq;

    fn typed_ir(src: &str) -> Ir {
        let top = parse(src.as_bytes()).expect("source should parse");
        let fun = top
            .children
            .iter()
            .find(|n| n.kind == NodeKind::FunDecl)
            .expect("a function");
        let mut ir = build_ir(fun).expect("ir should build");
        flow_types(&mut ir);
        ir
    }

    #[test]
    fn uidx_defaults_to_self() {
        let ir = typed_ir("function f() { return 1; }");
        for (i, insn) in ir.iter().enumerate() {
            if insn.op != Op::Unify {
                assert_eq!(insn.uidx, i);
            }
        }
    }

    #[test]
    fn unify_chains_collapse_to_the_last_representative() {
        // x diverges in two nested ifs, producing a unify of a unify
        let ir = typed_ir(
            "function f(a, b) { var x; \
             if (a) { x = 1; } else { x = 2; } \
             if (b) { x = 3; } \
             return x; }",
        );
        let unifies: Vec<usize> = ir
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == Op::Unify)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(unifies.len(), 2);
        let last = *unifies.last().unwrap();
        // the earlier unify and all assigns canonicalize to the last one
        assert_eq!(ir.canonical(unifies[0]), last);
        for (idx, insn) in ir.iter().enumerate() {
            if insn.op == Op::Assign {
                assert_eq!(ir.canonical(idx), last);
            }
        }
    }

    #[test]
    fn uidx_always_terminates_at_a_fixed_point() {
        let ir = typed_ir(
            "function f(a) { var x; while (a) { if (x) { x = 1; } else { x = 2; } } return x; }",
        );
        for i in 0..ir.len() {
            let c = ir.canonical(i);
            assert_eq!(ir.canonical(c), c);
            assert!(c >= i, "uidx walks forward");
        }
    }

    #[test]
    fn straight_line_int_add_stays_int() {
        let ir = typed_ir("function f() { return 1 + 2; }");
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.rtype, ValueKind::Int);
    }

    #[test]
    fn string_plus_int_is_string() {
        let ir = typed_ir(r#"function f() { return "a" + 1; }"#);
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.rtype, ValueKind::String);
    }

    #[test]
    fn add_of_unknown_stays_boxed() {
        let ir = typed_ir("function f(a) { return a + 1; }");
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.rtype, ValueKind::Boxed);
    }

    #[test]
    fn add_of_unknown_and_object_is_string() {
        let ir = typed_ir("function f(a) { return a + {}; }");
        let add = ir.iter().find(|i| i.op == Op::Add).unwrap();
        assert_eq!(add.rtype, ValueKind::String);
    }

    #[test]
    fn assign_adopts_the_kind_of_its_value() {
        let ir = typed_ir("function f() { var x; x = 5; return x; }");
        let assign = ir.iter().find(|i| i.op == Op::Assign).unwrap();
        assert_eq!(assign.rtype, ValueKind::Int);
    }

    #[test]
    fn matching_branch_kinds_unify_precisely() {
        let ir = typed_ir("function f(a) { var x; if (a) { x = 1; } else { x = 2; } return x; }");
        let unify = ir.iter().find(|i| i.op == Op::Unify).unwrap();
        assert_eq!(unify.rtype, ValueKind::Int);
    }

    #[test]
    fn mixed_branch_kinds_unify_to_boxed() {
        let ir =
            typed_ir(r#"function f(a) { var x; if (a) { x = 1; } else { x = "s"; } return x; }"#);
        let unify = ir.iter().find(|i| i.op == Op::Unify).unwrap();
        assert_eq!(unify.rtype, ValueKind::Boxed);
    }

    #[test]
    fn short_circuit_of_two_comparisons_stays_bool() {
        let ir = typed_ir("function f(a, b) { return a < 1 && b < 2; }");
        let unify = ir.iter().find(|i| i.op == Op::Unify).unwrap();
        assert_eq!(unify.rtype, ValueKind::Bool);
    }

    #[test]
    fn unify_rule_unit_cases() {
        use ValueKind::*;
        assert_eq!(unify_kind(Int, Int, Boxed), Int);
        assert_eq!(unify_kind(Bool, BoxedBool, Boxed), BoxedBool);
        assert_eq!(unify_kind(BoxedInt, Int, Boxed), BoxedInt);
        assert_eq!(unify_kind(Int, String, Boxed), Boxed);
        assert_eq!(unify_kind(Object, Function, Boxed), Boxed);
    }

    #[test]
    fn add_rule_unit_cases() {
        use ValueKind::*;
        assert_eq!(add_kind(Int, BoxedInt, Boxed), Int);
        assert_eq!(add_kind(String, String, Boxed), String);
        assert_eq!(add_kind(Bool, Int, Boxed), String);
        assert_eq!(add_kind(Boxed, String, Boxed), String);
        assert_eq!(add_kind(Boxed, Int, Boxed), Boxed);
        assert_eq!(add_kind(Boxed, Boxed, Boxed), Boxed);
    }

    #[test]
    fn flow_is_idempotent() {
        let mut ir = {
            let top = parse(
                "function f(a) { var s; var i; i = 0; s = 0; \
                 while (i < 5) { s = s + i; i = i + 1; } return s; }"
                    .as_bytes(),
            )
            .unwrap();
            let fun = top
                .children
                .iter()
                .find(|n| n.kind == NodeKind::FunDecl)
                .unwrap();
            build_ir(fun).unwrap()
        };
        flow_types(&mut ir);
        let kinds: Vec<ValueKind> = ir.iter().map(|i| i.rtype).collect();
        flow_pass(&mut ir);
        let kinds_again: Vec<ValueKind> = ir.iter().map(|i| i.rtype).collect();
        assert_eq!(kinds, kinds_again);
    }

    #[test]
    fn hand_built_unify_pass_links_operands() {
        let mut ir = Ir::new();
        ir.push(Insn::new(Op::Alloca));
        let a = ir.push(Insn::new(Op::Num).with_type(ValueKind::Int).with_imm(1));
        let b = ir.push(Insn::new(Op::Num).with_type(ValueKind::Int).with_imm(2));
        let u = ir.push(
            Insn::new(Op::Unify)
                .with_type(ValueKind::Boxed)
                .with_left(a)
                .with_right(b),
        );
        flow_types(&mut ir);
        assert_eq!(ir.canonical(a), u);
        assert_eq!(ir.canonical(b), u);
        assert_eq!(ir.kind_of(a), ValueKind::Int);
    }
}
