//! IR builder: lower one function's parse tree into a flat IR sequence.
//!
//! The builder walks the tree recursively, appending instructions in
//! evaluation order and threading a mutable environment that maps each
//! local name to the IR index currently holding its latest value.
//!
//! Bindings are reference-counted boxes around the index. Cloning an
//! environment shares the boxes, so after two branches have been lowered a
//! name diverged iff its two environments hold *different* boxes
//! (`Rc::ptr_eq`); every diverged name gets a [`Op::Unify`] at the join and
//! is rebound to the unification's index.
//!
//! Names not found in the environment are globals: reads become a
//! `Top` + `Member` pair and writes become an `AssignMember` on the global
//! object.

use std::collections::HashMap;
use std::rc::Rc;

use dynt_error::{Error, Result};
use dynt_syntax::{Node, NodeKind};
use tracing::trace;

use crate::interner::{InternPool, InternedStr};
use crate::ir::{Insn, Ir, Op, ValueKind};

/// Build the IR for a `FunDecl` parse-tree node.
///
/// The output is ordered and never compacted or reordered afterwards; type
/// propagation and storage allocation annotate it in place.
pub fn build_ir(func: &Node) -> Result<Ir> {
    if func.kind != NodeKind::FunDecl {
        return Err(Error::bad_node(func.kind.to_string()).with_operation("ir_builder::build_ir"));
    }

    let mut builder = IrBuilder::new();
    let mut env = Env::default();
    builder.lower_fun_decl(func, &mut env)?;

    trace!(func = func.text(), insns = builder.ir.len(), "built ir");
    Ok(builder.ir)
}

/// A binding: the IR index holding a variable's latest value, wrapped so
/// environment copies can be compared by identity.
type Binding = Rc<usize>;

/// Block-local mapping from identifier to current definition.
#[derive(Default, Clone)]
struct Env {
    map: HashMap<InternedStr, Binding>,
}

impl Env {
    fn get(&self, name: InternedStr) -> Option<&Binding> {
        self.map.get(&name)
    }

    /// Rebind `name` to a fresh box around `idx`.
    fn bind(&mut self, name: InternedStr, idx: usize) {
        self.map.insert(name, Rc::new(idx));
    }

    fn share(&mut self, name: InternedStr, binding: Binding) {
        self.map.insert(name, binding);
    }
}

struct IrBuilder {
    ir: Ir,
    intern: InternPool,
}

impl IrBuilder {
    fn new() -> Self {
        Self { ir: Ir::new(), intern: InternPool::new() }
    }

    fn lower_fun_decl(&mut self, func: &Node, env: &mut Env) -> Result<()> {
        self.ir.push(Insn::new(Op::Alloca));
        self.ir.push(Insn::new(Op::Palloca));

        self.lower_params(&func.children[0], env);
        self.lower_list(&func.children[1], env)?;
        self.lower_list(&func.children[2], env)?;

        // implicit `return undefined` on the fall-through path
        let nil = self.ir.push(Insn::new(Op::Nil).with_type(ValueKind::Undefined));
        self.ir.push(Insn::new(Op::Return).with_left(nil));

        self.ir.push(Insn::new(Op::Ppopa));
        self.ir.push(Insn::new(Op::Popa));
        Ok(())
    }

    /// Parameters: a synthesised 0-th `this`, then one `Param` per declared
    /// name, each recording its positional index in `imm`.
    fn lower_params(&mut self, params: &Node, env: &mut Env) {
        let this = self.intern.intern("this");
        let idx = self
            .ir
            .push(Insn::new(Op::Param).with_type(ValueKind::Boxed).with_imm(0));
        env.bind(this, idx);

        for (pos, param) in params.children.iter().enumerate() {
            let name = self.intern.intern(param.text());
            let idx = self.ir.push(
                Insn::new(Op::Param)
                    .with_type(ValueKind::Boxed)
                    .with_imm(pos as i64 + 1),
            );
            env.bind(name, idx);
        }
    }

    fn lower_list(&mut self, list: &Node, env: &mut Env) -> Result<()> {
        for child in &list.children {
            self.lower_stmt(child, env)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, node: &Node, env: &mut Env) -> Result<()> {
        match node.kind {
            NodeKind::VarDecl => {
                let name = self.intern.intern(node.text());
                let idx = self.ir.push(Insn::new(Op::Nil).with_type(ValueKind::Undefined));
                env.bind(name, idx);
                Ok(())
            }

            NodeKind::If => self.lower_if(node, env),
            NodeKind::While => self.lower_while(node, env),

            NodeKind::Return => {
                let value = self.lower_expr(&node.children[0], env, None)?;
                self.ir.push(Insn::new(Op::Return).with_left(value));
                Ok(())
            }

            _ => {
                self.lower_expr(node, env, None)?;
                Ok(())
            }
        }
    }

    fn lower_if(&mut self, node: &Node, env: &mut Env) -> Result<()> {
        let cond = self.lower_expr(&node.children[0], env, None)?;

        // both arms start from the post-condition environment
        let else_env = env.clone();

        let if_idx = self.ir.push(Insn::new(Op::If).with_left(cond));
        self.lower_list(&node.children[1], env)?;

        let ifelse_idx = self.ir.push(Insn::new(Op::IfElse).with_left(if_idx));

        // the else arm mutates its own copy; `env` ends up holding it
        let then_env = std::mem::replace(env, else_env);
        if let Some(else_body) = node.child(2) {
            self.lower_list(else_body, env)?;
        }

        self.ir.push(Insn::new(Op::IfEnd).with_left(ifelse_idx));

        self.unify_envs(env, &then_env, false);
        Ok(())
    }

    fn lower_while(&mut self, node: &Node, env: &mut Env) -> Result<()> {
        self.ir.push(Insn::new(Op::While));
        let while_idx = self.ir.len() - 1;

        // loop-entry bindings, compared against the post-body state below
        let entry_env = env.clone();

        let cond = self.lower_expr(&node.children[0], env, None)?;
        let wcond_idx = self.ir.push(Insn::new(Op::WCond).with_left(cond));

        self.lower_list(&node.children[1], env)?;

        self.ir
            .push(Insn::new(Op::WEnd).with_left(while_idx).with_right(wcond_idx));

        self.unify_envs(env, &entry_env, true);
        Ok(())
    }

    /// Fold `secondary`'s bindings into `primary` after a join. Names whose
    /// boxes diverged get a `Unify`; names only in `secondary` are copied.
    ///
    /// In loop mode every loop-entry binding additionally gets a `Nop` so
    /// the allocator keeps it live across the back edge.
    fn unify_envs(&mut self, primary: &mut Env, secondary: &Env, loop_mode: bool) {
        // deterministic emission order regardless of hash iteration
        let mut names: Vec<(InternedStr, Binding)> = secondary
            .map
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        names.sort_by_key(|(name, _)| self.intern.resolve_owned(*name));

        for (name, sec_binding) in names {
            let diverged = primary
                .get(name)
                .map(|prim| (!Rc::ptr_eq(prim, &sec_binding)).then_some(**prim));

            match diverged {
                Some(Some(prim_idx)) => {
                    let unify = self.ir.push(
                        Insn::new(Op::Unify)
                            .with_type(ValueKind::Boxed)
                            .with_left(prim_idx)
                            .with_right(*sec_binding),
                    );
                    primary.bind(name, unify);
                }
                Some(None) => {}
                None => primary.share(name, sec_binding.clone()),
            }

            if loop_mode {
                self.ir.push(Insn::new(Op::Nop).with_left(*sec_binding));
            }
        }
    }

    /// Lower an expression, returning the IR index of its value.
    ///
    /// `recv_out` receives the receiver index when this expression is a
    /// member or index access; a call uses it as argument 0 (`this`).
    fn lower_expr(
        &mut self,
        node: &Node,
        env: &mut Env,
        recv_out: Option<&mut usize>,
    ) -> Result<usize> {
        match node.kind {
            NodeKind::Assign => self.lower_assign(node, env),

            NodeKind::VarRef => {
                let name = self.intern.intern(node.text());
                if let Some(binding) = env.get(name) {
                    return Ok(**binding);
                }
                // unknown name: read a member of the global object
                let top = self.ir.push(Insn::new(Op::Top).with_type(ValueKind::Object));
                Ok(self.ir.push(
                    Insn::new(Op::Member)
                        .with_type(ValueKind::Boxed)
                        .with_left(top)
                        .with_name(node.text()),
                ))
            }

            NodeKind::Member => {
                let obj = self.lower_expr(&node.children[0], env, None)?;
                if let Some(out) = recv_out {
                    *out = obj;
                }
                Ok(self.ir.push(
                    Insn::new(Op::Member)
                        .with_type(ValueKind::Boxed)
                        .with_left(obj)
                        .with_name(node.text()),
                ))
            }

            NodeKind::Index => {
                let obj = self.lower_expr(&node.children[0], env, None)?;
                if let Some(out) = recv_out {
                    *out = obj;
                }
                let key = self.lower_expr(&node.children[1], env, None)?;
                Ok(self.ir.push(
                    Insn::new(Op::Index)
                        .with_type(ValueKind::Boxed)
                        .with_left(obj)
                        .with_right(key),
                ))
            }

            NodeKind::Call => self.lower_call(node, env),
            NodeKind::IntrinsicCall => self.lower_intrinsic_call(node, env),

            NodeKind::Or | NodeKind::And => self.lower_short_circuit(node, env),

            NodeKind::Not | NodeKind::Typeof => {
                let operand = self.lower_expr(&node.children[0], env, None)?;
                let (op, rtype) = if node.kind == NodeKind::Not {
                    (Op::Not, ValueKind::Bool)
                } else {
                    (Op::Typeof, ValueKind::String)
                };
                Ok(self.ir.push(Insn::new(op).with_type(rtype).with_left(operand)))
            }

            NodeKind::Eq
            | NodeKind::Ne
            | NodeKind::Lt
            | NodeKind::Gt
            | NodeKind::Le
            | NodeKind::Ge => {
                let op = match node.kind {
                    NodeKind::Eq => Op::Eq,
                    NodeKind::Ne => Op::Ne,
                    NodeKind::Lt => Op::Lt,
                    NodeKind::Gt => Op::Gt,
                    NodeKind::Le => Op::Le,
                    _ => Op::Ge,
                };
                self.lower_binary(node, env, op, ValueKind::Bool)
            }

            NodeKind::Add => self.lower_binary(node, env, Op::Add, ValueKind::Boxed),

            NodeKind::Sub | NodeKind::Mul | NodeKind::Mod | NodeKind::Div => {
                let op = match node.kind {
                    NodeKind::Sub => Op::Sub,
                    NodeKind::Mul => Op::Mul,
                    NodeKind::Mod => Op::Mod,
                    _ => Op::Div,
                };
                self.lower_binary(node, env, op, ValueKind::Int)
            }

            NodeKind::Num => {
                let value = parse_int(node.text());
                Ok(self
                    .ir
                    .push(Insn::new(Op::Num).with_type(ValueKind::Int).with_imm(value)))
            }

            NodeKind::Str => Ok(self.ir.push(
                Insn::new(Op::Str)
                    .with_type(ValueKind::String)
                    .with_name(node.text()),
            )),

            NodeKind::False => Ok(self.ir.push(Insn::new(Op::False).with_type(ValueKind::Bool))),
            NodeKind::True => Ok(self.ir.push(Insn::new(Op::True).with_type(ValueKind::Bool))),
            NodeKind::Obj => Ok(self.ir.push(Insn::new(Op::Obj).with_type(ValueKind::Object))),

            other => {
                Err(Error::bad_node(other.to_string()).with_operation("ir_builder::lower_expr"))
            }
        }
    }

    fn lower_binary(
        &mut self,
        node: &Node,
        env: &mut Env,
        op: Op,
        rtype: ValueKind,
    ) -> Result<usize> {
        let left = self.lower_expr(&node.children[0], env, None)?;
        let right = self.lower_expr(&node.children[1], env, None)?;
        Ok(self
            .ir
            .push(Insn::new(op).with_type(rtype).with_left(left).with_right(right)))
    }

    fn lower_assign(&mut self, node: &Node, env: &mut Env) -> Result<usize> {
        let lhs = &node.children[0];
        match lhs.kind {
            NodeKind::Index => {
                let obj = self.lower_expr(&lhs.children[0], env, None)?;
                let key = self.lower_expr(&lhs.children[1], env, None)?;
                let value = self.lower_expr(&node.children[1], env, None)?;
                Ok(self.ir.push(
                    Insn::new(Op::AssignIndex)
                        .with_type(ValueKind::Boxed)
                        .with_left(obj)
                        .with_right(key)
                        .with_third(value),
                ))
            }

            NodeKind::Member => {
                let obj = self.lower_expr(&lhs.children[0], env, None)?;
                let value = self.lower_expr(&node.children[1], env, None)?;
                Ok(self.ir.push(
                    Insn::new(Op::AssignMember)
                        .with_type(ValueKind::Boxed)
                        .with_left(obj)
                        .with_right(value)
                        .with_name(lhs.text()),
                ))
            }

            NodeKind::VarRef => {
                let value = self.lower_expr(&node.children[1], env, None)?;
                let name = self.intern.intern(lhs.text());

                if env.get(name).is_some() {
                    // local: a move whose kind type flow resolves later
                    let idx = self.ir.push(
                        Insn::new(Op::Assign)
                            .with_type(ValueKind::Boxed)
                            .with_left(value),
                    );
                    env.bind(name, idx);
                    Ok(idx)
                } else {
                    // unknown name: write a member of the global object
                    let top = self.ir.push(Insn::new(Op::Top).with_type(ValueKind::Object));
                    Ok(self.ir.push(
                        Insn::new(Op::AssignMember)
                            .with_left(top)
                            .with_right(value)
                            .with_name(lhs.text()),
                    ))
                }
            }

            other => Err(Error::bad_assign_target(other.to_string())
                .with_operation("ir_builder::lower_assign")),
        }
    }

    /// `a && b` / `a || b` desugar into an `If` whose taken branch
    /// evaluates the second operand, unified with the first at the join.
    fn lower_short_circuit(&mut self, node: &Node, env: &mut Env) -> Result<usize> {
        let first_raw = self.lower_expr(&node.children[0], env, None)?;
        // the join result gets a definition of its own; unifying the
        // operand's original definition would alias its slot into the
        // merge and clobber later reads of it
        let first = self.ir.push(
            Insn::new(Op::Assign)
                .with_type(ValueKind::Boxed)
                .with_left(first_raw),
        );

        // `||` skips the second operand when the first is truthy
        let cond = if node.kind == NodeKind::Or {
            self.ir.push(
                Insn::new(Op::Not)
                    .with_type(ValueKind::Bool)
                    .with_left(first),
            )
        } else {
            first
        };

        let if_idx = self.ir.push(Insn::new(Op::If).with_left(cond));

        let skip_env = env.clone();
        let second = self.lower_expr(&node.children[1], env, None)?;
        // a bare binding reference evaluates nothing inside the branch;
        // give the join a definition of its own so only the taken path
        // writes the merged slot
        let second = if second <= if_idx {
            self.ir.push(
                Insn::new(Op::Assign)
                    .with_type(ValueKind::Boxed)
                    .with_left(second),
            )
        } else {
            second
        };

        let ifelse_idx = self.ir.push(Insn::new(Op::IfElse).with_left(if_idx));
        self.ir.push(Insn::new(Op::IfEnd).with_left(ifelse_idx));

        let result = self.ir.push(
            Insn::new(Op::Unify)
                .with_type(ValueKind::Boxed)
                .with_left(first)
                .with_right(second),
        );

        let taken_env = std::mem::replace(env, skip_env);
        self.unify_envs(env, &taken_env, false);

        Ok(result)
    }

    fn lower_call(&mut self, node: &Node, env: &mut Env) -> Result<usize> {
        let mut recv = 0usize;
        let callee = self.lower_expr(&node.children[0], env, Some(&mut recv))?;

        // argument 0 is the receiver; plain calls get `undefined`
        if recv == 0 {
            recv = self.ir.push(Insn::new(Op::Nil).with_type(ValueKind::Boxed));
        }

        let args_node = &node.children[1];
        let mut args = Vec::with_capacity(args_node.children.len() + 1);
        args.push(recv);
        for arg in &args_node.children {
            args.push(self.lower_expr(arg, env, None)?);
        }

        for (pos, &value) in args.iter().enumerate() {
            self.ir
                .push(Insn::new(Op::Arg).with_left(value).with_imm(pos as i64));
        }

        Ok(self.ir.push(
            Insn::new(Op::Call)
                .with_type(ValueKind::Boxed)
                .with_left(callee),
        ))
    }

    fn lower_intrinsic_call(&mut self, node: &Node, env: &mut Env) -> Result<usize> {
        let args_node = &node.children[0];
        let mut args = Vec::with_capacity(args_node.children.len());
        for arg in &args_node.children {
            args.push(self.lower_expr(arg, env, None)?);
        }

        for (pos, &value) in args.iter().enumerate() {
            self.ir
                .push(Insn::new(Op::Arg).with_left(value).with_imm(pos as i64));
        }

        Ok(self.ir.push(
            Insn::new(Op::IntrinsicCall)
                .with_type(ValueKind::Boxed)
                .with_imm(args.len() as i64)
                .with_name(node.text()),
        ))
    }
}

/// Parse a decimal integer lexeme the way the runtime's number coercion
/// does: digits until the first non-digit, wrapping on overflow.
fn parse_int(text: &str) -> i64 {
    let mut value: i64 = 0;
    for b in text.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as i64);
    }
    value
}
