//! Toplevel program execution.
//!
//! Two passes over the parsed program: first every function declaration
//! is boxed and stored on the global object under its name and every
//! toplevel variable reserves a global member slot; then the global
//! calls run in order. `$eval` re-enters here with a fresh buffer,
//! sharing the same global object.

use dynt_error::{Error, Result};
use dynt_runtime::call::{box_function, call_value};
use dynt_runtime::globals::{global_object, intern_pool};
use dynt_runtime::object::{member_index, object_get_interned, object_set_interned};
use dynt_runtime::{fatal, ops};
use dynt_syntax::{Node, NodeKind, parse};
use tracing::debug;

/// Parse and execute one source buffer against the shared global object.
///
/// The parse tree is leaked: function values reference their declaration
/// nodes for the rest of the process.
pub fn execute_source(source: &[u8]) -> Result<()> {
    let top = parse(source)?;
    if top.kind != NodeKind::Top {
        return Err(Error::bad_node(top.kind.to_string()).with_operation("exec::execute_source"));
    }
    let top: &'static Node = Box::leak(Box::new(top));

    let global = global_object();

    // load declarations first so calls can see later functions
    for child in &top.children {
        let name = intern_pool().intern(child.text());
        match child.kind {
            NodeKind::FunDecl => {
                let func = box_function(child);
                object_set_interned(global, name, func);
            }
            NodeKind::VarDecl => {
                let object = global.as_object().expect("global object");
                let _ = member_index(object, name, true);
            }
            _ => {}
        }
    }

    // then run the global calls in order
    for child in &top.children {
        if child.kind != NodeKind::GlobalCall {
            continue;
        }
        debug!(call = child.text(), "toplevel call");
        let name = intern_pool().intern(child.text());
        let func = object_get_interned(global, name);
        ops::assert_function(func);
        call_value(func, &[]);
    }

    Ok(())
}

/// `$eval` hook: run a buffer, treating compile errors as fatal since
/// there is no error surface back into running code.
pub fn eval_entry(source: &[u8]) {
    if let Err(err) = execute_source(source) {
        fatal(&format!("$eval failed: {}", err));
    }
}
