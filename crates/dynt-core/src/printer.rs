//! Human-readable IR dump, one line per instruction.

use std::fmt::Write;

use crate::ir::{Insn, Ir, Storage};

/// Render typed, allocated IR for `--print-ir` style diagnostics.
pub fn print_ir(name: &str, ir: &Ir) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}:", name);
    for (idx, insn) in ir.iter().enumerate() {
        let _ = writeln!(out, "  {}", format_insn(idx, insn));
    }
    out
}

fn format_insn(idx: usize, insn: &Insn) -> String {
    let mut line = format!("{:>4}: {:<13} t:{:<14}", idx, insn.op.to_string(), insn.rtype);

    match insn.storage {
        Storage::None => line.push_str(" s:-      "),
        storage => line.push_str(&format!(" s:{}:{:<4}", short_storage(storage), insn.addr)),
    }

    line.push_str(&format!(" i:{:<6}", insn.imm));

    if let Some(name) = &insn.name {
        line.push_str(&format!(" n:{:<10}", name));
    } else {
        line.push_str(" n:-         ");
    }

    line.push_str(&format!(
        " o:{},{},{} u:{}",
        insn.left, insn.right, insn.third, insn.uidx
    ));
    line
}

fn short_storage(storage: Storage) -> &'static str {
    match storage {
        Storage::None => "-",
        Storage::Data => "d",
        Storage::Pointer => "p",
        Storage::Arg => "a",
    }
}
