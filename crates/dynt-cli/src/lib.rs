//! Driver library for the `dynt` binary: read source files, then either
//! execute them or dump their functions' compiled IR.

use anyhow::{Context, Result};
use dynt_syntax::NodeKind;
use tracing::info;

/// What the driver should do with the parsed programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Dump typed, allocated IR per function instead of executing.
    pub print_ir: bool,
}

/// Load and process each file in order against one shared runtime.
pub fn run_files(files: &[String], options: RunOptions) -> Result<()> {
    dynt_jit::init();

    for path in files {
        let source = std::fs::read(path).with_context(|| format!("reading {}", path))?;
        info!(path, bytes = source.len(), "loaded");

        if options.print_ir {
            print_file_ir(&source).with_context(|| format!("compiling {}", path))?;
        } else {
            dynt_jit::execute_source(&source)
                .with_context(|| format!("executing {}", path))?;
        }
    }

    Ok(())
}

fn print_file_ir(source: &[u8]) -> Result<()> {
    let top = dynt_syntax::parse(source)?;
    for child in &top.children {
        if child.kind != NodeKind::FunDecl {
            continue;
        }
        let ir = dynt_core::compile_ir(child)?;
        print!("{}", dynt_core::print_ir(child.text(), &ir));
    }
    Ok(())
}
