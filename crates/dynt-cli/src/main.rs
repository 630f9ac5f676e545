use anyhow::Result;
use clap::Parser;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use dynt_cli::{RunOptions, run_files};

#[derive(Parser, Debug)]
#[command(name = "dynt", about = "dynt: a tiny JIT-compiled scripting language", version)]
struct Cli {
    /// Source files to load and execute, in order
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,

    /// Print each function's compiled IR instead of executing
    #[arg(long, default_value_t = false)]
    print_ir: bool,

    /// Raise log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    run_files(&cli.files, RunOptions { print_ir: cli.print_ir })
}
