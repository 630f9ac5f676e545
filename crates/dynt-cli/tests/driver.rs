//! Driver tests over real source files.

use std::io::Write;

use dynt_cli::{RunOptions, run_files};

fn write_program(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write program");
    file
}

#[test]
fn print_ir_compiles_without_executing() {
    let file = write_program("function main() { $print(1 + 2); } main();");
    let path = file.path().to_string_lossy().into_owned();
    run_files(&[path], RunOptions { print_ir: true }).expect("print-ir should succeed");
}

#[test]
fn missing_file_reports_its_path() {
    let err = run_files(&["no-such-file.dt".into()], RunOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("no-such-file.dt"));
}

#[cfg(all(target_arch = "x86_64", unix))]
#[test]
fn executes_a_program_file() {
    use dynt_runtime::intrinsics::{capture_output, take_output};

    let file = write_program("function main() { $print(40 + 2); } main();");
    let path = file.path().to_string_lossy().into_owned();

    dynt_jit::init();
    capture_output();
    run_files(&[path], RunOptions::default()).expect("program should run");
    assert_eq!(take_output(), b"42\n");
}
