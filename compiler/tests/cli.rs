use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn bin() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("celc"))
}

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("compiler crate must live inside the workspace")
        .join("demos")
        .join(name)
}

fn write_source(dir: &tempfile::TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn run_power_demo() {
    bin()
        .arg("run")
        .arg(demo("power.cel"))
        .assert()
        .success()
        .stdout("3486784401\n12\n6\n12\n-2\n");
}

#[test]
fn run_countdown_demo() {
    bin()
        .arg("run")
        .arg(demo("countdown.cel"))
        .assert()
        .success()
        .stdout("3\n2\n1\n0\n");
}

#[test]
fn compile_writes_asm_into_outdir() {
    let out = tempfile::tempdir().unwrap();
    bin()
        .args(["compile", "-o"])
        .arg(out.path())
        .arg(demo("power.cel"))
        .assert()
        .success()
        .stdout(predicate::str::contains("power.asm"));

    let asm = fs::read_to_string(out.path().join("power.asm")).unwrap();
    assert!(asm.contains("nasm -f win64"));
    assert!(asm.contains("gate_LOOP_Block:"));
    assert!(asm.contains("    ; --- Gate [main] ---"));
}

#[test]
fn compile_sysv_without_comments() {
    let out = tempfile::tempdir().unwrap();
    bin()
        .args(["compile", "--target", "sysv", "--no-comments", "-o"])
        .arg(out.path())
        .arg(demo("countdown.cel"))
        .assert()
        .success();

    let asm = fs::read_to_string(out.path().join("countdown.asm")).unwrap();
    assert!(asm.contains("call    printf wrt ..plt"));
    assert!(asm.contains("section .note.GNU-stack"));
    assert!(!asm.contains("    ;"));
}

#[test]
fn target_from_environment() {
    let out = tempfile::tempdir().unwrap();
    bin()
        .env("CELC_TARGET", "sysv")
        .args(["compile", "-o"])
        .arg(out.path())
        .arg(demo("countdown.cel"))
        .assert()
        .success();

    let asm = fs::read_to_string(out.path().join("countdown.asm")).unwrap();
    assert!(asm.contains("nasm -f elf64"));
}

#[test]
fn compile_is_deterministic() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    for dir in [&a, &b] {
        bin()
            .args(["compile", "-o"])
            .arg(dir.path())
            .arg(demo("power.cel"))
            .assert()
            .success();
    }
    let first = fs::read(a.path().join("power.asm")).unwrap();
    let second = fs::read(b.path().join("power.asm")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn check_reports_all_semantic_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "bad.cel",
        "[g] { a: ADD ghost, 1; b: DIV a, 0; } [g] { c: SET a, b; }",
    );
    bin()
        .arg("check")
        .arg(&path)
        .assert()
        .code(65)
        .stderr(predicate::str::contains("compilation failed with 4 error(s)"))
        .stderr(predicate::str::contains("ghost"))
        .stderr(predicate::str::contains("division by literal zero"))
        .stderr(predicate::str::contains("declared more than once"));
}

#[test]
fn failed_compile_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "broken.cel", "[g] { x: SET y; }");
    let out = tempfile::tempdir().unwrap();
    bin()
        .args(["compile", "-o"])
        .arg(out.path())
        .arg(&path)
        .assert()
        .code(65);
    assert!(!out.path().join("broken.asm").exists());
}

#[test]
fn syntax_error_exits_65() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "syntax.cel", "[g] { x SET 1; }");
    bin()
        .arg("check")
        .arg(&path)
        .assert()
        .code(65)
        .stderr(predicate::str::contains("SyntaxError"));
}

#[test]
fn runtime_divide_by_zero_exits_70() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "zero.cel", "[g] { z: SET 0; x: SET 1; x: DIV x, z; }");
    bin()
        .arg("run")
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn step_limit_exits_70() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(
        &dir,
        "spin.cel",
        "[spin] { one: SET 1; c: COMPARE one, 0; j: JUMP_IF c, spin; }",
    );
    bin()
        .args(["run", "--max-steps", "100"])
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("step limit of 100 exceeded"));
}

#[test]
fn missing_file_exits_74() {
    bin()
        .args(["check", "does/not/exist.cel"])
        .assert()
        .code(74)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn lex_dumps_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "tiny.cel", "[g] { x: SET 1; }");
    bin()
        .arg("lex")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("SET"));
}

#[test]
fn parse_dumps_lowered_blocks() {
    bin()
        .arg("parse")
        .arg(demo("power.cel"))
        .assert()
        .success()
        .stdout(predicate::str::contains("[LOOP_Block] {"))
        .stdout(predicate::str::contains("result: MUL result, base;"));
}
