//! Tests bout-en-bout du binaire `kiln`.

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use pretty_assertions::assert_eq;

/// Lance `kiln` dans `dir`, avec un Kiln.toml qui isole le SDK dans `dir/sdk`.
fn kiln(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("Kiln.toml");
    if !config.exists() {
        fs::write(&config, "sdk_dir = \"sdk\"\n").unwrap();
    }
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("KILN_HINT_PATH")
        .args(["--color", "never"])
        .args(args)
        .output()
        .unwrap()
}

fn stdout(o: &Output) -> String { String::from_utf8_lossy(&o.stdout).into_owned() }
fn stderr(o: &Output) -> String { String::from_utf8_lossy(&o.stderr).into_owned() }

#[test]
fn demo_greets_then_says_hello_world() {
    let dir = tempfile::tempdir().unwrap();
    let out = kiln(dir.path(), &["demo"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let text = stdout(&out);
    assert!(text.starts_with("namespace Debuggable {"), "{text}");
    assert!(text.ends_with("Hello, Kiln\nHello World!\n"), "{text}");

    // debugger.break() : ligne 4 de la source générée
    let err = stderr(&out);
    assert!(err.contains("BREAK Debuggable.HelloWorld.greet"), "{err}");
    assert!(err.contains("generated.kl(4,"), "{err}");
    assert!(dir.path().join("sdk/Kiln.Core.klib").is_file());
}

#[test]
fn demo_takes_a_name() {
    let dir = tempfile::tempdir().unwrap();
    let out = kiln(dir.path(), &["demo", "--name", "Roslyn"]);
    assert!(stdout(&out).ends_with("Hello, Roslyn\nHello World!\n"));
}

#[test]
fn compile_writes_image_and_symbols() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("math.kl"), "class Math { fn add(a, b) { return a + b; } }").unwrap();

    let out = kiln(dir.path(), &["compile", "math.kl", "-o", "out/Math.klib"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(dir.path().join("out/Math.klib").is_file());
    assert!(dir.path().join("out/Math.kpdb").is_file());

    let out = kiln(dir.path(), &["compile", "math.kl", "--embedded", "--release"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(dir.path().join("math.klib").is_file());
    assert!(!dir.path().join("math.kpdb").exists());
}

#[test]
fn run_invokes_a_method_with_typed_arguments() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("math.kl"), "class Math { fn add(a, b) { return a + b; } }").unwrap();

    let out = kiln(dir.path(), &["run", "math.kl", "--type", "Math", "--method", "add", "--", "2", "40"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn run_without_target_uses_main() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.kl"), "class Program { fn main() { io.println(text.upper(\"hi\")); } }").unwrap();

    let out = kiln(dir.path(), &["run", "app.kl"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "HI\n");
}

#[test]
fn compilation_errors_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.kl"), "class Bad { fn f() { return nope; } }").unwrap();

    let out = kiln(dir.path(), &["run", "bad.kl", "--type", "Bad", "--method", "f"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("error: KL0103: The name 'nope' does not exist in the current context"), "{}", stderr(&out));
}

#[test]
fn refs_lists_the_sdk_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let out = kiln(dir.path(), &["refs", "--json"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let rows: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let names: Vec<_> = rows.as_array().unwrap().iter().map(|r| r["identity"]["name"].as_str().unwrap().to_owned()).collect();
    assert_eq!(names, ["Kiln.Core", "Kiln.Text"]);
}

#[test]
fn hint_path_flag_takes_priority() {
    let dir = tempfile::tempdir().unwrap();
    let out = kiln(dir.path(), &["sdk", "--dir", "vendor"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let out = kiln(dir.path(), &["--hint-path", "vendor", "refs"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    assert_eq!(text.lines().count(), 2, "{text}");
    assert!(text.lines().all(|l| l.contains("vendor")), "{text}");
    // SDK déjà atteignable : rien d'installé dans sdk_dir
    assert!(!dir.path().join("sdk").exists());
}
