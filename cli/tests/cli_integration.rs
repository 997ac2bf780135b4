use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn ncmeta_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ncmeta"))
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(ncmeta_bin())
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("NCMETA_LOG")
        .args(args)
        .output()
        .expect("run ncmeta")
}

fn stdout(out: &Output) -> String {
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn create_sample(dir: &Path, name: &str) {
    stdout(&run(
        dir,
        &[
            "create",
            name,
            "--dim",
            "x=4",
            "time=unlimited",
            "--att",
            "title=sample run",
        ],
    ));
}

#[test]
fn create_then_info() {
    let dir = tempfile::tempdir().unwrap();
    create_sample(dir.path(), "a.ncim");
    assert!(dir.path().join("a.ncim").exists());

    let info = stdout(&run(dir.path(), &["info", "a.ncim"]));
    assert!(info.contains("Dimensions: 2 (1 unlimited)"), "{info}");
    assert!(info.contains("Attributes: 1"), "{info}");
    assert!(info.contains("read-only"), "{info}");
    assert!(info.contains("Provenance: version=2"), "{info}");
}

#[test]
fn create_refuses_existing_image() {
    let dir = tempfile::tempdir().unwrap();
    create_sample(dir.path(), "a.ncim");
    let out = run(dir.path(), &["create", "a.ncim"]);
    assert!(!out.status.success());
}

#[test]
fn in_memory_create_persists() {
    let dir = tempfile::tempdir().unwrap();
    stdout(&run(dir.path(), &["create", "m.ncim", "--in-memory", "--dim", "n=3"]));
    let info = stdout(&run(dir.path(), &["info", "m.ncim"]));
    assert!(info.contains("Dimensions: 1 (0 unlimited)"), "{info}");
}

#[test]
fn dump_text_and_json() {
    let dir = tempfile::tempdir().unwrap();
    create_sample(dir.path(), "b.ncim");

    let text = stdout(&run(dir.path(), &["dump", "b.ncim"]));
    assert!(text.starts_with("netcdf b {"), "{text}");
    assert!(text.contains("x = 4 ;"), "{text}");
    assert!(text.contains("time = UNLIMITED ; // (0 currently)"), "{text}");
    assert!(text.contains(":title = \"sample run\" ;"), "{text}");

    let json = stdout(&run(dir.path(), &["dump", "b.ncim", "--json"]));
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["path"], "/");
    let dims = value["dimensions"].as_array().unwrap();
    assert_eq!(dims.len(), 2);
    assert_eq!(dims[1]["unlimited"], true);
    assert!(value["attributes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["name"] == "_NCProperties"));
}

#[test]
fn scan_lists_images() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nested")).unwrap();
    create_sample(dir.path(), "top.ncim");
    create_sample(dir.path(), "nested/inner.ncim");
    std::fs::write(dir.path().join("junk.ncim"), b"not an image").unwrap();

    let out = stdout(&run(dir.path(), &["scan"]));
    assert!(out.contains("top.ncim"), "{out}");
    assert!(out.contains("inner.ncim"), "{out}");
    assert!(out.contains("junk.ncim  unreadable"), "{out}");
    assert!(out.contains("3 images"), "{out}");

    let out = stdout(&run(dir.path(), &["scan", "-i", "nested/*.ncim"]));
    assert!(out.contains("1 images"), "{out}");
}

#[test]
fn info_on_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["info", "nope.ncim"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn config_init_and_show() {
    let dir = tempfile::tempdir().unwrap();
    stdout(&run(dir.path(), &["config", "init"]));
    let written = std::fs::read_to_string(dir.path().join("ncmeta.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["range_mode"], "strict");

    std::fs::write(
        dir.path().join("ncmeta.json"),
        r#"{"fill_mode": "nofill", "image": {"zstd": false, "with_crc": false}}"#,
    )
    .unwrap();
    let shown = stdout(&run(dir.path(), &["config", "show"]));
    assert!(shown.contains("Fill Mode: NoFill"), "{shown}");
    assert!(shown.contains("crc=false"), "{shown}");

    // an explicit file that does not exist is an error
    let out = run(dir.path(), &["--config", "missing.json", "config", "show"]);
    assert!(!out.status.success());
}
