use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn phologix_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("phologix");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("photos/2024")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/phologix.sqlite"

[library]
thumbnail_dir = "{root}/data/thumbs"
batch_size = 2

[tagger]
port = 49070

[index]
port = 49071
"#,
        root = root.display()
    );

    let config_path = root.join("config/phologix.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_phologix(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = phologix_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run phologix binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_phologix(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/phologix.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_phologix(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_phologix(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_empty_library() {
    let (_tmp, config_path) = setup_test_env();
    run_phologix(&config_path, &["init"]);

    let (stdout, stderr, success) = run_phologix(&config_path, &["count"]);
    assert!(success, "count failed: {}", stderr);
    assert_eq!(stdout.trim(), "0");

    let (stdout, _, success) = run_phologix(&config_path, &["album", "list"]);
    assert!(success);
    assert!(stdout.contains("No albums."));

    let (stdout, _, success) = run_phologix(&config_path, &["search", ""]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_album_add_list_remove() {
    let (tmp, config_path) = setup_test_env();
    run_phologix(&config_path, &["init"]);
    let album = tmp.path().join("photos/2024");
    let album = album.to_str().unwrap();

    let (stdout, stderr, success) = run_phologix(
        &config_path,
        &["album", "add", album, "--name", "Year 2024", "--no-watch"],
    );
    assert!(success, "album add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Added album"));

    let (stdout, _, _) = run_phologix(&config_path, &["album", "list"]);
    assert!(stdout.contains("Year 2024"), "list output: {}", stdout);
    assert!(!stdout.contains("(watched)"));

    let (_, _, success) = run_phologix(
        &config_path,
        &["album", "update", album, "--watch", "true"],
    );
    assert!(success);
    let (stdout, _, _) = run_phologix(&config_path, &["album", "list"]);
    assert!(stdout.contains("(watched)"), "list output: {}", stdout);

    let (stdout, stderr, success) = run_phologix(&config_path, &["album", "remove", album]);
    assert!(success, "album remove failed: {}", stderr);
    assert!(stdout.contains("Removed album"));

    let (stdout, _, _) = run_phologix(&config_path, &["album", "list"]);
    assert!(stdout.contains("No albums."));
}

#[test]
fn test_nested_album_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_phologix(&config_path, &["init"]);
    let parent = tmp.path().join("photos");

    let (_, _, success) = run_phologix(
        &config_path,
        &["album", "add", tmp.path().join("photos/2024").to_str().unwrap(), "--no-watch"],
    );
    assert!(success);

    let (_, stderr, success) = run_phologix(
        &config_path,
        &["album", "add", parent.to_str().unwrap(), "--no-watch"],
    );
    assert!(!success);
    assert!(stderr.contains("overlaps"), "stderr: {}", stderr);
}

#[test]
fn test_scan_unregistered_album_fails() {
    let (tmp, config_path) = setup_test_env();
    run_phologix(&config_path, &["init"]);

    let (_, stderr, success) = run_phologix(
        &config_path,
        &["scan", tmp.path().join("photos/2024").to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("album not found"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("batch_size = 2", "batch_size = 0")).unwrap();

    let (_, stderr, success) = run_phologix(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_progress_mode_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_phologix(&config_path, &["--progress", "loud", "count"]);
    assert!(!success);
    assert!(stderr.contains("unknown progress mode"), "stderr: {}", stderr);
}
