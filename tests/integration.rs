use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn aetherium_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("aetherium");
    path
}

fn write_config(root: &Path, auth_section: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/aetherium.sqlite"

[server]
bind = "127.0.0.1:0"

{}

[llm]
provider = "ollama"
url = "http://127.0.0.1:9"
model = "phi3:mini"
timeout_secs = 2
"#,
        root.display(),
        auth_section
    );

    let config_path = config_dir.join("aetherium.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        "[auth]\nsecret = \"integration-test-secret-0123\"",
    );
    (tmp, config_path)
}

fn run_aetherium(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = aetherium_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("AETHERIUM_AUTH_SECRET")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run aetherium binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_aetherium(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/aetherium.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_aetherium(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_aetherium(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_secret_fails_to_load() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");

    let (_, stderr, success) = run_aetherium(&config_path, &["init"]);
    assert!(!success, "init should fail without auth.secret");
    assert!(stderr.contains("auth.secret"), "stderr={}", stderr);
}

#[test]
fn test_short_secret_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "[auth]\nsecret = \"short\"");

    let (_, stderr, success) = run_aetherium(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("at least 16 bytes"), "stderr={}", stderr);
}

#[test]
fn test_secret_from_environment() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");

    let output = Command::new(aetherium_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .env("AETHERIUM_AUTH_SECRET", "env-provided-secret-0123456")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_tasks_lists_all_without_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run_aetherium(&missing, &["tasks"]);
    assert!(success, "tasks failed: stderr={}", stderr);
    for name in [
        "save_to_memory",
        "suggest_with_memory",
        "improve",
        "summarize",
        "review",
    ] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
}

#[test]
fn test_unknown_task_prints_rejection() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_aetherium(&config_path, &["task", "translate", "hola"]);
    assert!(!success);
    assert!(stdout.contains("Task not recognized by the Router Agent."));
    assert!(stderr.contains("unknown task: translate"), "stderr={}", stderr);
}

#[test]
fn test_save_without_embeddings_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_aetherium(
        &config_path,
        &["task", "save_to_memory", "The sky is blue."],
    );
    assert!(!success);
    assert!(stderr.contains("embeddings are disabled"), "stderr={}", stderr);
}

#[test]
fn test_memory_query_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_aetherium(&config_path, &["memory", "query", "anything"]);
    assert!(success, "memory query failed: stderr={}", stderr);
    assert!(stdout.contains("stored=0"));
    assert!(stdout.contains("no results"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_aetherium(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
