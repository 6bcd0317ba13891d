//! End-to-end tests that run the `consult-bot` binary against a temp
//! workspace. No network: every provider stays disabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn consult_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("consult-bot");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let kb = root.join("kb");
    fs::create_dir_all(kb.join("services")).unwrap();
    fs::write(
        kb.join("services/crypto.md"),
        "# Crypto Assets\n\nWe help structure and declare crypto holdings.\n\nCustody, tax reporting and bank onboarding are covered.",
    )
    .unwrap();
    fs::write(
        kb.join("relocation.txt"),
        "Relocation support.\n\nResidence permits, schools and banking for families moving abroad.",
    )
    .unwrap();
    fs::write(kb.join("notes.csv"), "a,b,c\n").unwrap();
    fs::write(kb.join("empty.md"), "  \n\n").unwrap();
    fs::write(kb.join(".draft.md"), "hidden draft").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/bot.sqlite"

[chunking]
max_chars = 2000

[ingest]
root = "{root}/kb"
include_globs = ["**/*.md", "**/*.txt", "**/*.csv"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("bot.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_bot_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = consult_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("TELEGRAM_BOT_TOKEN")
        .env_remove("OPENAI_API_KEY")
        .env_remove("BITRIX24_WEBHOOK_URL")
        .env_remove("ADMIN_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run consult-bot binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_bot_cli(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));

    let (_, stderr, success) = run_bot_cli(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_dry_run_counts_files() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_bot_cli(&config, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    // The csv has no extractor and the dotfile is excluded; empty.md is
    // found but yields no text.
    assert!(stdout.contains("files found: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("files skipped: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks: 2"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_requires_embedding_provider() {
    let (_tmp, config) = setup_test_env();
    run_bot_cli(&config, &["init"]);

    let (_, stderr, success) = run_bot_cli(&config, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"), "stderr: {}", stderr);
}

#[test]
fn test_search_requires_embeddings() {
    let (_tmp, config) = setup_test_env();
    run_bot_cli(&config, &["init"]);

    let (_, stderr, success) = run_bot_cli(&config, &["search", "crypto custody"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "stderr: {}", stderr);
}

#[test]
fn test_ask_walks_the_menu() {
    let (_tmp, config) = setup_test_env();
    run_bot_cli(&config, &["init"]);

    let (stdout, stderr, success) = run_bot_cli(&config, &["ask", "/start", "--user", "42"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Welcome!"), "stdout: {}", stdout);

    let (stdout, _, success) = run_bot_cli(&config, &["ask", "/cancel", "--user", "42"]);
    assert!(success);
    assert!(stdout.contains("There is nothing to cancel."), "stdout: {}", stdout);

    let (stdout, stderr, success) = run_bot_cli(&config, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Users:       1"), "stdout: {}", stdout);
    assert!(stdout.contains("Leads:       0 today / 0 total"), "stdout: {}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_bot_cli(&missing, &["stats"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}
