use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("faq.md"),
        "# FAQ\n\nAnswers to common questions.\n\n## Refunds\n\nRefunds are processed within five business days.\n\n## Shipping\n\nOrders ship from Lisbon every weekday.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/supportai.sqlite"

[generation]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("supportai.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_supportai"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run supportai binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// Run `app create` and return the printed key.
fn create_app(config_path: &Path, name: &str, domains: &str) -> String {
    let (stdout, stderr, success) =
        run_cli(config_path, &["app", "create", name, "--domains", domains]);
    assert!(success, "app create failed: {}", stderr);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Created app "))
        .expect("app key in output")
        .trim()
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    for _ in 0..2 {
        let (stdout, stderr, success) = run_cli(&config_path, &["init"]);
        assert!(success, "init failed: {}", stderr);
        assert!(stdout.contains("Database initialized successfully."));
    }
}

#[test]
fn test_app_lifecycle() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let key = create_app(&config_path, "Shop", "https://Shop.Example.com/help,localhost");
    assert!(key.starts_with("app_"));

    let (stdout, _, success) = run_cli(&config_path, &["app", "list"]);
    assert!(success);
    assert!(stdout.contains(&key));
    assert!(stdout.contains("shop.example.com,localhost"));

    let (_, stderr, success) = run_cli(
        &config_path,
        &["app", "update", &key, "--title", "Shop help", "--primary", "#111111"],
    );
    assert!(success, "update failed: {}", stderr);

    let (stdout, _, success) = run_cli(&config_path, &["app", "show", &key]);
    assert!(success);
    assert!(stdout.contains("Shop help"));
    assert!(stdout.contains("primary=#111111"));

    let (stdout, _, success) =
        run_cli(&config_path, &["app", "set-domains", &key, "docs.example.org"]);
    assert!(success);
    assert!(stdout.contains("docs.example.org"));

    let (_, _, success) = run_cli(&config_path, &["app", "delete", &key]);
    assert!(success);
    let (_, _, success) = run_cli(&config_path, &["app", "show", &key]);
    assert!(!success);
}

#[test]
fn test_ingest_and_search() {
    let (tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);
    let key = create_app(&config_path, "Shop", "localhost");
    let faq = tmp.path().join("faq.md");

    for _ in 0..2 {
        let (stdout, stderr, success) =
            run_cli(&config_path, &["ingest", &key, faq.to_str().unwrap()]);
        assert!(success, "ingest failed: {}", stderr);
        assert!(stdout.contains("3 chunks stored"), "got: {}", stdout);
    }

    let (stdout, _, success) = run_cli(&config_path, &["search", &key, "refund policy"]);
    assert!(success);
    assert!(stdout.starts_with("1. "), "got: {}", stdout);
    assert!(stdout.contains("faq.md • Refunds"));

    let (stdout, _, success) = run_cli(&config_path, &["search", &key, "kubernetes"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ingest_unknown_app_fails() {
    let (tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);
    let faq = tmp.path().join("faq.md");
    let (_, stderr, success) =
        run_cli(&config_path, &["ingest", "app_missing", faq.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("no app with key"));
}

#[test]
fn test_conversation_not_found() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);
    let (_, stderr, success) = run_cli(&config_path, &["conversation", "nope"]);
    assert!(!success);
    assert!(stderr.contains("conversation not found"));
}
