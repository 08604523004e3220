use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn finrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("finrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let docs = root.join("PDFs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("bluechip.md"),
        "# Bluechip Equity Fund\n\nThe Bluechip Equity Fund invests in large-cap Indian equities.\n\nIts total expense ratio is 1.05 percent for the regular plan.",
    )
    .unwrap();
    fs::write(
        docs.join("gilt.md"),
        "# Gilt Fund Factsheet\n\nThe Gilt Fund holds sovereign bonds with a modified duration of 7.2 years.\n\nYield to maturity stands at 7.1 percent.",
    )
    .unwrap();
    fs::write(
        docs.join("notes.txt"),
        "Quarterly notes.\n\nThe benchmark Nifty 50 returned 4.2 percent this quarter.\n\nSensex tracked closely.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/finrag.sqlite"

[documents]
root = "{root}/PDFs"
include_globs = ["**/*.md", "**/*.txt"]
auto_ingest = false

[chunking]
strategy = "paragraph"
max_tokens = 700

[retrieval]
final_limit = 12

[agent]
transcript_path = "{root}/data/check_agent_log.json"

[server]
bind = "127.0.0.1:7349"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("finrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_finrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = finrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run finrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn first_result_id(search_out: &str) -> Option<String> {
    search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_finrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("finrag.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_finrag(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_finrag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_finrag(&config_path, &["ingest", "--progress", "off"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("upserted documents: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_full_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (stdout1, _, _) = run_finrag(&config_path, &["ingest", "--full"]);
    assert!(stdout1.contains("upserted documents: 3"));
    let (stdout2, _, _) = run_finrag(&config_path, &["ingest", "--full"]);
    assert!(stdout2.contains("upserted documents: 3"));

    let (stats, _, success) = run_finrag(&config_path, &["stats"]);
    assert!(success);
    assert!(stats.contains("Documents:   3"), "got: {}", stats);
}

#[test]
fn test_ingest_incremental() {
    let (tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (stdout, _, _) = run_finrag(&config_path, &["ingest"]);
    assert!(
        stdout.contains("fetched: 0"),
        "Expected no items on incremental ingest, got: {}",
        stdout
    );

    std::thread::sleep(std::time::Duration::from_secs(1));
    fs::write(
        tmp.path().join("PDFs").join("gilt.md"),
        "# Gilt Fund Factsheet\n\nDuration was cut to 5.9 years.",
    )
    .unwrap();

    let (stdout, _, _) = run_finrag(&config_path, &["ingest"]);
    assert!(
        stdout.contains("upserted documents: 1"),
        "Expected 1 doc upserted after modification, got: {}",
        stdout
    );
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (stdout, _, success) = run_finrag(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("items found: 3"));

    let (stats, _, _) = run_finrag(&config_path, &["stats"]);
    assert!(stats.contains("Documents:   0"), "dry run wrote data: {}", stats);
}

#[test]
fn test_ingest_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (stdout, _, success) = run_finrag(&config_path, &["ingest", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("upserted documents: 1"));
}

#[test]
fn test_ingest_missing_root_fails() {
    let (tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    fs::remove_dir_all(tmp.path().join("PDFs")).unwrap();
    let (_, stderr, success) = run_finrag(&config_path, &["ingest"]);
    assert!(!success, "ingest of a missing root should fail");
    assert!(stderr.contains("does not exist"), "got: {}", stderr);
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (stdout, _, success) = run_finrag(&config_path, &["search", "expense ratio"]);
    assert!(success, "search failed");
    let first = stdout.lines().find(|l| l.starts_with("1.")).unwrap_or_default();
    assert!(
        first.contains("bluechip.md"),
        "Expected the Bluechip factsheet first, got: {}",
        stdout
    );
}

#[test]
fn test_search_explain() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (stdout, _, success) = run_finrag(&config_path, &["search", "duration", "--explain"]);
    assert!(success);
    assert!(stdout.contains("Search: mode=keyword"));
    assert!(stdout.contains("scoring: keyword="));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (stdout1, _, _) = run_finrag(&config_path, &["search", "fund"]);
    let (stdout2, _, _) = run_finrag(&config_path, &["search", "fund"]);
    assert_eq!(stdout1, stdout2, "Search results should be deterministic");
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (stdout, _, success) = run_finrag(&config_path, &["search", ""]);
    assert!(success, "Empty query should not fail");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (stdout, _, success) = run_finrag(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_get_document() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let (search_out, _, _) = run_finrag(&config_path, &["search", "sovereign"]);
    let doc_id = first_result_id(&search_out).expect("search should return an id");

    let (stdout, _, success) = run_finrag(&config_path, &["get", &doc_id]);
    assert!(success, "get should succeed");
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains(&doc_id));
    assert!(stdout.contains("gilt.md"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_search_mode_semantic_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["search", "nav", "--mode", "semantic"]);
    assert!(!success, "Semantic mode should fail when embeddings disabled");
    assert!(stderr.contains("embeddings"), "got: {}", stderr);
}

#[test]
fn test_search_mode_hybrid_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["search", "nav", "--mode", "hybrid"]);
    assert!(!success, "Hybrid mode should fail when embeddings disabled");
    assert!(stderr.contains("embeddings"), "got: {}", stderr);
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["search", "nav", "--mode", "invalid"]);
    assert!(!success, "Unknown mode should fail");
    assert!(stderr.contains("Unknown search mode"), "got: {}", stderr);
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["embed", "pending"]);
    assert!(!success, "embed pending should fail when provider disabled");
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    let (_, stderr, success) = run_finrag(&config_path, &["embed", "rebuild"]);
    assert!(!success, "embed rebuild should fail when provider disabled");
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_export_to_file_and_stdout() {
    let (tmp, config_path) = setup_test_env();

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);

    let out_path = tmp.path().join("all_docs.json");
    let (stdout, stderr, success) = run_finrag(
        &config_path,
        &["export", "--output", out_path.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("exported 3 documents"));

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out_path).unwrap()).unwrap();
    let docs = exported.as_array().unwrap();
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| !d["chunks"].as_array().unwrap().is_empty()));

    let (stdout, _, success) = run_finrag(&config_path, &["export", "-o", "-"]);
    assert!(success);
    let from_stdout: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(from_stdout.as_array().unwrap().len(), 3);
}

#[test]
fn test_tool_list_without_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_finrag(&missing, &["tool", "list"]);
    assert!(success);
    for name in [
        "hybrid_search",
        "google_search",
        "wiki_lookup",
        "company_overview",
        "sharpe_ratio",
        "max_drawdown",
    ] {
        assert!(stdout.contains(name), "{} missing from: {}", name, stdout);
    }
}

#[test]
fn test_tool_call_metric_and_hybrid_search() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_finrag(
        &config_path,
        &[
            "tool",
            "call",
            "max_drawdown",
            "--json",
            r#"{"returns": [0.1, -0.5, 0.2]}"#,
        ],
    );
    assert!(success, "tool call failed: {}", stderr);
    let dd: f64 = stdout.trim().parse().unwrap();
    assert!((dd - (-0.5)).abs() < 1e-9, "got {}", dd);

    run_finrag(&config_path, &["init"]);
    run_finrag(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_finrag(
        &config_path,
        &["tool", "call", "hybrid_search", "--json", r#"{"query": "yield to maturity"}"#],
    );
    assert!(success, "hybrid_search failed: {}", stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits[0]["source_id"], "gilt.md");
}

#[test]
fn test_tool_call_invalid_params_fail() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_finrag(
        &config_path,
        &["tool", "call", "sharpe_ratio", "--json", r#"{"returns": "high"}"#],
    );
    assert!(!success);
    assert!(stderr.contains("invalid parameters"), "got: {}", stderr);
}

#[test]
fn test_ask_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env();

    let output = Command::new(finrag_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["ask", "What is the expense ratio?"])
        .env("GROQ_API_KEY", "")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GROQ_API_KEY"), "got: {}", stderr);
}
