use anyhow::Result;
use sift_retriever::storage::sqlite_store::SqliteStore;
use sift_retriever::storage::{Chunk, ChunkStore};
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn database_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("chunks.db")
}

/// Helper to run the CLI binary against the temp directory's database
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_sift-retriever"))
        .arg("--database")
        .arg(database_path(temp_dir))
        .args(args)
        .env("RUST_LOG", "error") // Reduce log noise
        .env("OPENAI_API_KEY", "test-key")
        .env_remove("SIFT_DATABASE_PATH")
        .output()?;
    Ok(output)
}

/// Helper to populate a database with test data
async fn populate_test_data(temp_dir: &TempDir) -> Result<()> {
    let store = SqliteStore::open(&database_path(temp_dir)).await?;
    let mut chunks = vec![
        Chunk::new("p1", "Late filing incurs a penalty of 5% per month.")
            .with_collection("tax")
            .with_document("penalties", "Tax Penalties")
            .with_keywords(["tax", "penalty"]),
        Chunk::new("s1", "Pick software that exports to your filing format.")
            .with_collection("tax")
            .with_document("software", "Tax Software")
            .with_keywords(["tax", "software"]),
        Chunk::new("a1", "Double-entry bookkeeping basics.")
            .with_collection("accounting")
            .with_document("basics", "Bookkeeping"),
    ];
    for chunk in &mut chunks {
        chunk.ensure_hash();
    }
    store.upsert_chunks(chunks).await?;
    Ok(())
}

#[tokio::test]
async fn test_cli_help_lists_commands() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    let output = run_cli(&temp_dir, &["--help"])?;
    assert!(
        output.status.success(),
        "CLI help command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    for command in ["init", "list", "stats", "search", "reconcile"] {
        assert!(stdout.contains(command), "help is missing {command}");
    }
    Ok(())
}

#[tokio::test]
async fn test_cli_init_flow() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    let output = run_cli(&temp_dir, &["init"])?;
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8(output.stdout)?.contains("Initialized chunk database"));
    assert!(database_path(&temp_dir).exists());

    let output = run_cli(&temp_dir, &["stats"])?;
    assert!(String::from_utf8(output.stdout)?.contains("Total chunks: 0"));

    let output = run_cli(&temp_dir, &["list"])?;
    assert!(String::from_utf8(output.stdout)?.contains("Found 0 chunks"));
    Ok(())
}

#[tokio::test]
async fn test_cli_list_and_stats() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    populate_test_data(&temp_dir).await?;

    let output = run_cli(&temp_dir, &["list", "--collection", "tax"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Found 2 chunks"));
    assert!(stdout.contains("ID: p1"));
    assert!(!stdout.contains("ID: a1"));

    let output = run_cli(&temp_dir, &["list", "--format", "json", "--limit", "1"])?;
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let output = run_cli(&temp_dir, &["stats"])?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Total chunks: 3"));
    assert!(stdout.contains("Chunks with keywords: 2"));
    assert!(stdout.contains("Collections: 2"));
    Ok(())
}

#[tokio::test]
async fn test_cli_invalid_input_validation() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    let output = run_cli(&temp_dir, &["list", "--format", "yaml"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid format"));

    let output = run_cli(&temp_dir, &["search"])?;
    assert!(!output.status.success(), "search without a query should fail");

    let bad_file = temp_dir.path().join("chunks.json");
    std::fs::write(&bad_file, "not json")?;
    let output = run_cli(
        &temp_dir,
        &["reconcile", "tax", bad_file.to_string_lossy().as_ref()],
    )?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid chunk file"));
    Ok(())
}

#[tokio::test]
async fn test_cli_reconcile_empty_collection() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    populate_test_data(&temp_dir).await?;

    // Emptying a collection needs no provider calls.
    let empty = temp_dir.path().join("empty.json");
    std::fs::write(&empty, "[]")?;
    let output = run_cli(
        &temp_dir,
        &["reconcile", "accounting", empty.to_string_lossy().as_ref()],
    )?;
    assert!(
        output.status.success(),
        "reconcile failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["removed"], 1);
    assert_eq!(stats["added"], 0);
    Ok(())
}

#[tokio::test]
async fn test_cli_blank_search_needs_no_providers() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    populate_test_data(&temp_dir).await?;

    let output = run_cli(&temp_dir, &["search", "   ", "--format", "json"])?;
    assert!(
        output.status.success(),
        "search failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let response: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(response["results"], serde_json::json!([]));
    Ok(())
}
