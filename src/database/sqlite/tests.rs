use super::*;
use crate::database::sqlite::models::{NewDocument, NewPassage};
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

async fn write_generation(database: &Database, documents: &[&str]) -> Result<i64> {
    let generation = GenerationQueries::create(database.pool(), "hashing-sha256-4", 4).await?;
    for (order, id) in documents.iter().enumerate() {
        let order = i64::try_from(order)?;
        DocumentQueries::insert(
            database.pool(),
            generation,
            &NewDocument {
                document_id: (*id).to_string(),
                title: (*id).to_string(),
                content_hash: format!("{id}-{generation}"),
                byte_len: 10,
                document_order: order,
            },
        )
        .await?;
        PassageQueries::insert(
            database.pool(),
            generation,
            &NewPassage {
                document_id: (*id).to_string(),
                document_order: order,
                passage_index: 0,
                start_offset: 0,
                end_offset: 10,
                heading: (*id).to_string(),
                raw_text: format!("text of {id}"),
                embedding: vec![0.5, 0.5, 0.5, 0.5],
            },
        )
        .await?;
    }
    let count = i64::try_from(documents.len())?;
    GenerationQueries::set_counts(database.pool(), generation, count, count).await?;
    Ok(generation)
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["index_generations", "documents", "passages", "index_state"]
            .into_iter()
            .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn uses_write_ahead_log() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(database.pool())
        .await?;
    assert_eq!(mode.to_lowercase(), "wal");

    Ok(())
}

#[tokio::test]
async fn empty_database_has_no_active_index() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    assert!(database.active_generation().await?.is_none());
    assert!(database.load_active_index().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn open_existing_does_not_create_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(INDEX_DATABASE_FILE);

    assert!(Database::open_existing(&path).await?.is_none());
    assert!(!path.exists());

    Ok(())
}

#[tokio::test]
async fn swap_replaces_active_generation() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let first = write_generation(&database, &["a.md", "b.md"]).await?;
    database.activate_generation(first).await?;

    let loaded = database
        .load_active_index()
        .await?
        .expect("first generation should be active");
    assert_eq!(loaded.generation.generation, first);
    assert_eq!(loaded.documents.len(), 2);
    assert_eq!(loaded.passages.len(), 2);

    // A written but not activated generation stays invisible
    let second = write_generation(&database, &["c.md"]).await?;
    let still_first = database
        .load_active_index()
        .await?
        .expect("first generation should still be active");
    assert_eq!(still_first.generation.generation, first);

    let removed = database.activate_generation(second).await?;
    assert_eq!(removed, 1);

    let loaded = database
        .load_active_index()
        .await?
        .expect("second generation should be active");
    assert_eq!(loaded.generation.generation, second);
    assert_eq!(loaded.generation.document_count, 1);
    assert_eq!(loaded.passages[0].raw_text, "text of c.md");
    assert!(GenerationQueries::get(database.pool(), first).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn orphaned_generations_are_removed() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let active = write_generation(&database, &["a.md"]).await?;
    database.activate_generation(active).await?;
    let orphan = write_generation(&database, &["a.md"]).await?;

    assert_eq!(database.remove_orphaned_generations().await?, 1);
    assert!(GenerationQueries::get(database.pool(), orphan).await?.is_none());
    assert_eq!(
        database
            .active_generation()
            .await?
            .map(|g| g.generation),
        Some(active)
    );

    Ok(())
}

#[tokio::test]
async fn database_optimize() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let generation = write_generation(&database, &["a.md"]).await?;
    database.activate_generation(generation).await?;

    database.optimize().await?;

    assert!(database.load_active_index().await?.is_some());
    Ok(())
}
