
use super::models::{
    DocumentRecord, IndexGeneration, NewDocument, NewPassage, PassageRecord, encode_embedding,
};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor};
use tracing::debug;

pub struct GenerationQueries;

impl GenerationQueries {
    #[inline]
    pub async fn create<'e, E: SqliteExecutor<'e>>(
        executor: E,
        embedding_model: &str,
        dimension: i64,
    ) -> Result<i64> {
        let now = Utc::now().naive_utc();
        let generation = sqlx::query(
            "INSERT INTO index_generations (embedding_model, dimension, created_at) VALUES (?, ?, ?)",
        )
        .bind(embedding_model)
        .bind(dimension)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to create index generation")?
        .last_insert_rowid();

        debug!("Created index generation {}", generation);
        Ok(generation)
    }

    #[inline]
    pub async fn set_counts<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
        document_count: i64,
        passage_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE index_generations SET document_count = ?, passage_count = ? WHERE generation = ?",
        )
        .bind(document_count)
        .bind(passage_count)
        .bind(generation)
        .execute(executor)
        .await
        .context("Failed to update generation counts")?;
        Ok(())
    }

    #[inline]
    pub async fn get<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
    ) -> Result<Option<IndexGeneration>> {
        sqlx::query_as::<_, IndexGeneration>(
            r#"
            SELECT generation, embedding_model, dimension, document_count, passage_count, created_at
            FROM index_generations WHERE generation = ?
            "#,
        )
        .bind(generation)
        .fetch_optional(executor)
        .await
        .context("Failed to get index generation")
    }

    #[inline]
    pub async fn get_active<'e, E: SqliteExecutor<'e>>(
        executor: E,
    ) -> Result<Option<IndexGeneration>> {
        sqlx::query_as::<_, IndexGeneration>(
            r#"
            SELECT g.generation, g.embedding_model, g.dimension, g.document_count,
                   g.passage_count, g.created_at
            FROM index_generations g
            JOIN index_state s ON g.generation = s.active_generation
            WHERE s.id = 1
            "#,
        )
        .fetch_optional(executor)
        .await
        .context("Failed to get active index generation")
    }

    /// Point readers at a generation
    #[inline]
    pub async fn activate<'e, E: SqliteExecutor<'e>>(executor: E, generation: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE index_state SET active_generation = ?, updated_at = ? WHERE id = 1")
            .bind(generation)
            .bind(now)
            .execute(executor)
            .await
            .context("Failed to activate index generation")?;
        Ok(())
    }

    /// Remove every generation except `keep`, returning how many were removed
    #[inline]
    pub async fn delete_except(conn: &mut SqliteConnection, keep: i64) -> Result<u64> {
        sqlx::query("DELETE FROM passages WHERE generation != ?")
            .bind(keep)
            .execute(&mut *conn)
            .await
            .context("Failed to delete stale passages")?;
        sqlx::query("DELETE FROM documents WHERE generation != ?")
            .bind(keep)
            .execute(&mut *conn)
            .await
            .context("Failed to delete stale documents")?;
        let removed = sqlx::query("DELETE FROM index_generations WHERE generation != ?")
            .bind(keep)
            .execute(&mut *conn)
            .await
            .context("Failed to delete stale generations")?
            .rows_affected();

        debug!("Removed {} stale generations", removed);
        Ok(removed)
    }

    /// Remove generations that are not active, e.g. from an interrupted build
    #[inline]
    pub async fn delete_inactive(conn: &mut SqliteConnection) -> Result<u64> {
        match Self::get_active(&mut *conn).await? {
            Some(active) => Self::delete_except(conn, active.generation).await,
            None => {
                sqlx::query("DELETE FROM passages")
                    .execute(&mut *conn)
                    .await
                    .context("Failed to delete orphaned passages")?;
                sqlx::query("DELETE FROM documents")
                    .execute(&mut *conn)
                    .await
                    .context("Failed to delete orphaned documents")?;
                let removed = sqlx::query("DELETE FROM index_generations")
                    .execute(&mut *conn)
                    .await
                    .context("Failed to delete orphaned generations")?
                    .rows_affected();
                Ok(removed)
            }
        }
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
        document: &NewDocument,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (generation, document_id, title, content_hash, byte_len, document_order)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(generation)
        .bind(&document.document_id)
        .bind(&document.title)
        .bind(&document.content_hash)
        .bind(document.byte_len)
        .bind(document.document_order)
        .execute(executor)
        .await
        .with_context(|| format!("Failed to insert document {}", document.document_id))?;
        Ok(())
    }

    #[inline]
    pub async fn list<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
    ) -> Result<Vec<DocumentRecord>> {
        sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT generation, document_id, title, content_hash, byte_len, document_order
            FROM documents WHERE generation = ?
            ORDER BY document_order
            "#,
        )
        .bind(generation)
        .fetch_all(executor)
        .await
        .context("Failed to list documents")
    }
}

pub struct PassageQueries;

impl PassageQueries {
    #[inline]
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
        passage: &NewPassage,
    ) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO passages (generation, document_id, document_order, passage_index,
                                  start_offset, end_offset, heading, raw_text, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(generation)
        .bind(&passage.document_id)
        .bind(passage.document_order)
        .bind(passage.passage_index)
        .bind(passage.start_offset)
        .bind(passage.end_offset)
        .bind(&passage.heading)
        .bind(&passage.raw_text)
        .bind(encode_embedding(&passage.embedding))
        .execute(executor)
        .await
        .with_context(|| {
            format!(
                "Failed to insert passage {} of {}",
                passage.passage_index, passage.document_id
            )
        })?
        .last_insert_rowid();
        Ok(id)
    }

    /// Copy an unchanged document's passages into a new generation
    #[inline]
    pub async fn copy_document<'e, E: SqliteExecutor<'e>>(
        executor: E,
        from_generation: i64,
        to_generation: i64,
        document_id: &str,
        document_order: i64,
    ) -> Result<u64> {
        let copied = sqlx::query(
            r#"
            INSERT INTO passages (generation, document_id, document_order, passage_index,
                                  start_offset, end_offset, heading, raw_text, embedding)
            SELECT ?, document_id, ?, passage_index, start_offset, end_offset, heading, raw_text, embedding
            FROM passages
            WHERE generation = ? AND document_id = ?
            ORDER BY passage_index
            "#,
        )
        .bind(to_generation)
        .bind(document_order)
        .bind(from_generation)
        .bind(document_id)
        .execute(executor)
        .await
        .with_context(|| format!("Failed to copy passages of {document_id}"))?
        .rows_affected();
        Ok(copied)
    }

    /// All passages of a generation in document order, then source offset
    #[inline]
    pub async fn list<'e, E: SqliteExecutor<'e>>(
        executor: E,
        generation: i64,
    ) -> Result<Vec<PassageRecord>> {
        sqlx::query_as::<_, PassageRecord>(
            r#"
            SELECT id, generation, document_id, document_order, passage_index,
                   start_offset, end_offset, heading, raw_text, embedding
            FROM passages WHERE generation = ?
            ORDER BY document_order, start_offset, passage_index
            "#,
        )
        .bind(generation)
        .fetch_all(executor)
        .await
        .context("Failed to list passages")
    }

    #[inline]
    pub async fn count<'e, E: SqliteExecutor<'e>>(executor: E, generation: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM passages WHERE generation = ?")
            .bind(generation)
            .fetch_one(executor)
            .await
            .context("Failed to count passages")
    }
}
