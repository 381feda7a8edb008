use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::database::sqlite::models::{DocumentRecord, IndexGeneration, PassageRecord};
use crate::database::sqlite::queries::{DocumentQueries, GenerationQueries, PassageQueries};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// File name of the reference index inside the configuration directory
pub const INDEX_DATABASE_FILE: &str = "reference_index.db";

/// Everything a reader needs from one consistent generation
#[derive(Debug, Clone)]
pub struct StoredIndex {
    pub generation: IndexGeneration,
    pub documents: Vec<DocumentRecord>,
    pub passages: Vec<PassageRecord>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join(INDEX_DATABASE_FILE)).await
    }

    /// Open an existing index without creating it; `None` if the file is absent
    #[inline]
    pub async fn open_existing(database_path: &Path) -> Result<Option<Self>> {
        if !database_path.exists() {
            debug!("No reference index at {}", database_path.display());
            return Ok(None);
        }
        Self::new(database_path).await.map(Some)
    }

    #[inline]
    pub async fn active_generation(&self) -> Result<Option<IndexGeneration>> {
        GenerationQueries::get_active(&self.pool).await
    }

    /// Load the active generation with its documents and passages.
    ///
    /// All reads share one transaction so a concurrent swap is never observed
    /// halfway through.
    #[inline]
    pub async fn load_active_index(&self) -> Result<Option<StoredIndex>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin read transaction")?;

        let Some(generation) = GenerationQueries::get_active(&mut *tx).await? else {
            tx.rollback().await.context("Failed to end read transaction")?;
            return Ok(None);
        };

        let documents = DocumentQueries::list(&mut *tx, generation.generation).await?;
        let passages = PassageQueries::list(&mut *tx, generation.generation).await?;
        tx.rollback().await.context("Failed to end read transaction")?;

        debug!("Loaded {} with {} passages", generation, passages.len());

        Ok(Some(StoredIndex {
            generation,
            documents,
            passages,
        }))
    }

    /// Point readers at `generation` and drop every other generation, atomically
    #[inline]
    pub async fn activate_generation(&self, generation: i64) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin activation transaction")?;

        GenerationQueries::activate(&mut *tx, generation).await?;
        let removed = GenerationQueries::delete_except(&mut tx, generation).await?;

        tx.commit()
            .await
            .context("Failed to commit generation swap")?;

        info!("Activated index generation {}", generation);
        Ok(removed)
    }

    /// Remove generations left behind by builds that never activated
    #[inline]
    pub async fn remove_orphaned_generations(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin cleanup transaction")?;
        let removed = GenerationQueries::delete_inactive(&mut tx).await?;
        tx.commit().await.context("Failed to commit cleanup")?;

        if removed > 0 {
            info!("Removed {} orphaned index generations", removed);
        }
        Ok(removed)
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
