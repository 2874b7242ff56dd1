// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_locations_sql = r#"
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_listings_sql = r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                location_id INTEGER REFERENCES locations (id),
                operation TEXT NOT NULL,
                property_type TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                price INTEGER,
                typology TEXT,
                area_gross REAL,
                bedrooms INTEGER,
                agency_name TEXT,
                agency_url TEXT,
                image_url TEXT,
                tags TEXT,
                description TEXT,
                raw_data TEXT,
                first_seen DATETIME NOT NULL,
                last_seen DATETIME NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1
            )
        "#;

        let create_history_sql = r#"
            CREATE TABLE IF NOT EXISTS listing_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL REFERENCES listings (id),
                price INTEGER,
                scraped_at DATETIME NOT NULL,
                changes TEXT
            )
        "#;

        let create_runs_sql = r#"
            CREATE TABLE IF NOT EXISTS crawl_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at DATETIME NOT NULL,
                ended_at DATETIME,
                status TEXT NOT NULL DEFAULT 'running',
                config TEXT,
                error_message TEXT,
                listings_processed INTEGER NOT NULL DEFAULT 0,
                listings_created INTEGER NOT NULL DEFAULT 0,
                listings_updated INTEGER NOT NULL DEFAULT 0,
                pages_scraped INTEGER NOT NULL DEFAULT 0,
                segments_scraped INTEGER NOT NULL DEFAULT 0
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_listings_external_id ON listings (external_id)",
            "CREATE INDEX IF NOT EXISTS idx_listings_last_seen ON listings (last_seen)",
            "CREATE INDEX IF NOT EXISTS idx_history_listing_id ON listing_history (listing_id)",
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON crawl_runs (status)",
        ];

        sqlx::query(create_locations_sql).execute(&self.pool).await?;
        sqlx::query(create_listings_sql).execute(&self.pool).await?;
        sqlx::query(create_history_sql).execute(&self.pool).await?;
        sqlx::query(create_runs_sql).execute(&self.pool).await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migration.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;

        let result = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='listings'",
        )
        .fetch_optional(db.pool())
        .await?;
        assert!(result.is_some());

        // Migration is idempotent
        db.migrate().await?;
        Ok(())
    }
}
