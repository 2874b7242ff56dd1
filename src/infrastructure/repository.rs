//! Sqlite repository for listings, change history, and crawl runs
//!
//! Implements the domain persistence traits on top of a shared
//! `SqlitePool`. The pool is owned here but only ever driven from the
//! sequential merge/orchestration path; fetch tasks never touch it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::listing::{
    CrawlRunStatus, Listing, ListingHistoryEntry, Location, Operation,
};
use crate::domain::repositories::{CrawlRunRepository, ListingRepository};
use crate::domain::stats::RunStats;

#[derive(Clone)]
pub struct SqliteListingRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteListingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn listing_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Listing> {
        let operation: String = row.get("operation");
        Ok(Listing {
            id: row.get("id"),
            external_id: row.get("external_id"),
            location_id: row.get("location_id"),
            operation: Operation::from_str(&operation)?,
            property_type: row.get("property_type"),
            url: row.get("url"),
            title: row.get("title"),
            price: row.get("price"),
            typology: row.get("typology"),
            area_gross: row.get("area_gross"),
            bedrooms: row.get("bedrooms"),
            agency_name: row.get("agency_name"),
            agency_url: row.get("agency_url"),
            image_url: row.get("image_url"),
            tags: row.get("tags"),
            description: row.get("description"),
            raw_data: row.get("raw_data"),
            first_seen: row.get::<DateTime<Utc>, _>("first_seen"),
            last_seen: row.get::<DateTime<Utc>, _>("last_seen"),
            is_active: row.get("is_active"),
        })
    }

    /// Seed a location row. Used by setup code and tests; the crawl itself
    /// only reads locations.
    pub async fn insert_location(&self, name: &str, slug: &str) -> Result<Location> {
        let result = sqlx::query("INSERT INTO locations (name, slug) VALUES (?, ?)")
            .bind(name)
            .bind(slug)
            .execute(&*self.pool)
            .await
            .with_context(|| format!("failed to insert location {slug}"))?;
        Ok(Location {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            slug: slug.to_string(),
        })
    }

    pub async fn listing_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM listings")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn history_count(&self, listing_id: i64) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM listing_history WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<CrawlRunRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, status, config, error_message, started_at, ended_at,
                   listings_processed, listings_created, listings_updated,
                   pages_scraped, segments_scraped
            FROM crawl_runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(CrawlRunRow {
                id: row.get("id"),
                status: row.get("status"),
                config: row.get("config"),
                error_message: row.get("error_message"),
                started_at: row.get("started_at"),
                ended_at: row.get("ended_at"),
                stats: RunStats {
                    listings_processed: row.get::<i64, _>("listings_processed") as u64,
                    listings_created: row.get::<i64, _>("listings_created") as u64,
                    listings_updated: row.get::<i64, _>("listings_updated") as u64,
                    pages_scraped: row.get::<i64, _>("pages_scraped") as u64,
                    segments_scraped: row.get::<i64, _>("segments_scraped") as u64,
                },
            })),
            None => Ok(None),
        }
    }
}

/// A materialized crawl run row, mostly for inspection and tests.
#[derive(Debug, Clone)]
pub struct CrawlRunRow {
    pub id: i64,
    pub status: String,
    pub config: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
}

#[async_trait]
impl ListingRepository for SqliteListingRepository {
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Listing>> {
        let row = sqlx::query(
            r#"
            SELECT id, external_id, location_id, operation, property_type, url,
                   title, price, typology, area_gross, bedrooms, agency_name,
                   agency_url, image_url, tags, description, raw_data,
                   first_seen, last_seen, is_active
            FROM listings WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::listing_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings
            (external_id, location_id, operation, property_type, url, title,
             price, typology, area_gross, bedrooms, agency_name, agency_url,
             image_url, tags, description, raw_data, first_seen, last_seen,
             is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(listing.external_id)
        .bind(listing.location_id)
        .bind(listing.operation.as_slug())
        .bind(&listing.property_type)
        .bind(&listing.url)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.typology)
        .bind(listing.area_gross)
        .bind(listing.bedrooms)
        .bind(&listing.agency_name)
        .bind(&listing.agency_url)
        .bind(&listing.image_url)
        .bind(&listing.tags)
        .bind(&listing.description)
        .bind(&listing.raw_data)
        .bind(listing.first_seen)
        .bind(listing.last_seen)
        .bind(listing.is_active)
        .execute(&*self.pool)
        .await
        .with_context(|| format!("failed to insert listing {}", listing.external_id))?;

        Ok(result.last_insert_rowid())
    }

    async fn update_listing(&self, listing: &Listing) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listings SET
                location_id = ?, operation = ?, property_type = ?, url = ?,
                title = ?, price = ?, typology = ?, area_gross = ?,
                bedrooms = ?, agency_name = ?, agency_url = ?, image_url = ?,
                tags = ?, description = ?, raw_data = ?, last_seen = ?,
                is_active = ?
            WHERE id = ?
            "#,
        )
        .bind(listing.location_id)
        .bind(listing.operation.as_slug())
        .bind(&listing.property_type)
        .bind(&listing.url)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.typology)
        .bind(listing.area_gross)
        .bind(listing.bedrooms)
        .bind(&listing.agency_name)
        .bind(&listing.agency_url)
        .bind(&listing.image_url)
        .bind(&listing.tags)
        .bind(&listing.description)
        .bind(&listing.raw_data)
        .bind(listing.last_seen)
        .bind(listing.is_active)
        .bind(listing.id)
        .execute(&*self.pool)
        .await
        .with_context(|| format!("failed to update listing {}", listing.external_id))?;
        Ok(())
    }

    async fn append_history(&self, entry: &ListingHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listing_history (listing_id, price, scraped_at, changes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(entry.listing_id)
        .bind(entry.price)
        .bind(entry.scraped_at)
        .bind(&entry.changes)
        .execute(&*self.pool)
        .await
        .with_context(|| format!("failed to append history for listing {}", entry.listing_id))?;
        Ok(())
    }

    async fn find_location_by_slug(&self, slug: &str) -> Result<Option<Location>> {
        let row = sqlx::query("SELECT id, name, slug FROM locations WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| Location {
            id: row.get("id"),
            name: row.get("name"),
            slug: row.get("slug"),
        }))
    }
}

#[async_trait]
impl CrawlRunRepository for SqliteListingRepository {
    async fn create_run(&self, config_snapshot: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO crawl_runs (started_at, status, config) VALUES (?, 'running', ?)",
        )
        .bind(Utc::now())
        .bind(config_snapshot)
        .execute(&*self.pool)
        .await
        .context("failed to create crawl run")?;
        Ok(result.last_insert_rowid())
    }

    async fn finalize_run(
        &self,
        run_id: i64,
        status: CrawlRunStatus,
        stats: &RunStats,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_runs SET
                status = ?, ended_at = ?, error_message = ?,
                listings_processed = ?, listings_created = ?,
                listings_updated = ?, pages_scraped = ?, segments_scraped = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .bind(stats.listings_processed as i64)
        .bind(stats.listings_created as i64)
        .bind(stats.listings_updated as i64)
        .bind(stats.pages_scraped as i64)
        .bind(stats.segments_scraped as i64)
        .bind(run_id)
        .execute(&*self.pool)
        .await
        .with_context(|| format!("failed to finalize crawl run {run_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::DatabaseConnection;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteListingRepository) {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:{}", temp_dir.path().join("test.db").display());
        let db = DatabaseConnection::new(&url).await.expect("db");
        db.migrate().await.expect("migrate");
        (temp_dir, SqliteListingRepository::new(db.pool().clone()))
    }

    fn sample_listing(external_id: i64) -> Listing {
        let now = Utc::now();
        Listing {
            id: 0,
            external_id,
            location_id: None,
            operation: Operation::Buy,
            property_type: "casas".into(),
            url: format!("https://www.idealista.pt/imovel/{external_id}/"),
            title: Some("Moradia T3".into()),
            price: Some(350_000),
            typology: Some("T3".into()),
            area_gross: Some(110.0),
            bedrooms: Some(3),
            agency_name: None,
            agency_url: None,
            image_url: None,
            tags: None,
            description: None,
            raw_data: None,
            first_seen: now,
            last_seen: now,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn insert_and_find_by_external_id() {
        let (_tmp, repo) = setup().await;
        let id = repo.insert_listing(&sample_listing(42)).await.unwrap();
        assert!(id > 0);

        let found = repo.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.price, Some(350_000));
        assert_eq!(found.operation, Operation::Buy);
        assert!(repo.find_by_external_id(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_append_only_per_entry() {
        let (_tmp, repo) = setup().await;
        let id = repo.insert_listing(&sample_listing(7)).await.unwrap();
        assert_eq!(repo.history_count(id).await.unwrap(), 0);

        let entry = ListingHistoryEntry {
            listing_id: id,
            price: Some(350_000),
            scraped_at: Utc::now(),
            changes: Some(r#"{"price":{"old":350000,"new":340000}}"#.into()),
        };
        repo.append_history(&entry).await.unwrap();
        repo.append_history(&entry).await.unwrap();
        assert_eq!(repo.history_count(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn run_lifecycle_create_then_finalize() {
        let (_tmp, repo) = setup().await;
        let run_id = repo.create_run(r#"{"locations":["cascais"]}"#).await.unwrap();

        let row = repo.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "running");
        assert!(row.ended_at.is_none());

        let stats = RunStats {
            listings_processed: 10,
            listings_created: 4,
            listings_updated: 6,
            pages_scraped: 2,
            segments_scraped: 1,
        };
        repo.finalize_run(run_id, CrawlRunStatus::Success, &stats, None)
            .await
            .unwrap();

        let row = repo.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "success");
        assert!(row.ended_at.is_some());
        assert_eq!(row.stats, stats);
        assert!(row.error_message.is_none());
    }

    #[tokio::test]
    async fn locations_round_trip() {
        let (_tmp, repo) = setup().await;
        let loc = repo.insert_location("Cascais", "cascais").await.unwrap();
        let found = repo.find_location_by_slug("cascais").await.unwrap().unwrap();
        assert_eq!(found.id, loc.id);
        assert!(repo.find_location_by_slug("porto").await.unwrap().is_none());
    }
}
