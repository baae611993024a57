use crate::catalog::CatalogStore;
use crate::config::DatabaseConfig;
use crate::photo::{BlobRef, Photo, PhotoId, PhotoPatch, QualityScore};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const PHOTO_COLUMNS: &str = r#"
    id, blob_ref, filename, content_type, size_bytes, uploaded_at,
    status, is_enhanced, enhanced_blob_ref, quality_score
"#;

/// Photo row as stored in PostgreSQL
#[derive(Debug, Clone, FromRow)]
struct PhotoRow {
    id: Uuid,
    blob_ref: String,
    filename: String,
    content_type: String,
    size_bytes: i64,
    uploaded_at: DateTime<Utc>,
    status: String,
    is_enhanced: bool,
    enhanced_blob_ref: Option<String>,
    quality_score: Option<f64>,
}

impl TryFrom<PhotoRow> for Photo {
    type Error = anyhow::Error;

    fn try_from(row: PhotoRow) -> Result<Self> {
        Ok(Photo {
            id: PhotoId(row.id),
            blob_ref: BlobRef::new(row.blob_ref),
            filename: row.filename,
            content_type: row.content_type,
            size_bytes: u64::try_from(row.size_bytes)
                .with_context(|| format!("Negative size for photo {}", row.id))?,
            uploaded_at: row.uploaded_at,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            is_enhanced: row.is_enhanced,
            enhanced_blob_ref: row.enhanced_blob_ref.map(BlobRef::new),
            quality_score: row
                .quality_score
                .map(QualityScore::new)
                .transpose()
                .with_context(|| format!("Corrupt quality score for photo {}", row.id))?,
        })
    }
}

/// Photo catalog backed by PostgreSQL
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    /// Create a new catalog with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Single-statement partial update; `condition` narrows the WHERE clause
    async fn update(
        &self,
        id: PhotoId,
        patch: &PhotoPatch,
        condition: &str,
    ) -> Result<Option<Photo>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            UPDATE photos SET
                status = COALESCE($2, status),
                is_enhanced = COALESCE($3, is_enhanced),
                enhanced_blob_ref = COALESCE($4, enhanced_blob_ref),
                quality_score = COALESCE($5, quality_score)
            WHERE id = $1 {condition}
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.is_enhanced)
        .bind(patch.enhanced_blob_ref.as_ref().map(BlobRef::as_str))
        .bind(patch.quality_score.map(|s| s.value()))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to patch photo")?;

        row.map(Photo::try_from).transpose()
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalog {
    #[instrument(skip(self, photo), fields(photo_id = %photo.id))]
    async fn insert(&self, photo: &Photo) -> Result<PhotoId> {
        let size_bytes = i64::try_from(photo.size_bytes).context("Photo size out of range")?;

        sqlx::query(
            r#"
            INSERT INTO photos (
                id, blob_ref, filename, content_type, size_bytes, uploaded_at,
                status, is_enhanced, enhanced_blob_ref, quality_score
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10
            )
            "#,
        )
        .bind(photo.id.0)
        .bind(photo.blob_ref.as_str())
        .bind(&photo.filename)
        .bind(&photo.content_type)
        .bind(size_bytes)
        .bind(photo.uploaded_at)
        .bind(photo.status.as_str())
        .bind(photo.is_enhanced)
        .bind(photo.enhanced_blob_ref.as_ref().map(BlobRef::as_str))
        .bind(photo.quality_score.map(|s| s.value()))
        .execute(&self.pool)
        .await
        .context("Failed to insert photo")?;

        debug!(blob_ref = %photo.blob_ref, "Photo indexed");
        metrics::counter!("triage.photos.inserted").increment(1);

        Ok(photo.id)
    }

    async fn get(&self, id: PhotoId) -> Result<Option<Photo>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query photo")?;

        row.map(Photo::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<Photo>> {
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos ORDER BY uploaded_at DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list photos")?;

        rows.into_iter().map(Photo::try_from).collect()
    }

    #[instrument(skip(self, patch))]
    async fn patch(&self, id: PhotoId, patch: &PhotoPatch) -> Result<Option<Photo>> {
        self.update(id, patch, "").await
    }

    #[instrument(skip(self, patch))]
    async fn patch_unless_rejected(
        &self,
        id: PhotoId,
        patch: &PhotoPatch,
    ) -> Result<Option<Photo>> {
        self.update(id, patch, "AND status <> 'rejected'").await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: PhotoId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .context("Failed to delete photo")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::PhotoStatus;

    fn row() -> PhotoRow {
        PhotoRow {
            id: Uuid::new_v4(),
            blob_ref: "photos/2024-01-15/a.jpg".to_string(),
            filename: "a.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: 50000,
            uploaded_at: Utc::now(),
            status: "rejected".to_string(),
            is_enhanced: true,
            enhanced_blob_ref: Some("photos/enhanced/2024-01-15/a.png".to_string()),
            quality_score: Some(8.7),
        }
    }

    #[test]
    fn test_row_to_photo() {
        let photo = Photo::try_from(row()).unwrap();
        assert_eq!(photo.status, PhotoStatus::Rejected);
        assert_eq!(photo.size_bytes, 50000);
        assert_eq!(photo.quality_score.map(|s| s.value()), Some(8.7));
        assert_eq!(
            photo.display_blob().as_str(),
            "photos/enhanced/2024-01-15/a.png"
        );
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let mut bad = row();
        bad.status = "archived".to_string();
        assert!(Photo::try_from(bad).is_err());
    }

    #[test]
    fn test_row_with_out_of_range_score_is_rejected() {
        let mut bad = row();
        bad.quality_score = Some(42.0);
        assert!(Photo::try_from(bad).is_err());
    }
}
