use serde::Serialize;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::security::upload::{scan, FileKind, UploadError};

#[derive(Debug, Serialize)]
pub struct StoredUpload {
    pub id: Uuid,
    pub name: String,
    pub kind: FileKind,
    pub size: usize,
    pub sha256: String,
    pub url: String,
}

/// Scans uploads and writes accepted files to disk under their content hash
pub struct UploadService {
    pool: PgPool,
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadService {
    pub fn new(pool: PgPool, dir: impl AsRef<Path>, max_bytes: usize) -> Self {
        Self {
            pool,
            dir: dir.as_ref().to_path_buf(),
            max_bytes,
        }
    }

    pub async fn store(
        &self,
        session_id: Option<Uuid>,
        filename: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredUpload, UploadError> {
        let scanned = scan(filename, content_type, bytes, self.max_bytes)?;
        let stored_name = scanned.stored_name();

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        let path = self.dir.join(&stored_name);
        // Same hash, same bytes
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| UploadError::Io(e.to_string()))?;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO uploads (id, session_id, original_name, stored_name, kind, size_bytes, sha256)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(&scanned.safe_name)
        .bind(&stored_name)
        .bind(scanned.kind.as_str())
        .bind(scanned.size as i64)
        .bind(&scanned.sha256)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        tracing::info!("Stored upload {} as {} ({} bytes)", scanned.safe_name, stored_name, scanned.size);
        Ok(StoredUpload {
            id,
            name: scanned.safe_name,
            kind: scanned.kind,
            size: scanned.size,
            sha256: scanned.sha256,
            url: format!("/uploads/{}", stored_name),
        })
    }
}
