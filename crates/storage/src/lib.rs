use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

use shared::{
    domain::{Image, ImageId, NewImage},
    error::StorageError,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable collection of generated images, keyed by a store-assigned id.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(unavailable)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .map_err(unavailable)?;
        let storage = Self { pool };
        storage.initialize().await?;
        info!(database_url, "image store opened");
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Creates the `images` collection if it does not exist yet. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.map_err(unavailable)?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Returns every stored image. Callers decide display order.
    pub async fn list_all(&self) -> Result<Vec<Image>> {
        let rows = sqlx::query("SELECT id, src, prompt, seed FROM images")
            .fetch_all(&self.pool)
            .await
            .map_err(read_failed)?;
        rows.iter().map(image_from_row).collect()
    }

    pub async fn get(&self, id: ImageId) -> Result<Option<Image>> {
        let row = sqlx::query("SELECT id, src, prompt, seed FROM images WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_failed)?;
        row.as_ref().map(image_from_row).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await
            .map_err(read_failed)?;
        Ok(count as u64)
    }

    pub async fn insert(&self, image: &NewImage) -> Result<ImageId> {
        let rec =
            sqlx::query("INSERT INTO images (src, prompt, seed) VALUES (?, ?, ?) RETURNING id")
                .bind(&image.src)
                .bind(&image.prompt)
                .bind(i64::from(image.seed))
                .fetch_one(&self.pool)
                .await
                .map_err(write_failed)?;
        let id = ImageId(rec.try_get::<i64, _>(0).map_err(write_failed)?);
        debug!(image_id = id.0, seed = image.seed, "image inserted");
        Ok(id)
    }

    /// Overwrites the record with `image.id`, inserting it at that id when absent.
    pub async fn update(&self, image: &Image) -> Result<()> {
        sqlx::query(
            "INSERT INTO images (id, src, prompt, seed) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET src = excluded.src, prompt = excluded.prompt, seed = excluded.seed",
        )
        .bind(image.id.0)
        .bind(&image.src)
        .bind(&image.prompt)
        .bind(i64::from(image.seed))
        .execute(&self.pool)
        .await
        .map_err(write_failed)?;
        debug!(image_id = image.id.0, seed = image.seed, "image updated");
        Ok(())
    }

    /// Removes the record; deleting an unknown id succeeds without effect.
    pub async fn delete_by_id(&self, id: ImageId) -> Result<()> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(write_failed)?;
        debug!(
            image_id = id.0,
            removed = result.rows_affected(),
            "image delete applied"
        );
        Ok(())
    }
}

fn image_from_row(row: &SqliteRow) -> Result<Image> {
    let seed: i64 = row.try_get("seed").map_err(read_failed)?;
    let seed = u32::try_from(seed)
        .map_err(|_| StorageError::Read(format!("stored seed {seed} is outside the u32 range")))?;
    Ok(Image {
        id: ImageId(row.try_get("id").map_err(read_failed)?),
        src: row.try_get("src").map_err(read_failed)?,
        prompt: row.try_get("prompt").map_err(read_failed)?,
        seed,
    })
}

fn unavailable(err: impl std::fmt::Display) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

fn read_failed(err: impl std::fmt::Display) -> StorageError {
    StorageError::Read(err.to_string())
}

fn write_failed(err: impl std::fmt::Display) -> StorageError {
    StorageError::Write(err.to_string())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(|err| {
        StorageError::Unavailable(format!(
            "failed to create parent directory '{}' for database url '{database_url}': {err}",
            parent.display()
        ))
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
