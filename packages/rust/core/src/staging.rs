//! Local staging tree: `<output>/c<N>/<NNN>.<ext>`.
//!
//! Payloads are first written to `<NNN>_temp` and renamed once the format is
//! known, so a half-written file never carries a final name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use mangaroo_shared::{HarvestError, Image, ImageFormat, Result, image_file_stem};

/// An image whose bytes sit on disk under their final name.
#[derive(Debug, Clone)]
pub(crate) struct StagedImage {
    pub image: Image,
    pub path: PathBuf,
    pub downloaded_at: DateTime<Utc>,
}

/// Write `bytes` for image `index` into `dir`, returning the final path.
pub(crate) async fn stage_bytes(
    dir: &Path,
    index: u32,
    bytes: &[u8],
    format: &ImageFormat,
) -> Result<PathBuf> {
    let stem = image_file_stem(index);
    let temp_path = dir.join(format!("{stem}_temp"));
    tokio::fs::write(&temp_path, bytes)
        .await
        .map_err(|e| HarvestError::io(&temp_path, e))?;

    let final_path = dir.join(format!("{stem}.{}", format.extension()));
    if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
            warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
        }
        return Err(HarvestError::io(&final_path, e));
    }
    Ok(final_path)
}

/// Remove a chapter's staging directory. A missing directory is not an error.
pub(crate) async fn remove_chapter_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarvestError::io(dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mangaroo_staging_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn stages_under_final_name_without_temp_leftover() {
        let dir = temp_dir();
        let path = stage_bytes(&dir, 7, b"png", &ImageFormat::Png).await.unwrap();

        assert_eq!(path, dir.join("007.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
        assert!(!dir.join("007_temp").exists());
    }

    #[tokio::test]
    async fn jpeg_uses_jpg_extension() {
        let dir = temp_dir();
        let path = stage_bytes(&dir, 1, b"jpg", &ImageFormat::Jpeg).await.unwrap();
        assert_eq!(path, dir.join("001.jpg"));
    }

    #[tokio::test]
    async fn staging_into_missing_dir_is_io_error() {
        let dir = temp_dir().join("absent");
        let err = stage_bytes(&dir, 1, b"x", &ImageFormat::Jpeg)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Io { .. }));
    }

    #[tokio::test]
    async fn removing_chapter_dir_is_idempotent() {
        let dir = temp_dir().join("c1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("001.jpg"), b"x").unwrap();

        remove_chapter_dir(&dir).await.unwrap();
        assert!(!dir.exists());
        remove_chapter_dir(&dir).await.unwrap();
    }
}
