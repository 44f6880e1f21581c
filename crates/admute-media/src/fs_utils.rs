//! Filesystem utilities for atomic file replacement.
//!
//! Output segments and manifests are read by live players while the worker
//! writes them, so every write lands under a temporary sibling name first
//! and is then renamed over the destination. A reader sees either the old
//! file or the new one, never a partial one.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Temporary sibling path used while writing `dst`.
fn temp_sibling(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn ensure_parent(dst: &Path) -> MediaResult<()> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Atomically replace `dst` with `contents`.
pub async fn write_atomic(dst: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> MediaResult<()> {
    let dst = dst.as_ref();
    ensure_parent(dst).await?;

    let tmp = temp_sibling(dst);
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(MediaError::from(e));
    }
    Ok(())
}

/// Atomically copy `src` over `dst`, leaving `src` in place.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    ensure_parent(dst).await?;

    let tmp = temp_sibling(dst);
    let copied = fs::copy(src, &tmp).await.map_err(|e| {
        tracing::error!(
            "Failed to copy {} -> {}: {}",
            src.display(),
            tmp.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(MediaError::from(e));
    }
    Ok(copied)
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// This function first attempts a fast rename. If that fails with EXDEV
/// (cross-device link error), it falls back to an atomic copy followed by
/// deleting the source.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_atomic(src, dst).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!(
                    "Failed to remove source file after cross-device move: {}: {}",
                    src.display(),
                    e
                );
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("index.m3u8");

        assert_ok!(write_atomic(&dst, b"old").await);
        assert_ok!(write_atomic(&dst, b"new").await);

        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new");
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_copy_atomic_keeps_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in").join("3.ts");
        let dst = dir.path().join("out").join("3.ts");
        fs::create_dir_all(src.parent().unwrap()).await.unwrap();
        fs::write(&src, b"segment").await.unwrap();

        let copied = copy_atomic(&src, &dst).await.unwrap();

        assert_eq!(copied, 7);
        assert!(src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"segment");
    }

    #[tokio::test]
    async fn test_copy_atomic_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = copy_atomic(dir.path().join("nope.ts"), dir.path().join("x.ts"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.ts");
        let dst = dir.path().join("subdir").join("dest.ts");

        fs::write(&src, b"test content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "test content");
    }

    #[test]
    fn test_is_cross_device_error() {
        let exdev_error = std::io::Error::from_raw_os_error(18);
        assert!(is_cross_device_error(&exdev_error));

        let not_found = std::io::Error::from_raw_os_error(2);
        assert!(!is_cross_device_error(&not_found));
    }
}
