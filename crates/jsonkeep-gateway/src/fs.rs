use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// Flush/sync strategy for a save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Write flags passed through to [`Filesystem::write_text`].
///
/// Text is always written as UTF-8.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOptions {
    /// Sync strategy.
    pub sync: SyncMode,
    /// Write to a temporary sibling file and rename it into place, so a crash
    /// mid-write never leaves a truncated file behind.
    pub atomic: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            sync: SyncMode::default(),
            atomic: true,
        }
    }
}

/// Blocking filesystem primitives used by the gateway.
pub trait Filesystem: Send + Sync + 'static {
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Read a whole file as text. Fails if the file is absent.
    fn read_text(&self, path: &Path) -> io::Result<String>;

    /// Replace the contents of `path` with `text`.
    fn write_text(&self, path: &Path, text: &str, options: &FileOptions) -> io::Result<()>;

    /// Remove a file. Fails if the file is absent.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Non-blocking counterparts of [`Filesystem`].
///
/// Implementations must not block the calling task while doing I/O.
#[async_trait]
pub trait AsyncFilesystem: Send + Sync + 'static {
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn read_text(&self, path: &Path) -> io::Result<String>;

    async fn write_text(&self, path: &Path, text: &str, options: &FileOptions) -> io::Result<()>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The local disk, through `std::fs` and `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

/// `Path::parent` returns `Some("")` for a bare file name; treat that as `.`.
pub(crate) fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jsonkeep".to_string());
    let tmp_name = format!(".{name}.{}.tmp", uuid::Uuid::now_v7());
    match parent_dir(path) {
        Some(dir) => dir.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

impl Filesystem for LocalFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn read_text(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_text(&self, path: &Path, text: &str, options: &FileOptions) -> io::Result<()> {
        let sync = matches!(options.sync, SyncMode::EveryWrite);
        if options.atomic {
            let dir = parent_dir(path).unwrap_or_else(|| Path::new("."));
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(text.as_bytes())?;
            tmp.flush()?;
            if sync {
                tmp.as_file().sync_all()?;
            }
            tmp.persist(path).map_err(|e| e.error)?;
        } else {
            let mut file = File::create(path)?;
            file.write_all(text.as_bytes())?;
            file.flush()?;
            if sync {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[async_trait]
impl AsyncFilesystem for LocalFs {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn read_text(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write_text(&self, path: &Path, text: &str, options: &FileOptions) -> io::Result<()> {
        let sync = matches!(options.sync, SyncMode::EveryWrite);
        let target = if options.atomic {
            temp_sibling(path)
        } else {
            path.to_path_buf()
        };

        let written = async {
            let mut file = tokio::fs::File::create(&target).await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
            if sync {
                file.sync_all().await?;
            }
            Ok::<_, io::Error>(())
        }
        .await;

        if !options.atomic {
            return written;
        }
        let renamed = match written {
            Ok(()) => tokio::fs::rename(&target, path).await,
            Err(e) => Err(e),
        };
        if renamed.is_err() {
            // Best-effort: the temp file is garbage either way.
            let _ = tokio::fs::remove_file(&target).await;
        }
        renamed
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(atomic: bool, sync: SyncMode) -> FileOptions {
        FileOptions { sync, atomic }
    }

    #[test]
    fn blocking_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let fs = LocalFs;

        assert!(!Filesystem::exists(&fs, &path).unwrap());
        for opts in [
            options(true, SyncMode::OsDefault),
            options(false, SyncMode::EveryWrite),
        ] {
            Filesystem::write_text(&fs, &path, "{\"a\":1}", &opts).unwrap();
            assert_eq!(Filesystem::read_text(&fs, &path).unwrap(), "{\"a\":1}");
        }
        assert!(Filesystem::exists(&fs, &path).unwrap());

        Filesystem::remove_file(&fs, &path).unwrap();
        assert!(Filesystem::remove_file(&fs, &path).is_err());
        assert!(Filesystem::read_text(&fs, &path).is_err());
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        Filesystem::write_text(&LocalFs, &path, "[]", &FileOptions::default()).unwrap();
        Filesystem::write_text(&LocalFs, &path, "[1]", &FileOptions::default()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1]");
    }

    #[tokio::test]
    async fn async_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");
        let fs = LocalFs;

        AsyncFilesystem::create_dir_all(&fs, path.parent().unwrap()).await.unwrap();
        for opts in [
            options(true, SyncMode::EveryWrite),
            options(false, SyncMode::OsDefault),
        ] {
            AsyncFilesystem::write_text(&fs, &path, "[true]", &opts).await.unwrap();
            assert_eq!(AsyncFilesystem::read_text(&fs, &path).await.unwrap(), "[true]");
        }
        assert!(AsyncFilesystem::exists(&fs, &path).await.unwrap());
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);

        AsyncFilesystem::remove_file(&fs, &path).await.unwrap();
        assert!(!AsyncFilesystem::exists(&fs, &path).await.unwrap());
        assert!(AsyncFilesystem::remove_file(&fs, &path).await.is_err());
    }

    #[test]
    fn file_options_from_partial_json() {
        let opts: FileOptions = serde_json::from_str(r#"{"sync": "every_write"}"#).unwrap();
        assert_eq!(opts.sync, SyncMode::EveryWrite);
        assert!(opts.atomic);
    }
}
