use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use jsonkeep_tree::{Container, Node};

use crate::codec;
use crate::error::{GatewayError, GatewayResult};
use crate::fs::{parent_dir, AsyncFilesystem, FileOptions, Filesystem, LocalFs};

/// Serialization parameters for a [`Gateway`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Pretty-print width in spaces; `None` or `Some(0)` writes compact JSON.
    pub indentation: Option<usize>,
    /// Write flags handed to the filesystem.
    pub file: FileOptions,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            indentation: Some(2),
            file: FileOptions::default(),
        }
    }
}

/// Loads, saves and deletes the JSON file behind one store.
///
/// Blocking and async methods behave identically; the async ones go through
/// [`AsyncFilesystem`] and never block the calling task on I/O.
pub struct Gateway<F = LocalFs> {
    path: PathBuf,
    fs: Arc<F>,
    options: GatewayOptions,
    /// Set once the parent directory is known to exist.
    dir_ready: AtomicBool,
}

impl Gateway<LocalFs> {
    /// Gateway for `path` on the local disk.
    pub fn new(path: impl Into<PathBuf>, options: GatewayOptions) -> Self {
        Self::with_fs(path, Arc::new(LocalFs), options)
    }
}

impl<F: Filesystem + AsyncFilesystem> Gateway<F> {
    /// Gateway for `path` on a caller-supplied filesystem.
    pub fn with_fs(path: impl Into<PathBuf>, fs: Arc<F>, options: GatewayOptions) -> Self {
        Self {
            path: path.into(),
            fs,
            options,
            dir_ready: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn filesystem(&self) -> &Arc<F> {
        &self.fs
    }

    // ---- Blocking ----

    pub fn exists(&self) -> GatewayResult<bool> {
        Filesystem::exists(&*self.fs, &self.path).map_err(|e| GatewayError::io(&self.path, e))
    }

    /// Read and parse the backing file. Returns `Ok(None)` if it is absent.
    pub fn load(&self) -> GatewayResult<Option<Container>> {
        if !self.exists()? {
            debug!(path = %self.path.display(), "no backing file");
            return Ok(None);
        }
        let text = Filesystem::read_text(&*self.fs, &self.path)
            .map_err(|e| GatewayError::io(&self.path, e))?;
        self.decode_root(&text).map(Some)
    }

    /// Like [`load`](Self::load), falling back to `default` if the file is absent.
    pub fn load_or(&self, default: impl FnOnce() -> Container) -> GatewayResult<Container> {
        Ok(self.load()?.unwrap_or_else(default))
    }

    /// Encode `root` and write it to the backing file.
    pub fn save(&self, root: &Container) -> GatewayResult<()> {
        if !self.dir_ready.load(Ordering::Acquire) {
            if let Some(dir) = parent_dir(&self.path) {
                Filesystem::create_dir_all(&*self.fs, dir).map_err(|e| GatewayError::io(dir, e))?;
            }
            self.dir_ready.store(true, Ordering::Release);
        }
        let text = codec::encode(&Node::from(root), self.options.indentation)?;
        Filesystem::write_text(&*self.fs, &self.path, &text, &self.options.file)
            .map_err(|e| GatewayError::io(&self.path, e))?;
        debug!(path = %self.path.display(), bytes = text.len(), "saved");
        Ok(())
    }

    /// Remove the backing file.
    pub fn delete(&self) -> GatewayResult<()> {
        if !self.exists()? {
            return Err(GatewayError::NotFound(self.path.clone()));
        }
        Filesystem::remove_file(&*self.fs, &self.path).map_err(|e| GatewayError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "deleted");
        Ok(())
    }

    // ---- Async ----

    pub async fn exists_async(&self) -> GatewayResult<bool> {
        AsyncFilesystem::exists(&*self.fs, &self.path)
            .await
            .map_err(|e| GatewayError::io(&self.path, e))
    }

    pub async fn load_async(&self) -> GatewayResult<Option<Container>> {
        if !self.exists_async().await? {
            debug!(path = %self.path.display(), "no backing file");
            return Ok(None);
        }
        let text = AsyncFilesystem::read_text(&*self.fs, &self.path)
            .await
            .map_err(|e| GatewayError::io(&self.path, e))?;
        self.decode_root(&text).map(Some)
    }

    pub async fn save_async(&self, root: &Container) -> GatewayResult<()> {
        if !self.dir_ready.load(Ordering::Acquire) {
            if let Some(dir) = parent_dir(&self.path) {
                AsyncFilesystem::create_dir_all(&*self.fs, dir)
                    .await
                    .map_err(|e| GatewayError::io(dir, e))?;
            }
            self.dir_ready.store(true, Ordering::Release);
        }
        let text = codec::encode(&Node::from(root), self.options.indentation)?;
        AsyncFilesystem::write_text(&*self.fs, &self.path, &text, &self.options.file)
            .await
            .map_err(|e| GatewayError::io(&self.path, e))?;
        debug!(path = %self.path.display(), bytes = text.len(), "saved");
        Ok(())
    }

    pub async fn delete_async(&self) -> GatewayResult<()> {
        if !self.exists_async().await? {
            return Err(GatewayError::NotFound(self.path.clone()));
        }
        AsyncFilesystem::remove_file(&*self.fs, &self.path)
            .await
            .map_err(|e| GatewayError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "deleted");
        Ok(())
    }

    fn decode_root(&self, text: &str) -> GatewayResult<Container> {
        match codec::decode(text) {
            Ok(Node::Tree(root)) => Ok(root),
            Ok(_) => Err(GatewayError::NotAContainer(self.path.clone())),
            Err(source) => Err(GatewayError::Parse {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl<F> std::fmt::Debug for Gateway<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}
