//! Box lifecycle management
//!
//! Every compilation and every test run gets a freshly initialized box that
//! is cleaned up afterwards, so no file survives from one sandboxed process
//! to the next. The pool only hands out box ids; it never reuses a live box.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::isolate::IsolateError;
use crate::isolate::command::IsolateCommand;

/// An initialized isolate box.
///
/// Call [`cleanup()`](Self::cleanup) before dropping. `Drop` falls back to a
/// best-effort cleanup on a detached thread and logs a warning.
#[derive(Debug)]
pub struct IsolateBox {
    id: u32,
    /// Directory returned by `isolate --init`; files go under `box/`
    box_path: PathBuf,
    isolate_path: PathBuf,
    initialized: bool,
    cgroup: bool,
    _lease: Option<BoxLease>,
}

impl IsolateBox {
    #[instrument(skip(isolate_path))]
    pub async fn init(
        id: u32,
        isolate_path: impl Into<PathBuf>,
        cgroup: bool,
    ) -> Result<Self, IsolateError> {
        let isolate_path = isolate_path.into();
        let args = IsolateCommand::init(&isolate_path, id).cgroup(cgroup).build();
        debug!(?args, "initializing isolate box");

        let output = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .await
            .map_err(IsolateError::SpawnFailed)?;

        if !output.status.success() {
            return Err(IsolateError::InitFailed {
                id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let box_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        if !box_path.exists() {
            return Err(IsolateError::InitFailed {
                id,
                message: format!("box path does not exist: {}", box_path.display()),
            });
        }

        debug!(?box_path, "box initialized");
        Ok(Self {
            id,
            box_path,
            isolate_path,
            initialized: true,
            cgroup,
            _lease: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.box_path
    }

    /// Host path of `name` inside the box working directory
    pub fn file_path(&self, name: &str) -> Result<PathBuf, IsolateError> {
        check_relative(name)?;
        Ok(self.box_path.join("box").join(name))
    }

    /// Path of `name` as seen by the sandboxed process, which has the box
    /// directory mounted at `/box`
    pub fn sandbox_path(&self, name: &str) -> Result<PathBuf, IsolateError> {
        check_relative(name)?;
        Ok(PathBuf::from("/box").join(name))
    }

    #[instrument(skip(self, content), fields(box_id = self.id))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), IsolateError> {
        let path = self.file_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to box");
        Ok(())
    }

    /// Read a regular file from the box. Symlinks and anything else the
    /// sandboxed process may have planted are refused.
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, IsolateError> {
        let path = self.file_path(name)?;
        read_regular(&path)
            .await?
            .ok_or_else(|| IsolateError::InvalidPath(format!("not a regular file: {name}")))
    }

    /// Read a file the sandboxed process may not have created.
    ///
    /// A file the process replaced with a symlink, a hard link or a
    /// non-regular file reads as absent.
    pub async fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>, IsolateError> {
        let path = self.file_path(name)?;
        match read_regular(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a directory the sandbox user can write into.
    ///
    /// We run as root; isolate runs the program as the box uid.
    pub async fn create_shared_dir(&self, name: &str) -> Result<(), IsolateError> {
        let path = self.file_path(name)?;
        tokio::fs::create_dir_all(&path).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777)).await?;
        Ok(())
    }

    /// Copy a host directory tree into the box under `name`
    pub async fn copy_in(&self, host_dir: &Path, name: &str) -> Result<(), IsolateError> {
        let dest = self.file_path(name)?;
        copy_tree(host_dir.to_path_buf(), dest).await
    }

    /// Copy `name` from the box into a host directory
    pub async fn copy_out(&self, name: &str, host_dir: &Path) -> Result<(), IsolateError> {
        let src = self.file_path(name)?;
        copy_tree(src, host_dir.to_path_buf()).await
    }

    /// Release the box. Must be awaited before the value is dropped.
    #[must_use = "cleanup errors should be handled"]
    #[instrument(skip(self), fields(box_id = self.id))]
    pub async fn cleanup(&mut self) -> Result<(), IsolateError> {
        if !self.initialized {
            return Ok(());
        }

        let args = IsolateCommand::cleanup(&self.isolate_path, self.id)
            .cgroup(self.cgroup)
            .build();
        debug!(?args, "cleaning up isolate box");

        let output = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .await
            .map_err(IsolateError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr.trim(), "cleanup failed");
            return Err(IsolateError::CleanupFailed {
                id: self.id,
                message: stderr.trim().to_owned(),
            });
        }

        self.initialized = false;
        debug!("box cleaned up");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// A box over an existing directory, never initialized or cleaned up
    #[cfg(test)]
    pub(crate) fn detached(box_path: impl Into<PathBuf>, isolate_path: impl Into<PathBuf>) -> Self {
        Self {
            id: 0,
            box_path: box_path.into(),
            isolate_path: isolate_path.into(),
            initialized: false,
            cgroup: false,
            _lease: None,
        }
    }

    fn with_lease(mut self, lease: BoxLease) -> Self {
        self._lease = Some(lease);
        self
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }
        warn!(
            box_id = self.id,
            box_path = %self.box_path.display(),
            "box dropped without cleanup, attempting best-effort cleanup"
        );

        let args = IsolateCommand::cleanup(&self.isolate_path, self.id)
            .cgroup(self.cgroup)
            .build();
        let box_id = self.id;
        std::thread::spawn(move || {
            match std::process::Command::new(&args[0]).args(&args[1..]).output() {
                Ok(output) if output.status.success() => {
                    debug!(box_id, "best-effort cleanup succeeded");
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(box_id, stderr = %stderr.trim(), "best-effort cleanup failed");
                }
                Err(e) => warn!(box_id, error = %e, "best-effort cleanup spawn failed"),
            }
        });
    }
}

fn check_relative(name: &str) -> Result<(), IsolateError> {
    if name.contains("..") || name.starts_with('/') {
        return Err(IsolateError::InvalidPath(format!(
            "path traversal not allowed: {name}"
        )));
    }
    Ok(())
}

async fn copy_tree(src: PathBuf, dest: PathBuf) -> Result<(), IsolateError> {
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
        .await
        .map_err(|e| IsolateError::Io(std::io::Error::other(e)))?
        .map_err(IsolateError::Io)
}

/// Open `path` without following a final symlink and read it if it is a
/// plain file with a single link. `Ok(None)` for anything else.
async fn read_regular(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let linked = tokio::fs::symlink_metadata(path).await?;
    if !linked.file_type().is_file() || linked.nlink() != 1 {
        warn!(path = %path.display(), "refusing to read non-regular file from box");
        return Ok(None);
    }

    let mut file = tokio::fs::File::open(path).await?;
    let opened = file.metadata().await?;
    // The path may have been swapped between the two lookups
    if opened.dev() != linked.dev() || opened.ino() != linked.ino() {
        warn!(path = %path.display(), "box file changed while opening");
        return Ok(None);
    }

    let mut bytes = Vec::with_capacity(opened.len() as usize);
    file.read_to_end(&mut bytes).await?;
    Ok(Some(bytes))
}

fn copy_tree_blocking(src: &Path, dest: &Path) -> std::io::Result<()> {
    if !std::fs::symlink_metadata(src)?.file_type().is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a directory: {}", src.display()),
        ));
    }
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree_blocking(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
        // Symlinks written by the sandboxed process are not followed
    }
    Ok(())
}

/// Returns its box id to the pool when dropped
#[derive(Debug)]
struct BoxLease {
    id: u32,
    free: Arc<Mutex<Vec<u32>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for BoxLease {
    fn drop(&mut self) {
        if let Ok(mut free) = self.free.lock() {
            free.push(self.id);
        }
    }
}

/// Box ids reserved for this daemon.
///
/// At most one live box per id; `acquire` waits when every id is leased.
#[derive(Debug)]
pub struct BoxPool {
    isolate_path: PathBuf,
    cgroup: bool,
    capacity: u32,
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<Vec<u32>>>,
}

impl BoxPool {
    pub fn new(ids: std::ops::Range<u32>, isolate_path: impl Into<PathBuf>, cgroup: bool) -> Self {
        // Reversed so ids are handed out lowest first
        let free: Vec<u32> = ids.rev().collect();
        let capacity = free.len() as u32;
        Self {
            isolate_path: isolate_path.into(),
            cgroup,
            capacity,
            semaphore: Arc::new(Semaphore::new(free.len())),
            free: Arc::new(Mutex::new(free)),
        }
    }

    /// Wait for a free id and initialize a box with it
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<IsolateBox, IsolateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IsolateError::PoolExhausted)?;

        let id = self
            .free
            .lock()
            .map_err(|_| IsolateError::PoolExhausted)?
            .pop()
            .ok_or(IsolateError::PoolExhausted)?;
        let lease = BoxLease {
            id,
            free: Arc::clone(&self.free),
            _permit: permit,
        };
        debug!(id, "leased box id");

        // On init failure the lease drops here and the id goes back
        let sandbox = IsolateBox::init(id, &self.isolate_path, self.cgroup).await?;
        Ok(sandbox.with_lease(lease))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    pub fn cgroup(&self) -> bool {
        self.cgroup
    }
}
