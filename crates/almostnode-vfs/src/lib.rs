//! The virtual filesystem contract consumed by every other `almostnode`
//! crate (spec §6.1). This crate owns only the trait and an in-memory
//! reference implementation used across the workspace's tests and demo
//! binary; a real embedder (the Service Worker bridge, in the original
//! design) supplies its own `Vfs` backed by IndexedDB or similar.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

mod memory;
pub use memory::InMemoryVfs;

/// Mirrors Node's `fs.Stats` subset the spec requires: `isFile`/`isDirectory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    kind: EntryKind,
}

impl Stat {
    pub fn file() -> Self {
        Stat { kind: EntryKind::File }
    }

    pub fn directory() -> Self {
        Stat { kind: EntryKind::Directory }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A directory entry name plus its kind, the way `readdirSync(p, { withFileTypes: true })`
/// hands back `Dirent`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("ENOENT: no such file or directory, '{0}'")]
    NotFound(String),
    #[error("EISDIR: illegal operation on a directory, '{0}'")]
    IsDirectory(String),
    #[error("ENOTDIR: not a directory, '{0}'")]
    NotDirectory(String),
    #[error("invalid utf-8 content at '{0}'")]
    InvalidUtf8(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VfsError {
    /// True for the "file doesn't exist" class of errors — the spec's error
    /// handling design maps these (and only these) onto 404 `NotFound`.
    pub fn is_enoent(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Content read back from the VFS: either raw bytes or text, mirroring
/// `readFileSync(p, 'utf8' | undefined)`.
#[derive(Debug, Clone)]
pub enum FileContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl FileContent {
    pub fn as_str(&self) -> Result<&str, VfsError> {
        match self {
            FileContent::Text(s) => Ok(s.as_str()),
            FileContent::Bytes(b) => {
                std::str::from_utf8(b).map_err(|_| VfsError::InvalidUtf8(String::new()))
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FileContent::Text(s) => s.into_bytes(),
            FileContent::Bytes(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Change,
    Rename,
}

impl fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEventType::Change => write!(f, "change"),
            WatchEventType::Rename => write!(f, "rename"),
        }
    }
}

/// A handle returned by `watch`; dropping it does not stop the watch —
/// callers must call `close()` explicitly, matching Node's `FSWatcher`
/// and the spec's "file watchers hold an external close handle" lifecycle
/// note.
pub trait WatchHandle: Send + Sync {
    fn close(&self);
}

pub struct ClosureWatchHandle<F: Fn() + Send + Sync>(F);

impl<F: Fn() + Send + Sync> ClosureWatchHandle<F> {
    pub fn new(f: F) -> Self {
        ClosureWatchHandle(f)
    }
}

impl<F: Fn() + Send + Sync> WatchHandle for ClosureWatchHandle<F> {
    fn close(&self) {
        (self.0)()
    }
}

pub type WatchCallback = Arc<dyn Fn(WatchEventType, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub recursive: bool,
}

/// The synchronous filesystem-like contract the spec demands (§6.1):
/// `exists`, `stat`, `readFileSync`, `readdirSync`, `writeFileSync`,
/// `mkdirSync`, `watch`. Every path is an absolute POSIX path starting
/// with `/`.
pub trait Vfs: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn stat(&self, path: &str) -> VfsResult<Stat>;
    fn read_file(&self, path: &str) -> VfsResult<FileContent>;
    fn read_dir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;
    fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()>;
    fn mkdir(&self, path: &str, recursive: bool) -> VfsResult<()>;
    fn watch(
        &self,
        path: &str,
        options: WatchOptions,
        callback: WatchCallback,
    ) -> Box<dyn WatchHandle>;

    /// Convenience used throughout route resolution and the transform
    /// pipeline: read a UTF-8 text file directly.
    fn read_file_utf8(&self, path: &str) -> VfsResult<String> {
        match self.read_file(path)? {
            FileContent::Text(s) => Ok(s),
            FileContent::Bytes(b) => {
                String::from_utf8(b).map_err(|_| VfsError::InvalidUtf8(path.to_string()))
            }
        }
    }

    fn is_file(&self, path: &str) -> bool {
        self.stat(path).map(|s| s.is_file()).unwrap_or(false)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.stat(path).map(|s| s.is_directory()).unwrap_or(false)
    }
}

/// Joins a directory and a (possibly `./`/`../`-relative) path the way
/// POSIX `path.resolve`/`path.join` would, normalizing `.`/`..` segments
/// without ever escaping above `/`.
pub fn resolve_path(base_dir: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };

    let target = if target.starts_with('/') {
        &target[1..]
    } else {
        target
    };

    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    format!("/{}", segments.join("/"))
}

pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn extname(path: &str) -> &str {
    let base = basename(path);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &base[idx..],
    }
}

/// Registry of `(path, recursive) -> callbacks` used by [`InMemoryVfs`]
/// to emulate `watch`. Kept separate from the map storage so alternate
/// `Vfs` impls can reuse it.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    inner: Mutex<FxHashMap<u64, (String, bool, WatchCallback)>>,
    next_id: Mutex<u64>,
}

impl WatcherRegistry {
    pub(crate) fn register(&self, path: &str, recursive: bool, cb: WatchCallback) -> u64 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        self.inner.lock().insert(id, (path.to_string(), recursive, cb));
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    pub(crate) fn notify(&self, changed_path: &str, event: WatchEventType) {
        for (watched, recursive, cb) in self.inner.lock().values() {
            let matches = if *recursive {
                changed_path == watched || changed_path.starts_with(&format!("{watched}/"))
            } else {
                dirname(changed_path) == *watched || changed_path == watched
            };
            if matches {
                cb(event, changed_path);
            }
        }
    }
}
