use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{
    ClosureWatchHandle, DirEntry, EntryKind, FileContent, Stat, Vfs, VfsError, VfsResult,
    WatchCallback, WatchEventType, WatchHandle, WatcherRegistry, WatchOptions, dirname,
};

#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

/// A plain in-memory VFS used by tests and the standalone demo binary.
/// Not the subject of the spec (the VFS is an external collaborator),
/// but every other crate needs a concrete `Vfs` to exercise against.
pub struct InMemoryVfs {
    nodes: RwLock<FxHashMap<String, Node>>,
    watchers: Arc<WatcherRegistry>,
}

impl Default for InMemoryVfs {
    fn default() -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert("/".to_string(), Node::Directory);
        InMemoryVfs {
            nodes: RwLock::new(nodes),
            watchers: Arc::new(WatcherRegistry::default()),
        }
    }
}

impl InMemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file, creating parent directories as needed. Convenience
    /// for building literal test trees (spec §8 scenarios).
    pub fn seed_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.ensure_parents(path);
        self.nodes
            .write()
            .insert(path.to_string(), Node::File(contents.into()));
    }

    pub fn seed_dir(&self, path: &str) {
        self.ensure_parents(path);
        self.nodes
            .write()
            .entry(path.to_string())
            .or_insert(Node::Directory);
    }

    fn ensure_parents(&self, path: &str) {
        let mut dir = dirname(path);
        let mut to_create = Vec::new();
        loop {
            if self.nodes.read().contains_key(&dir) || dir == "/" {
                break;
            }
            to_create.push(dir.clone());
            dir = dirname(&dir);
        }
        let mut nodes = self.nodes.write();
        nodes.entry("/".to_string()).or_insert(Node::Directory);
        for d in to_create.into_iter().rev() {
            nodes.entry(d).or_insert(Node::Directory);
        }
    }
}

impl Vfs for InMemoryVfs {
    fn exists(&self, path: &str) -> bool {
        self.nodes.read().contains_key(path)
    }

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        match self.nodes.read().get(path) {
            Some(Node::File(_)) => Ok(Stat::file()),
            Some(Node::Directory) => Ok(Stat::directory()),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    fn read_file(&self, path: &str) -> VfsResult<FileContent> {
        match self.nodes.read().get(path) {
            Some(Node::File(bytes)) => Ok(FileContent::Bytes(bytes.clone())),
            Some(Node::Directory) => Err(VfsError::IsDirectory(path.to_string())),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    fn read_dir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => return Err(VfsError::NotDirectory(path.to_string())),
            None => return Err(VfsError::NotFound(path.to_string())),
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let mut out = Vec::new();
        for (candidate, node) in nodes.iter() {
            if candidate == path {
                continue;
            }
            if let Some(rest) = candidate.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    out.push(DirEntry {
                        name: rest.to_string(),
                        kind: match node {
                            Node::File(_) => EntryKind::File,
                            Node::Directory => EntryKind::Directory,
                        },
                    });
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.ensure_parents(path);
        self.nodes
            .write()
            .insert(path.to_string(), Node::File(data.to_vec()));
        self.watchers.notify(path, WatchEventType::Change);
        Ok(())
    }

    fn mkdir(&self, path: &str, recursive: bool) -> VfsResult<()> {
        if recursive {
            self.ensure_parents(path);
            self.nodes
                .write()
                .entry(path.to_string())
                .or_insert(Node::Directory);
            Ok(())
        } else {
            let parent = dirname(path);
            if !self.nodes.read().contains_key(&parent) {
                return Err(VfsError::NotFound(parent));
            }
            self.nodes
                .write()
                .entry(path.to_string())
                .or_insert(Node::Directory);
            Ok(())
        }
    }

    fn watch(
        &self,
        path: &str,
        options: WatchOptions,
        callback: WatchCallback,
    ) -> Box<dyn WatchHandle> {
        let id = self
            .watchers
            .register(path, options.recursive, callback);
        let watchers = self.watchers.clone();
        Box::new(ClosureWatchHandle::new(move || watchers.unregister(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_and_reads_files() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/page.tsx", "export default () => null;");
        assert!(vfs.exists("/app"));
        assert!(vfs.is_directory("/app"));
        assert!(vfs.is_file("/app/page.tsx"));
        assert_eq!(
            vfs.read_file_utf8("/app/page.tsx").unwrap(),
            "export default () => null;"
        );
    }

    #[test]
    fn read_dir_lists_immediate_children_only() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/users/[id]/page.tsx", "x");
        vfs.seed_file("/app/layout.tsx", "x");
        let entries = vfs.read_dir("/app").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["layout.tsx", "users"]);
    }

    #[test]
    fn not_found_is_enoent() {
        let vfs = InMemoryVfs::new();
        let err = vfs.read_file("/nope.ts").unwrap_err();
        assert!(err.is_enoent());
    }

    #[test]
    fn watch_fires_on_write() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let vfs = InMemoryVfs::new();
        vfs.seed_dir("/pages");
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = vfs.watch(
            "/pages",
            WatchOptions { recursive: true },
            Arc::new(move |_evt, _path| fired2.store(true, Ordering::SeqCst)),
        );
        vfs.write_file("/pages/index.tsx", b"x").unwrap();
        assert!(fired.load(Ordering::SeqCst));
        handle.close();
    }
}
