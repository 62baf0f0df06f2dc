//! The three package-metadata caches spec §3 names alongside the
//! transform/module caches: `PackageJsonCache` (parsed `package.json`
//! objects keyed by path, with a null-memo for parse failures so a
//! malformed file isn't re-read on every resolve), and the
//! `installedPackages`/`dependencies` lazily-computed sets that derive
//! from it. All three share one invalidation hook,
//! `clear_installed_packages_cache()`, the way `almostnode-npm`'s
//! bundle cache is cleared by the same call.
//!
//! Built the way the teacher's own `PackageJsonCache` in `next-core`
//! memoizes parsed `package.json`s per directory rather than
//! re-parsing on every module resolution.

use std::collections::HashMap;
use std::collections::HashSet;

use indexmap::IndexMap;
use parking_lot::Mutex;

use almostnode_vfs::Vfs;

/// Parsed `package.json` objects keyed by absolute path. A `None` entry
/// means the file exists but failed to parse (or doesn't exist) —
/// memoized so a broken `package.json` isn't re-read on every lookup.
#[derive(Default)]
pub struct PackageJsonCache {
    entries: Mutex<IndexMap<String, Option<serde_json::Value>>>,
}

impl PackageJsonCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vfs: &dyn Vfs, path: &str) -> Option<serde_json::Value> {
        if let Some(cached) = self.entries.lock().get(path) {
            return cached.clone();
        }
        let parsed = vfs
            .read_file_utf8(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        self.entries.lock().insert(path.to_string(), parsed.clone());
        parsed
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn list_node_modules(vfs: &dyn Vfs, root: &str) -> HashSet<String> {
    let dir = format!("{}/node_modules", root.trim_end_matches('/'));
    let mut names = HashSet::new();
    let Ok(entries) = vfs.read_dir(&dir) else {
        return names;
    };
    for entry in entries {
        if !entry.is_directory() {
            continue;
        }
        if entry.name.starts_with('@') {
            let scope_dir = format!("{dir}/{}", entry.name);
            let Ok(scoped) = vfs.read_dir(&scope_dir) else {
                continue;
            };
            for pkg in scoped {
                if pkg.is_directory() {
                    names.insert(format!("{}/{}", entry.name, pkg.name));
                }
            }
        } else {
            names.insert(entry.name.clone());
        }
    }
    names
}

fn read_dependencies(
    vfs: &dyn Vfs,
    package_json_cache: &PackageJsonCache,
    root: &str,
) -> HashMap<String, String> {
    let path = format!("{}/package.json", root.trim_end_matches('/'));
    let Some(json) = package_json_cache.get(vfs, &path) else {
        return HashMap::new();
    };
    let mut out = HashMap::new();
    for field in ["dependencies", "devDependencies"] {
        let Some(map) = json.get(field).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, version) in map {
            if let Some(version) = version.as_str() {
                out.entry(name.clone()).or_insert_with(|| version.to_string());
            }
        }
    }
    out
}

/// Bundles the three package-metadata caches spec §3 describes
/// together: `installedPackages`/`dependencies` both derive from
/// `PackageJsonCache` and all three invalidate on the same call, so
/// one struct owns the invalidation order rather than three
/// independently-reset globals.
#[derive(Default)]
pub struct PackageCaches {
    package_json: PackageJsonCache,
    installed: Mutex<Option<HashSet<String>>>,
    dependencies: Mutex<Option<HashMap<String, String>>>,
}

impl PackageCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_json(&self, vfs: &dyn Vfs, path: &str) -> Option<serde_json::Value> {
        self.package_json.get(vfs, path)
    }

    /// `installedPackages` (spec §3): the set of package names
    /// physically present under `/node_modules`, handling `@scope/*`
    /// one level deeper than a plain package directory.
    pub fn installed_packages(&self, vfs: &dyn Vfs, root: &str) -> HashSet<String> {
        let mut slot = self.installed.lock();
        if slot.is_none() {
            *slot = Some(list_node_modules(vfs, root));
        }
        slot.as_ref().unwrap().clone()
    }

    /// `dependencies` (spec §3): `dependencies` merged with
    /// `devDependencies` from the project root `package.json`.
    pub fn dependencies(&self, vfs: &dyn Vfs, root: &str) -> HashMap<String, String> {
        let mut slot = self.dependencies.lock();
        if slot.is_none() {
            *slot = Some(read_dependencies(vfs, &self.package_json, root));
        }
        slot.as_ref().unwrap().clone()
    }

    /// `clearInstalledPackagesCache()` (spec §3/§4.4): invalidates all
    /// three caches, so installing a dependency mid-session doesn't
    /// leave `installedPackages`/`dependencies` stale.
    pub fn clear_installed_packages_cache(&self) {
        self.package_json.clear();
        *self.installed.lock() = None;
        *self.dependencies.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    #[test]
    fn package_json_cache_memoizes_parse_failure() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/broken/package.json", "not json");
        let cache = PackageJsonCache::new();
        assert!(cache.get(&vfs, "/node_modules/broken/package.json").is_none());
        assert!(cache.get(&vfs, "/node_modules/broken/package.json").is_none());
    }

    #[test]
    fn installed_packages_handles_scoped_one_level_deeper() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/left-pad/package.json", "{}");
        vfs.seed_file("/node_modules/@scope/pkg/package.json", "{}");
        let caches = PackageCaches::new();
        let names = caches.installed_packages(&vfs, "/");
        assert!(names.contains("left-pad"));
        assert!(names.contains("@scope/pkg"));
    }

    #[test]
    fn dependencies_merges_dev_and_regular() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/package.json",
            r#"{"dependencies":{"react":"^18.0.0"},"devDependencies":{"typescript":"^5.0.0"}}"#,
        );
        let caches = PackageCaches::new();
        let deps = caches.dependencies(&vfs, "/");
        assert_eq!(deps.get("react").map(String::as_str), Some("^18.0.0"));
        assert_eq!(deps.get("typescript").map(String::as_str), Some("^5.0.0"));
    }

    #[test]
    fn clear_installed_packages_cache_forces_recompute() {
        let vfs = InMemoryVfs::new();
        vfs.seed_dir("/node_modules");
        let caches = PackageCaches::new();
        assert!(caches.installed_packages(&vfs, "/").is_empty());
        vfs.seed_file("/node_modules/added/package.json", "{}");
        assert!(caches.installed_packages(&vfs, "/").is_empty());
        caches.clear_installed_packages_cache();
        assert!(caches.installed_packages(&vfs, "/").contains("added"));
    }
}
