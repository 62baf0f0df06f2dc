//! The `/_npm/*` bundle server (spec §4.4): resolves a bare npm
//! specifier against VFS `/node_modules` using the same resolver as
//! the CJS loader (`almostnode_core::resolve`), walks its transitive
//! dependency graph, and emits a single browser-runnable ESM chunk
//! with named and default exports preserved.
//!
//! A real `esbuild`/`swc_bundler` pass assumes filesystem-backed
//! module resolution; this crate's `Resolve` source is an injected
//! `&dyn Vfs`, so bundling here is a purpose-built worklist walk over
//! `almostnode_core::resolve` results instead (DESIGN.md records this
//! as a deliberate divergence from the teacher's `swc_bundler` usage).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use almostnode_core::resolve::{resolve_module, Resolution};
use almostnode_transforms::swc_pipeline::{compile, Loader, ModuleFormat};
use almostnode_vfs::Vfs;

static REQUIRE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\((['"])([^'"]+)\1\)"#).unwrap());

/// Cache keyed by the requested specifier (spec §4.4): cleared in full
/// on `clear_installed_packages_cache`, served with an immutable
/// `Cache-Control` header by the caller.
#[derive(Default)]
pub struct NpmBundleCache {
    entries: Mutex<HashMap<String, String>>,
}

impl NpmBundleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, specifier: &str) -> Option<String> {
        self.entries.lock().get(specifier).cloned()
    }

    pub fn insert(&self, specifier: String, bundle: String) {
        self.entries.lock().insert(specifier, bundle);
    }

    /// `clearInstalledPackagesCache()` (spec §4.4).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct GraphModule {
    /// CJS source with every `require("...")` call rewritten to the
    /// resolved absolute path (or a `builtin:<name>` pseudo-id).
    cjs_source: String,
}

fn module_id_for(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Builtin(name) => format!("builtin:{name}"),
        Resolution::File(path) => path.clone(),
    }
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

fn extension_of(path: &str) -> &str {
    path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// Walks the dependency graph starting at `entry_id`, registering one
/// [`GraphModule`] per visited file. Builtins are registered as an
/// empty-exports stub: almostnode targets a browser runtime, so a
/// package actually requiring a Node builtin at bundle time has no
/// meaningful browser behavior to give it beyond not crashing the
/// bundle.
fn walk_graph(vfs: &dyn Vfs, entry_id: &str) -> anyhow::Result<HashMap<String, GraphModule>> {
    let mut visited: HashMap<String, GraphModule> = HashMap::new();
    let mut worklist = vec![entry_id.to_string()];

    while let Some(id) = worklist.pop() {
        if visited.contains_key(&id) {
            continue;
        }
        if let Some(builtin) = id.strip_prefix("builtin:") {
            tracing::debug!(builtin, "npm bundle: registering empty builtin stub");
            visited.insert(id.clone(), GraphModule {
                cjs_source: "module.exports = {};".to_string(),
            });
            continue;
        }

        let source = vfs.read_file_utf8(&id)?;
        let loader = Loader::from_extension(extension_of(&id));
        let cjs = compile(&source, &id, loader, ModuleFormat::Cjs)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let dir = dirname(&id);
        let mut rewritten = String::with_capacity(cjs.len());
        let mut last_end = 0;
        for caps in REQUIRE_CALL.captures_iter(&cjs) {
            let whole = caps.get(0).unwrap();
            let specifier = &caps[2];
            rewritten.push_str(&cjs[last_end..whole.start()]);
            match resolve_module(vfs, &dir, specifier, &[]) {
                Some(resolution) => {
                    let dep_id = module_id_for(&resolution);
                    rewritten.push_str(&format!("require({dep_id:?})"));
                    worklist.push(dep_id);
                }
                None => {
                    // Unresolvable dependency (e.g. a Node builtin the
                    // bundle target doesn't declare): leave the call
                    // untouched so a clear ReferenceError surfaces
                    // client-side rather than silently bundling nothing.
                    rewritten.push_str(whole.as_str());
                }
            }
            last_end = whole.end();
        }
        rewritten.push_str(&cjs[last_end..]);

        visited.insert(id, GraphModule { cjs_source: rewritten });
    }

    Ok(visited)
}

static EXPORT_NAMED_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s*\{\s*([^}]+)\s*\}\s*;?").unwrap());
static EXPORT_DECL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+(?:const|let|var|function\*?|class)\s+(\w+)").unwrap());
static EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^export\s+default\b").unwrap());

/// Scans the entry module's *original* (pre-CJS) source for its static
/// export surface, since ESM re-export statements must name their
/// bindings statically — unlike CJS, a bundle can't re-export
/// "whatever the module happened to attach to `module.exports`".
fn entry_export_names(original_source: &str) -> (bool, Vec<String>) {
    let mut names = Vec::new();
    for caps in EXPORT_NAMED_LIST.captures_iter(original_source) {
        for name in caps[1].split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let local = name.split(" as ").next().unwrap_or(name).trim();
            names.push(local.to_string());
        }
    }
    for caps in EXPORT_DECL_NAME.captures_iter(original_source) {
        names.push(caps[1].to_string());
    }
    let has_default = EXPORT_DEFAULT.is_match(original_source);
    (has_default, names)
}

/// Bundles `specifier` into a single ESM chunk (spec §4.4). Resolution
/// uses the same algorithm `almostnode-require` uses for `require()`.
pub fn bundle_npm_specifier(vfs: &dyn Vfs, specifier: &str) -> anyhow::Result<String> {
    let resolution = resolve_module(vfs, "/", specifier, &[])
        .ok_or_else(|| anyhow::anyhow!("cannot resolve npm specifier '{specifier}'"))?;
    let Resolution::File(entry_path) = resolution else {
        anyhow::bail!("npm specifier '{specifier}' resolved to a builtin, not a package");
    };

    let original_source = vfs.read_file_utf8(&entry_path)?;
    let (has_default, named) = entry_export_names(&original_source);

    let graph = walk_graph(vfs, &entry_path)?;

    let mut runtime = String::new();
    runtime.push_str("const __modules = {};\nconst __cache = {};\n");
    runtime.push_str("function __require(id) {\n");
    runtime.push_str("  if (__cache[id]) return __cache[id].exports;\n");
    runtime.push_str("  const mod = { exports: {} };\n");
    runtime.push_str("  __cache[id] = mod;\n");
    runtime.push_str("  __modules[id](mod, mod.exports, __require);\n");
    runtime.push_str("  return mod.exports;\n");
    runtime.push_str("}\n");

    for (id, module) in &graph {
        runtime.push_str(&format!(
            "__modules[{id:?}] = function(module, exports, require) {{\n{}\n}};\n",
            module.cjs_source
        ));
    }

    runtime.push_str(&format!("const __entry = __require({entry_path:?});\n"));
    if has_default {
        runtime.push_str("export default __entry.default !== undefined ? __entry.default : __entry;\n");
    } else {
        runtime.push_str("export default __entry;\n");
    }
    for name in &named {
        runtime.push_str(&format!("export const {name} = __entry.{name};\n"));
    }

    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    #[test]
    fn bundles_single_file_package_with_default_export() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/left-pad/package.json",
            r#"{"main": "index.js"}"#,
        );
        vfs.seed_file(
            "/node_modules/left-pad/index.js",
            "export default function leftPad(s, n) { return s.padStart(n); }\n",
        );
        let out = bundle_npm_specifier(&vfs, "left-pad").unwrap();
        assert!(out.contains("export default"));
        assert!(out.contains("__require"));
    }

    #[test]
    fn preserves_named_exports_like_use_chat_marker() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/ai/package.json",
            r#"{"main": "index.js"}"#,
        );
        vfs.seed_file(
            "/node_modules/ai/index.js",
            "export function useChat() { return {}; }\nexport default useChat;\n",
        );
        let out = bundle_npm_specifier(&vfs, "ai").unwrap();
        assert!(out.contains("export const useChat = __entry.useChat;"));
    }

    #[test]
    fn bundles_transitive_relative_dependency() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/pkg/package.json", r#"{"main": "index.js"}"#);
        vfs.seed_file(
            "/node_modules/pkg/index.js",
            "import { helper } from './helper.js';\nexport default function run() { return helper(); }\n",
        );
        vfs.seed_file(
            "/node_modules/pkg/helper.js",
            "export function helper() { return 1; }\n",
        );
        let out = bundle_npm_specifier(&vfs, "pkg").unwrap();
        assert!(out.contains("/node_modules/pkg/helper.js"));
    }

    #[test]
    fn cache_clears_on_clear_installed_packages_cache() {
        let cache = NpmBundleCache::new();
        cache.insert("left-pad".to_string(), "export default 1;".to_string());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
