//! The module resolver shared by the npm bundle server and the VFS
//! CJS loader (spec §4.4 "using the same algorithm as the CJS
//! loader's resolver", §4.5 `resolveModule`). Builtins win over VFS
//! resolution; `node:` prefixes are stripped before lookup; relative
//! and absolute ids resolve directly, bare ids walk `node_modules`
//! upward from `from_dir`, preferring a package's `exports` map when
//! present and otherwise following `browser` > `module` > `main` >
//! `index.js`.

use serde_json::Value;

use almostnode_vfs::Vfs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Builtin(String),
    File(String),
}

const TRY_EXTENSIONS: &[&str] = &["", ".js", ".json"];

fn try_resolve_file(vfs: &dyn Vfs, base: &str) -> Option<String> {
    for ext in TRY_EXTENSIONS {
        let candidate = format!("{base}{ext}");
        if vfs.is_file(&candidate) && !is_esm_only_cjs_stub(vfs, &candidate) {
            return Some(candidate);
        }
    }
    let index = format!("{}/index.js", base.trim_end_matches('/'));
    if vfs.is_file(&index) {
        return Some(index);
    }
    None
}

/// A `.cjs` file whose first non-whitespace bytes are `throw ` is an
/// ESM-only package's deliberate CJS stub (spec §4.5); skip it so
/// resolution falls through to the next candidate.
fn is_esm_only_cjs_stub(vfs: &dyn Vfs, path: &str) -> bool {
    if !path.ends_with(".cjs") {
        return false;
    }
    match vfs.read_file_utf8(path) {
        Ok(content) => content.trim_start().starts_with("throw "),
        Err(_) => false,
    }
}

fn strip_node_prefix(id: &str) -> &str {
    id.strip_prefix("node:").unwrap_or(id)
}

fn is_relative_or_absolute(id: &str) -> bool {
    id.starts_with("./") || id.starts_with("../") || id.starts_with('/')
}

/// Splits a bare specifier into its top-level package name (preserving
/// `@scope/name`) and the remaining subpath, if any.
fn split_package_and_subpath(id: &str) -> (&str, Option<&str>) {
    if let Some(rest) = id.strip_prefix('@') {
        match rest.find('/') {
            Some(idx) => {
                let pkg_end = idx + 1;
                match rest[pkg_end..].find('/') {
                    Some(sub_idx) => {
                        let pkg = &id[..1 + pkg_end];
                        let subpath = &id[1 + pkg_end + sub_idx + 1..];
                        (pkg, Some(subpath))
                    }
                    None => (id, None),
                }
            }
            None => (id, None),
        }
    } else {
        match id.find('/') {
            Some(idx) => (&id[..idx], Some(&id[idx + 1..])),
            None => (id, None),
        }
    }
}

fn read_package_json(vfs: &dyn Vfs, package_dir: &str) -> Option<Value> {
    let raw = vfs.read_file_utf8(&format!("{package_dir}/package.json")).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Resolves one `exports` condition entry: a string is the target
/// directly; an object nests further conditions, tried in
/// `require`, `import`, `default` order (spec's "standard exports-field
/// matching", simplified to the two conditions the spec names plus a
/// default fallback most real packages also provide).
fn resolve_exports_condition(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            for condition in ["require", "import", "default"] {
                if let Some(v) = map.get(condition) {
                    if let Some(resolved) = resolve_exports_condition(v) {
                        return Some(resolved);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn resolve_via_exports(exports: &Value, subpath: Option<&str>) -> Option<String> {
    let key = match subpath {
        Some(s) => format!("./{s}"),
        None => ".".to_string(),
    };
    match exports {
        Value::String(s) => (key == ".").then(|| s.clone()),
        Value::Object(map) => {
            if let Some(v) = map.get(&key) {
                return resolve_exports_condition(v);
            }
            if key == "." {
                // No string/nested keys starting with `.`: the object
                // itself may be a conditions map for the root entry.
                if !map.keys().any(|k| k.starts_with('.')) {
                    return resolve_exports_condition(exports);
                }
            }
            None
        }
        _ => None,
    }
}

fn resolve_package_main(vfs: &dyn Vfs, package_dir: &str, pkg_json: &Value) -> Option<String> {
    for field in ["browser", "module", "main"] {
        if let Some(Value::String(rel)) = pkg_json.get(field) {
            let base = format!("{package_dir}/{}", rel.trim_start_matches("./"));
            if let Some(resolved) = try_resolve_file(vfs, &base) {
                return Some(resolved);
            }
        }
    }
    try_resolve_file(vfs, &format!("{package_dir}/index"))
}

fn node_modules_dirs(from_dir: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = from_dir.trim_end_matches('/').to_string();
    loop {
        dirs.push(format!("{current}/node_modules"));
        match current.rfind('/') {
            Some(0) | None => break,
            Some(idx) => current.truncate(idx),
        }
    }
    dirs.push("/node_modules".to_string());
    dirs
}

/// Resolves `id` the way spec §4.5 `resolveModule` does, given the
/// requesting module's directory and the builtin module table.
pub fn resolve_module(vfs: &dyn Vfs, from_dir: &str, id: &str, builtins: &[&str]) -> Option<Resolution> {
    let id = strip_node_prefix(id);

    if builtins.contains(&id) {
        return Some(Resolution::Builtin(id.to_string()));
    }

    if is_relative_or_absolute(id) {
        let base = if id.starts_with('/') {
            id.to_string()
        } else {
            normalize_path(&format!("{}/{}", from_dir.trim_end_matches('/'), id))
        };
        return try_resolve_file(vfs, &base).map(Resolution::File);
    }

    let (pkg, subpath) = split_package_and_subpath(id);

    for node_modules in node_modules_dirs(from_dir) {
        let package_dir = format!("{node_modules}/{pkg}");
        if !vfs.is_directory(&package_dir) {
            continue;
        }
        let pkg_json = read_package_json(vfs, &package_dir);

        if let Some(json) = &pkg_json {
            if let Some(exports) = json.get("exports") {
                if let Some(target) = resolve_via_exports(exports, subpath) {
                    let path = format!("{package_dir}/{}", target.trim_start_matches("./"));
                    if let Some(resolved) = try_resolve_file(vfs, &path) {
                        return Some(Resolution::File(resolved));
                    }
                }
            }
        }

        return match subpath {
            None => pkg_json
                .as_ref()
                .and_then(|json| resolve_package_main(vfs, &package_dir, json))
                .map(Resolution::File),
            Some(sub) => try_resolve_file(vfs, &format!("{package_dir}/{sub}")).map(Resolution::File),
        };
    }

    None
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    #[test]
    fn builtin_wins_over_vfs_package() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/path/index.js", "module.exports = {};");
        let resolution = resolve_module(&vfs, "/", "path", &["path", "fs"]);
        assert_eq!(resolution, Some(Resolution::Builtin("path".to_string())));
    }

    #[test]
    fn node_prefix_strips_before_lookup() {
        let vfs = InMemoryVfs::new();
        let resolution = resolve_module(&vfs, "/", "node:path", &["path"]);
        assert_eq!(resolution, Some(Resolution::Builtin("path".to_string())));
    }

    #[test]
    fn resolves_relative_import_with_js_extension() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/util.js", "module.exports = 1;");
        let resolution = resolve_module(&vfs, "/lib", "./util", &[]);
        assert_eq!(resolution, Some(Resolution::File("/lib/util.js".to_string())));
    }

    #[test]
    fn resolves_package_main_field_priority() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/left-pad/package.json",
            r#"{"main": "./src/index.js"}"#,
        );
        vfs.seed_file("/node_modules/left-pad/src/index.js", "module.exports = {};");
        let resolution = resolve_module(&vfs, "/pages", "left-pad", &[]);
        assert_eq!(
            resolution,
            Some(Resolution::File("/node_modules/left-pad/src/index.js".to_string()))
        );
    }

    #[test]
    fn resolves_via_exports_field_subpath() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/pkg/package.json",
            r#"{"exports": {".": "./index.js", "./sub": "./lib/sub.js"}}"#,
        );
        vfs.seed_file("/node_modules/pkg/lib/sub.js", "module.exports = 1;");
        let resolution = resolve_module(&vfs, "/", "pkg/sub", &[]);
        assert_eq!(resolution, Some(Resolution::File("/node_modules/pkg/lib/sub.js".to_string())));
    }

    #[test]
    fn walks_node_modules_upward() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/shared/index.js", "module.exports = 1;");
        let resolution = resolve_module(&vfs, "/a/b/c", "shared", &[]);
        assert_eq!(resolution, Some(Resolution::File("/node_modules/shared/index.js".to_string())));
    }

    #[test]
    fn skips_esm_only_cjs_stub_when_matched_exactly() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/mod.cjs", "throw new Error('ESM only');");
        let resolution = resolve_module(&vfs, "/lib", "./mod.cjs", &[]);
        assert_eq!(resolution, None);
    }
}
