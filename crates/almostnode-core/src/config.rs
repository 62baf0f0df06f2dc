//! `NextDevServerOptions` (spec §6.4) plus the two "read config without
//! evaluating it" parsers the spec calls for: `tsconfig.json`
//! `compilerOptions.paths`, and `assetPrefix`/`basePath` out of
//! `next.config.{ts,js,mjs}` via a non-evaluating regex scan.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use almostnode_vfs::Vfs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextDevServerOptions {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_pages_dir")]
    pub pages_dir: String,
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default = "default_public_dir")]
    pub public_dir: String,
    pub prefer_app_router: Option<bool>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub asset_prefix: Option<String>,
    pub base_path: Option<String>,
    #[serde(default)]
    pub additional_import_map: IndexMap<String, String>,
    #[serde(default)]
    pub additional_local_packages: Vec<String>,
    pub esm_sh_deps: Option<String>,
    pub cors_proxy: Option<String>,
}

fn default_port() -> u16 {
    3000
}
fn default_root() -> String {
    "/".to_string()
}
fn default_pages_dir() -> String {
    "/pages".to_string()
}
fn default_app_dir() -> String {
    "/app".to_string()
}
fn default_public_dir() -> String {
    "/public".to_string()
}

impl Default for NextDevServerOptions {
    fn default() -> Self {
        NextDevServerOptions {
            port: default_port(),
            root: default_root(),
            pages_dir: default_pages_dir(),
            app_dir: default_app_dir(),
            public_dir: default_public_dir(),
            prefer_app_router: None,
            env: HashMap::new(),
            asset_prefix: None,
            base_path: None,
            additional_import_map: IndexMap::new(),
            additional_local_packages: Vec::new(),
            esm_sh_deps: None,
            cors_proxy: None,
        }
    }
}

impl NextDevServerOptions {
    /// Only `NEXT_PUBLIC_*` keys are serialized into page HTML (spec
    /// §4.2/§6.4's "API env visibility" invariant); everything else
    /// stays server-side, reachable only from API handlers.
    pub fn public_env(&self) -> IndexMap<&str, &str> {
        self.env
            .iter()
            .filter(|(k, _)| k.starts_with("NEXT_PUBLIC_"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    pub fn virtual_prefix(&self) -> String {
        format!("/__virtual__/{}", self.port)
    }
}

/// Strips `//` and `/* */` comments from JSONC-ish config. Real
/// `tsconfig.json` files routinely carry comments; `serde_json` alone
/// can't parse those, and the spec doesn't otherwise mention it, so
/// this ambient pre-pass exists purely so the JSON parse below doesn't
/// choke on a perfectly normal `tsconfig.json`.
fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let mut in_string = false;
    let mut escape = false;
    while let Some((_, c)) = chars.next() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for (_, c2) in chars.by_ref() {
                    if c2 == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = ' ';
                for (_, c2) in chars.by_ref() {
                    if prev == '*' && c2 == '/' {
                        break;
                    }
                    prev = c2;
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Reads `tsconfig.json compilerOptions.paths`, taking the first
/// target per key and stripping the trailing `*` (spec §4.3 step 4).
/// Returns `(prefix, target)` pairs in declaration order.
pub fn read_path_aliases(vfs: &dyn Vfs, root: &str) -> Vec<(String, String)> {
    let path = format!("{}/tsconfig.json", root.trim_end_matches('/'));
    let Ok(raw) = vfs.read_file_utf8(&path) else {
        return Vec::new();
    };
    let cleaned = strip_jsonc_comments(&raw);
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&cleaned) else {
        return Vec::new();
    };
    let Some(paths) = json
        .get("compilerOptions")
        .and_then(|c| c.get("paths"))
        .and_then(|p| p.as_object())
    else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (prefix, targets) in paths {
        let Some(first) = targets.as_array().and_then(|a| a.first()).and_then(|v| v.as_str())
        else {
            continue;
        };
        out.push((
            prefix.trim_end_matches('*').to_string(),
            first.trim_end_matches('*').to_string(),
        ));
    }
    out
}

static ASSET_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"assetPrefix\s*:\s*['"]([^'"]*)['"]"#).unwrap());
static BASE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"basePath\s*:\s*['"]([^'"]*)['"]"#).unwrap());

/// Reads `assetPrefix`/`basePath` out of `next.config.{ts,js,mjs}`
/// without evaluating it — spec §6.4 explicitly calls for "a
/// non-evaluating regex parser" here, matching the teacher's own
/// posture of deserializing rather than executing user config.
pub fn read_next_config_overrides(vfs: &dyn Vfs, root: &str) -> (Option<String>, Option<String>) {
    let root = root.trim_end_matches('/');
    for name in ["next.config.ts", "next.config.js", "next.config.mjs"] {
        let path = format!("{root}/{name}");
        if let Ok(src) = vfs.read_file_utf8(&path) {
            let asset_prefix = ASSET_PREFIX_RE
                .captures(&src)
                .map(|c| c[1].to_string());
            let base_path = BASE_PATH_RE.captures(&src).map(|c| c[1].to_string());
            if asset_prefix.is_some() || base_path.is_some() {
                return (asset_prefix, base_path);
            }
        }
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    #[test]
    fn public_env_filters_non_public_keys() {
        let mut opts = NextDevServerOptions::default();
        opts.env.insert("NEXT_PUBLIC_API".into(), "https://x".into());
        opts.env.insert("SECRET_KEY".into(), "shh".into());
        let public = opts.public_env();
        assert!(public.contains_key("NEXT_PUBLIC_API"));
        assert!(!public.contains_key("SECRET_KEY"));
    }

    #[test]
    fn reads_path_aliases_from_tsconfig_with_comments() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/tsconfig.json",
            r#"{
                // comment
                "compilerOptions": {
                    "paths": {
                        "@/*": ["./src/*"]
                    }
                }
            }"#,
        );
        let aliases = read_path_aliases(&vfs, "/");
        assert_eq!(aliases, vec![("@/".to_string(), "./src/".to_string())]);
    }

    #[test]
    fn reads_asset_prefix_and_base_path_without_eval() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/next.config.js",
            r#"module.exports = { assetPrefix: '/cdn', basePath: '/docs' };"#,
        );
        let (prefix, base) = read_next_config_overrides(&vfs, "/");
        assert_eq!(prefix.as_deref(), Some("/cdn"));
        assert_eq!(base.as_deref(), Some("/docs"));
    }
}
