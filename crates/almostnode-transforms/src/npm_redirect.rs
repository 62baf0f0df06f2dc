//! npm import redirection (spec §4.3 step 6): bare npm specifiers are
//! either left alone (caller-declared local package), redirected to
//! the local `/_npm/*` bundler (package present in VFS
//! `/node_modules`), or redirected to an esm.sh-style CDN URL pinned
//! by the project's declared dependency version.
//!
//! `redirect_npm_imports` is a fixed point after one pass (spec §8):
//! every rewritten specifier becomes an absolute (`/_npm/...`) or
//! fully-qualified (`https://esm.sh/...`) URL, neither of which
//! matches the bare-import pattern below, so a second pass is always a
//! no-op.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use almostnode_vfs::Vfs;

static IMPORT_SPECIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(from\s+|import\()(['"])([^'"]+)(['"])"#).unwrap());

/// True for specifiers the spec calls "bare": starting with a letter
/// or `@`, and not a relative/absolute path.
pub fn is_bare_specifier(specifier: &str) -> bool {
    let starts_ok = specifier
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '@')
        .unwrap_or(false);
    starts_ok
        && !specifier.starts_with("./")
        && !specifier.starts_with("../")
        && !specifier.starts_with('/')
}

/// The top-level package name of a specifier: `@scope/pkg/sub` →
/// `@scope/pkg`, `pkg/sub` → `pkg`.
pub fn top_level_package(specifier: &str) -> &str {
    if let Some(rest) = specifier.strip_prefix('@') {
        match rest.find('/') {
            Some(idx) => &specifier[..idx + 2],
            None => specifier,
        }
    } else {
        match specifier.find('/') {
            Some(idx) => &specifier[..idx],
            None => specifier,
        }
    }
}

pub struct RedirectOptions<'a> {
    pub additional_local_packages: &'a [String],
    pub dependencies: &'a HashMap<String, String>,
    pub esm_sh_deps: Option<&'a str>,
}

/// Redirects every bare npm import specifier in `source` per spec
/// §4.3 step 6 / §8 scenario 5.
pub fn redirect_npm_imports(vfs: &dyn Vfs, source: &str, opts: &RedirectOptions) -> String {
    IMPORT_SPECIFIER
        .replace_all(source, |caps: &regex::Captures| {
            let keyword = &caps[1];
            let quote_open = &caps[2];
            let specifier = &caps[3];
            let quote_close = &caps[4];

            if !is_bare_specifier(specifier) {
                return caps[0].to_string();
            }

            let pkg = top_level_package(specifier);
            if opts
                .additional_local_packages
                .iter()
                .any(|p| p == specifier || p == pkg)
            {
                return caps[0].to_string();
            }

            let node_modules_dir = format!("/node_modules/{pkg}");
            if vfs.is_directory(&node_modules_dir) {
                return format!("{keyword}{quote_open}/_npm/{specifier}{quote_close}");
            }

            let version = opts.dependencies.get(pkg).cloned().unwrap_or_else(|| "latest".to_string());
            let mut url = format!("https://esm.sh/{pkg}@{version}");
            if pkg != specifier {
                let rest = &specifier[pkg.len()..];
                url.push_str(rest);
            }
            if let Some(deps) = opts.esm_sh_deps {
                url.push_str("&deps=");
                url.push_str(deps);
            }
            format!("{keyword}{quote_open}{url}{quote_close}")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    #[test]
    fn redirects_installed_package_to_local_bundler() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/left-pad/package.json",
            r#"{"main":"index.js"}"#,
        );
        let opts = RedirectOptions {
            additional_local_packages: &[],
            dependencies: &HashMap::new(),
            esm_sh_deps: None,
        };
        let out = redirect_npm_imports(&vfs, "import lp from 'left-pad';", &opts);
        assert!(out.contains("from '/_npm/left-pad'"));
    }

    #[test]
    fn redirects_unknown_package_to_esm_sh_pinned_version() {
        let vfs = InMemoryVfs::new();
        let mut deps = HashMap::new();
        deps.insert("unknown-pkg".to_string(), "^1.2.0".to_string());
        let opts = RedirectOptions {
            additional_local_packages: &[],
            dependencies: &deps,
            esm_sh_deps: None,
        };
        let out = redirect_npm_imports(&vfs, "import x from 'unknown-pkg';", &opts);
        assert!(out.contains("https://esm.sh/unknown-pkg@^1.2.0"));
    }

    #[test]
    fn leaves_additional_local_packages_untouched() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/my-lib/package.json", "{}");
        let opts = RedirectOptions {
            additional_local_packages: &["my-lib".to_string()],
            dependencies: &HashMap::new(),
            esm_sh_deps: None,
        };
        let out = redirect_npm_imports(&vfs, "import x from 'my-lib';", &opts);
        assert_eq!(out, "import x from 'my-lib';");
    }

    #[test]
    fn is_idempotent_fixed_point_after_one_pass() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/left-pad/package.json", "{}");
        let opts = RedirectOptions {
            additional_local_packages: &[],
            dependencies: &HashMap::new(),
            esm_sh_deps: None,
        };
        let once = redirect_npm_imports(&vfs, "import lp from 'left-pad';", &opts);
        let twice = redirect_npm_imports(&vfs, &once, &opts);
        assert_eq!(once, twice);
    }
}
