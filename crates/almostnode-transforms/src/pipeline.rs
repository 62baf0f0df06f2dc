//! Orchestrates the passes in the other modules into the two compile
//! pipelines spec §4.3 describes: one for browser-bound source modules
//! (ESM out, content-hash cached), one for API handler modules (CJS
//! out, uncached — handlers execute through `almostnode-require`'s own
//! module cache instead).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use almostnode_core::model::{TransformCache, TransformCacheEntry};
use almostnode_vfs::Vfs;

use crate::alias::resolve_aliases;
use crate::css::{emit_css_module, strip_css_imports};
use crate::esm_to_cjs::{looks_like_esm, transform_esm_to_cjs_simple};
use crate::npm_redirect::{redirect_npm_imports, RedirectOptions};
use crate::refresh::inject_react_refresh;
use crate::swc_pipeline::{compile, Loader, ModuleFormat};

fn extension_of(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => "",
    }
}

fn content_hash(source: &str) -> String {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// The inputs `resolve_aliases`/`redirect_npm_imports` need, threaded
/// through from `NextDevServerOptions` by the caller (`almostnode-server`).
/// Owned rather than borrowed so a caller without a long-lived
/// `NextDevServerOptions` on hand (the handler executor, which only
/// keeps the alias table) can still build one with `..Default::default()`.
#[derive(Default)]
pub struct PipelineOptions {
    pub aliases: Vec<(String, String)>,
    pub port: u16,
    pub additional_local_packages: Vec<String>,
    pub dependencies: HashMap<String, String>,
    pub esm_sh_deps: Option<String>,
}

impl PipelineOptions {
    fn redirect_options(&self) -> RedirectOptions<'_> {
        RedirectOptions {
            additional_local_packages: &self.additional_local_packages,
            dependencies: &self.dependencies,
            esm_sh_deps: self.esm_sh_deps.as_deref(),
        }
    }
}

/// Whether `path` would currently be served out of the transform
/// cache, for the caller's `X-Cache` diagnostic header — recomputes
/// the content hash rather than threading a hit/miss flag back out of
/// [`transform_for_browser`] itself, since the common case (serving a
/// transformed module over HTTP) is dominated by the transform cost
/// anyway, not this cheap re-read.
pub fn cache_hit(vfs: &dyn Vfs, cache: &TransformCache, path: &str) -> bool {
    let Ok(source) = vfs.read_file_utf8(path) else {
        return false;
    };
    let hash = content_hash(&source);
    cache.get(path, &hash).is_some()
}

/// The browser ESM pipeline (spec §4.3 steps 1-8): read from VFS,
/// check the transform cache by content hash, strip/emit CSS, resolve
/// aliases, compile through swc, redirect npm imports, inject
/// React-Refresh for `.jsx`/`.tsx`, then cache and return.
pub fn transform_for_browser(
    vfs: &dyn Vfs,
    cache: &TransformCache,
    path: &str,
    opts: &PipelineOptions,
) -> anyhow::Result<String> {
    let ext = extension_of(path).to_string();

    if ext == "css" {
        return if path.ends_with(".module.css") {
            Ok(emit_css_module(vfs, path))
        } else {
            // A bare (non-module) stylesheet has no JS representation;
            // callers serve it directly. The transform pipeline is only
            // ever asked for `.module.css` in practice (spec §4.1 step 3
            // routes non-module CSS to the stylesheet link tag instead).
            Ok(String::new())
        };
    }

    let source = vfs.read_file_utf8(path)?;
    let hash = content_hash(&source);
    if let Some(cached) = cache.get(path, &hash) {
        return Ok(cached.code);
    }

    // CSS import lines are stripped here; the caller resolves each
    // specifier to an absolute VFS path and re-enters the module graph
    // for it ahead of this call, so a `.module.css` import keeps working
    // because the resolved target carries the generated `styles` object,
    // not this source file.
    let working = strip_css_imports(&source);
    let working = resolve_aliases(&working, &opts.aliases, opts.port);

    let loader = Loader::from_extension(&ext);
    let mut compiled = compile(&working, path, loader, ModuleFormat::Esm)?;

    compiled = redirect_npm_imports(vfs, &compiled, &opts.redirect_options());

    if matches!(loader, Loader::Jsx | Loader::Tsx) {
        compiled = inject_react_refresh(&compiled, path);
    }

    cache.insert(
        path.to_string(),
        TransformCacheEntry {
            code: compiled.clone(),
            hash,
        },
    );

    Ok(compiled)
}

/// The CJS pipeline for API handler modules (spec §4.3 "Pipeline for
/// API handlers" / §4.5 `loadModule`): resolve aliases, then prefer
/// the real swc CJS codegen; if swc's parse rejects the source (e.g. a
/// plain `.js` file already in CJS with syntax swc's ES grammar
/// dislikes) and the source still looks like ESM, fall back to the
/// regex safety net rather than failing the whole `require()` call.
pub fn transform_for_handler(source: &str, path: &str, opts: &PipelineOptions) -> String {
    let aliased = resolve_aliases(source, &opts.aliases, opts.port);
    let ext = extension_of(path);
    let loader = Loader::from_extension(ext);

    match compile(&aliased, path, loader, ModuleFormat::Cjs) {
        Ok(code) => code,
        Err(_) if looks_like_esm(&aliased) => transform_esm_to_cjs_simple(&aliased),
        Err(_) => aliased,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    fn opts() -> PipelineOptions {
        PipelineOptions { port: 3000, ..Default::default() }
    }

    #[test]
    fn transforms_simple_static_page() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/pages/index.tsx",
            "export default function Home() { return <div>hi</div>; }\n",
        );
        let cache = TransformCache::with_capacity(10);
        let pipeline_opts = opts();
        let out = transform_for_browser(&vfs, &cache, "/pages/index.tsx", &pipeline_opts).unwrap();
        assert!(out.contains("jsx"));
        assert!(out.contains("$RefreshReg$"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_hit_skips_recompile() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/util.ts", "export const x: number = 1;\n");
        let cache = TransformCache::with_capacity(10);
        let pipeline_opts = opts();
        let first = transform_for_browser(&vfs, &cache, "/lib/util.ts", &pipeline_opts).unwrap();
        let second = transform_for_browser(&vfs, &cache, "/lib/util.ts", &pipeline_opts).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn redirects_npm_import_during_browser_pipeline() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/node_modules/left-pad/package.json", r#"{"main":"index.js"}"#);
        vfs.seed_file(
            "/pages/about.tsx",
            "import lp from 'left-pad';\nexport default function About() { return lp; }\n",
        );
        let cache = TransformCache::with_capacity(10);
        let pipeline_opts = opts();
        let out = transform_for_browser(&vfs, &cache, "/pages/about.tsx", &pipeline_opts).unwrap();
        assert!(out.contains("/_npm/left-pad"));
    }

    #[test]
    fn handler_pipeline_emits_cjs_exports() {
        let pipeline_opts = opts();
        let out = transform_for_handler(
            "export default function handler(req, res) { res.status(200).end(); }\n",
            "/pages/api/ping.ts",
            &pipeline_opts,
        );
        assert!(out.contains("exports"));
    }
}
