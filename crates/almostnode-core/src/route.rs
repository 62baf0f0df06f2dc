//! Route resolution (spec §4.1): Pages Router file probing, App Router
//! segment-tree walking, and the bare-import extension probe used by
//! the transform pipeline. Pure functions over `&dyn Vfs` — stateless,
//! as spec §3's lifecycle note requires.
//!
//! Grounded on the segment-tree walk shape of the teacher's
//! `next_app::app_page_entry`/`app_route_entry` (outermost-layout
//! collection, terminal `page.{ext}` requirement) and on the
//! `other_examples` Pages Router file-probe precedent
//! (`next-core-src-page_source.rs`, `next-core-src-router.rs`).

use indexmap::IndexMap;

use almostnode_vfs::Vfs;

use crate::model::{AppRoute, AppRouteHandler, PageRoute, ParamValue, Params, SegmentKind};

/// Extension probe order used everywhere a bare file needs an
/// extension guessed: `.tsx > .jsx > .ts > .js` (spec §8 "Route
/// determinism").
pub const EXTENSIONS: &[&str] = &["tsx", "jsx", "ts", "js"];

const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS",
];

fn probe_file(vfs: &dyn Vfs, dir: &str, stem: &str) -> Option<String> {
    for ext in EXTENSIONS {
        let candidate = format!("{dir}/{stem}.{ext}");
        if vfs.is_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// `resolveFileWithExtension` (spec §4.1): probes `.tsx, .jsx, .ts, .js`
/// for a bare import request with no extension.
pub fn resolve_file_with_extension(vfs: &dyn Vfs, request_path: &str) -> Option<String> {
    for ext in EXTENSIONS {
        let candidate = format!("{request_path}.{ext}");
        if vfs.is_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// `resolvePageFile` (spec §4.1). URL segments are matched first
/// against static files/directories; if no static hit exists the
/// directory is scanned for dynamic siblings, picking the most
/// specific kind (static > `[x]` > `[[...x]]` > `[...x]`) with ties on
/// longest static prefix, then lexicographic order.
pub fn resolve_page_file(vfs: &dyn Vfs, pages_dir: &str, pathname: &str) -> Option<PageRoute> {
    let pages_dir = pages_dir.trim_end_matches('/');
    if pathname == "/" {
        return probe_file(vfs, pages_dir, "index")
            .map(|file| PageRoute { file, params: Params::new() });
    }

    let segments: Vec<&str> = pathname.trim_matches('/').split('/').collect();
    resolve_segments(vfs, pages_dir, &segments, "index")
        .map(|(file, params)| PageRoute { file, params })
}

/// `resolveApiFile` (spec §4.1): identical rule under `<pagesDir>/api`.
pub fn resolve_api_file(vfs: &dyn Vfs, pages_dir: &str, pathname: &str) -> Option<PageRoute> {
    let api_dir = format!("{}/api", pages_dir.trim_end_matches('/'));
    let rel = pathname.strip_prefix("/api").unwrap_or(pathname);
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        return probe_file(vfs, &api_dir, "index")
            .map(|file| PageRoute { file, params: Params::new() });
    }
    let segments: Vec<&str> = rel.split('/').collect();
    resolve_segments(vfs, &api_dir, &segments, "index")
        .map(|(file, params)| PageRoute { file, params })
}

/// Walks `dir` matching `segments` one at a time, trying a static
/// file/directory hit first and falling back to dynamic siblings.
fn resolve_segments(
    vfs: &dyn Vfs,
    dir: &str,
    segments: &[&str],
    index_stem: &str,
) -> Option<(String, Params)> {
    let (head, rest) = segments.split_first()?;
    let is_last = rest.is_empty();

    // 1. Exact static file at this position.
    if is_last {
        if let Some(file) = probe_file(vfs, dir, head) {
            return Some((file, Params::new()));
        }
        let subdir = format!("{dir}/{head}");
        if vfs.is_directory(&subdir) {
            if let Some(file) = probe_file(vfs, &subdir, index_stem) {
                return Some((file, Params::new()));
            }
        }
    } else {
        let subdir = format!("{dir}/{head}");
        if vfs.is_directory(&subdir) {
            if let Some(result) = resolve_segments(vfs, &subdir, rest, index_stem) {
                return Some(result);
            }
        }
    }

    // 2. Scan for dynamic siblings, most-specific first.
    let Ok(entries) = vfs.read_dir(dir) else {
        return None;
    };
    let mut candidates: Vec<(SegmentKind, String, String)> = Vec::new();
    for entry in entries {
        if !entry.is_directory() {
            continue;
        }
        let name = &entry.name;
        if let Some(kind) = classify_segment(name) {
            if kind != SegmentKind::Static {
                candidates.push((kind, name.clone(), name.clone()));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    for (kind, name, _) in candidates {
        let subdir = format!("{dir}/{name}");
        match kind {
            SegmentKind::Dynamic => {
                if is_last {
                    if let Some(file) = probe_file(vfs, &subdir, index_stem) {
                        let mut params = Params::new();
                        params.insert(
                            param_name(&name).to_string(),
                            ParamValue::Single(head.to_string()),
                        );
                        return Some((file, params));
                    }
                } else if let Some((file, mut params)) =
                    resolve_segments(vfs, &subdir, rest, index_stem)
                {
                    params.insert(
                        param_name(&name).to_string(),
                        ParamValue::Single(head.to_string()),
                    );
                    return Some((file, params));
                }
            }
            SegmentKind::OptionalCatchAll | SegmentKind::CatchAll => {
                if let Some(file) = probe_file(vfs, &subdir, index_stem) {
                    let bound: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
                    let mut params = Params::new();
                    params.insert(param_name(&name).to_string(), ParamValue::List(bound));
                    return Some((file, params));
                }
            }
            SegmentKind::Static => unreachable!(),
        }
    }

    None
}

/// Classifies a directory/segment name into its dynamic-segment kind,
/// or `None` for a private (`_`-prefixed) segment that must never be
/// selected (spec §8 "Private/group semantics").
fn classify_segment(name: &str) -> Option<SegmentKind> {
    if name.starts_with('_') {
        return None;
    }
    if let Some(inner) = name.strip_prefix("[[...").and_then(|s| s.strip_suffix("]]")) {
        if !inner.is_empty() {
            return Some(SegmentKind::OptionalCatchAll);
        }
    }
    if let Some(inner) = name.strip_prefix("[...").and_then(|s| s.strip_suffix(']')) {
        if !inner.is_empty() {
            return Some(SegmentKind::CatchAll);
        }
    }
    if let Some(inner) = name.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if !inner.is_empty() && !inner.starts_with("...") {
            return Some(SegmentKind::Dynamic);
        }
    }
    Some(SegmentKind::Static)
}

fn param_name(segment: &str) -> &str {
    segment
        .trim_start_matches("[[...")
        .trim_start_matches("[...")
        .trim_start_matches('[')
        .trim_end_matches("]]")
        .trim_end_matches(']')
}

fn is_route_group(name: &str) -> bool {
    name.starts_with('(') && name.ends_with(')')
}

fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

/// `resolveAppRoute` (spec §4.1): walks `appDir` as a segment tree,
/// collecting layouts outermost-first and UI-convention files from the
/// nearest enclosing directory.
pub fn resolve_app_route(vfs: &dyn Vfs, app_dir: &str, pathname: &str) -> Option<AppRoute> {
    let app_dir = app_dir.trim_end_matches('/');
    let segments: Vec<&str> = if pathname == "/" {
        Vec::new()
    } else {
        pathname.trim_matches('/').split('/').collect()
    };

    let mut layouts = Vec::new();
    let mut loading = None;
    let mut error = None;
    let mut not_found = None;
    let mut params = Params::new();

    let page = walk_app_segments(
        vfs,
        app_dir,
        &segments,
        "page",
        &mut layouts,
        &mut loading,
        &mut error,
        &mut not_found,
        &mut params,
    )?;

    Some(AppRoute {
        page,
        layouts,
        params,
        loading,
        error,
        not_found,
    })
}

/// `resolveAppRouteHandler` (spec §4.1): identical traversal, terminal
/// file must be `route.{ext}`.
pub fn resolve_app_route_handler(
    vfs: &dyn Vfs,
    app_dir: &str,
    pathname: &str,
) -> Option<AppRouteHandler> {
    let app_dir = app_dir.trim_end_matches('/');
    let segments: Vec<&str> = if pathname == "/" {
        Vec::new()
    } else {
        pathname.trim_matches('/').split('/').collect()
    };

    let mut layouts = Vec::new();
    let mut loading = None;
    let mut error = None;
    let mut not_found = None;
    let mut params = Params::new();

    let file = walk_app_segments(
        vfs,
        app_dir,
        &segments,
        "route",
        &mut layouts,
        &mut loading,
        &mut error,
        &mut not_found,
        &mut params,
    )?;

    Some(AppRouteHandler { file, params })
}

/// Returns true if the exported function name (case-insensitively)
/// matches a known HTTP method, for the route-handler/method matching
/// rule in spec §4.1.
pub fn is_http_method_export(name: &str) -> bool {
    HTTP_METHODS.iter().any(|m| m.eq_ignore_ascii_case(name))
}

#[allow(clippy::too_many_arguments)]
fn walk_app_segments(
    vfs: &dyn Vfs,
    dir: &str,
    segments: &[&str],
    terminal_stem: &str,
    layouts: &mut Vec<String>,
    loading: &mut Option<String>,
    error: &mut Option<String>,
    not_found: &mut Option<String>,
    params: &mut Params,
) -> Option<String> {
    collect_ui_conventions(vfs, dir, layouts, loading, error, not_found);

    if segments.is_empty() {
        return probe_file(vfs, dir, terminal_stem);
    }

    let (head, rest) = segments.split_first().unwrap();

    // Route groups never consume a URL segment: try descending into
    // every `(group)` child with the *same* remaining segments first.
    if let Ok(entries) = vfs.read_dir(dir) {
        for entry in &entries {
            if entry.is_directory() && is_route_group(&entry.name) {
                let subdir = format!("{dir}/{}", entry.name);
                let mut sub_layouts = layouts.clone();
                let mut sub_loading = loading.clone();
                let mut sub_error = error.clone();
                let mut sub_not_found = not_found.clone();
                let mut sub_params = params.clone();
                if let Some(found) = walk_app_segments(
                    vfs,
                    &subdir,
                    segments,
                    terminal_stem,
                    &mut sub_layouts,
                    &mut sub_loading,
                    &mut sub_error,
                    &mut sub_not_found,
                    &mut sub_params,
                ) {
                    *layouts = sub_layouts;
                    *loading = sub_loading;
                    *error = sub_error;
                    *not_found = sub_not_found;
                    *params = sub_params;
                    return Some(found);
                }
            }
        }
    }

    // Selection priority: (1) exact static (2) single dynamic (3)
    // optional catch-all (4) catch-all.
    let static_dir = format!("{dir}/{head}");
    if !is_private(head) && vfs.is_directory(&static_dir) {
        let mut sub_layouts = layouts.clone();
        let mut sub_loading = loading.clone();
        let mut sub_error = error.clone();
        let mut sub_not_found = not_found.clone();
        let mut sub_params = params.clone();
        if let Some(found) = walk_app_segments(
            vfs,
            &static_dir,
            rest,
            terminal_stem,
            &mut sub_layouts,
            &mut sub_loading,
            &mut sub_error,
            &mut sub_not_found,
            &mut sub_params,
        ) {
            *layouts = sub_layouts;
            *loading = sub_loading;
            *error = sub_error;
            *not_found = sub_not_found;
            *params = sub_params;
            return Some(found);
        }
    }

    let Ok(entries) = vfs.read_dir(dir) else {
        return None;
    };
    let mut dynamic = None;
    let mut optional_catch_all = None;
    let mut catch_all = None;
    for entry in &entries {
        if !entry.is_directory() || is_private(&entry.name) || is_route_group(&entry.name) {
            continue;
        }
        match classify_segment(&entry.name) {
            Some(SegmentKind::Dynamic) if dynamic.is_none() => dynamic = Some(entry.name.clone()),
            Some(SegmentKind::OptionalCatchAll) if optional_catch_all.is_none() => {
                optional_catch_all = Some(entry.name.clone())
            }
            Some(SegmentKind::CatchAll) if catch_all.is_none() => {
                catch_all = Some(entry.name.clone())
            }
            _ => {}
        }
    }

    if let Some(name) = dynamic {
        let subdir = format!("{dir}/{name}");
        let mut sub_layouts = layouts.clone();
        let mut sub_loading = loading.clone();
        let mut sub_error = error.clone();
        let mut sub_not_found = not_found.clone();
        let mut sub_params = params.clone();
        if let Some(found) = walk_app_segments(
            vfs,
            &subdir,
            rest,
            terminal_stem,
            &mut sub_layouts,
            &mut sub_loading,
            &mut sub_error,
            &mut sub_not_found,
            &mut sub_params,
        ) {
            sub_params.insert(param_name(&name).to_string(), ParamValue::Single(head.to_string()));
            *layouts = sub_layouts;
            *loading = sub_loading;
            *error = sub_error;
            *not_found = sub_not_found;
            *params = sub_params;
            return Some(found);
        }
    }

    if let Some(name) = optional_catch_all {
        let subdir = format!("{dir}/{name}");
        if let Some(file) = probe_file(vfs, &subdir, terminal_stem) {
            collect_ui_conventions(vfs, &subdir, layouts, loading, error, not_found);
            let bound: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            params.insert(param_name(&name).to_string(), ParamValue::List(bound));
            return Some(file);
        }
    }

    if let Some(name) = catch_all {
        let subdir = format!("{dir}/{name}");
        if let Some(file) = probe_file(vfs, &subdir, terminal_stem) {
            collect_ui_conventions(vfs, &subdir, layouts, loading, error, not_found);
            let bound: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
            params.insert(param_name(&name).to_string(), ParamValue::List(bound));
            return Some(file);
        }
    }

    None
}

fn collect_ui_conventions(
    vfs: &dyn Vfs,
    dir: &str,
    layouts: &mut Vec<String>,
    loading: &mut Option<String>,
    error: &mut Option<String>,
    not_found: &mut Option<String>,
) {
    if let Some(layout) = probe_file(vfs, dir, "layout") {
        layouts.push(layout);
    }
    if let Some(file) = probe_file(vfs, dir, "loading") {
        *loading = Some(file);
    }
    if let Some(file) = probe_file(vfs, dir, "error") {
        *error = Some(file);
    }
    if let Some(file) = probe_file(vfs, dir, "not-found") {
        *not_found = Some(file);
    }
}

/// `hasAppRouter` (spec §4.1): true iff `appDir/page.{ext}` exists or
/// at least one `page.{ext}` exists anywhere under `appDir`.
pub fn has_app_router(vfs: &dyn Vfs, app_dir: &str) -> bool {
    fn any_page(vfs: &dyn Vfs, dir: &str) -> bool {
        if probe_file(vfs, dir, "page").is_some() {
            return true;
        }
        let Ok(entries) = vfs.read_dir(dir) else {
            return false;
        };
        for entry in entries {
            if entry.is_directory() {
                let subdir = format!("{dir}/{}", entry.name);
                if any_page(vfs, &subdir) {
                    return true;
                }
            }
        }
        false
    }
    let app_dir = app_dir.trim_end_matches('/');
    vfs.is_directory(app_dir) && any_page(vfs, app_dir)
}

/// Used by `/_next/route-info` (spec §4.7 step 5, §8 scenario 2): a
/// plain serializable view of a resolved route for the client router.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouteInfo {
    pub found: bool,
    pub params: IndexMap<String, ParamValue>,
    pub page: Option<String>,
    pub layouts: Vec<String>,
}

impl RouteInfo {
    pub fn not_found() -> Self {
        RouteInfo {
            found: false,
            params: IndexMap::new(),
            page: None,
            layouts: Vec::new(),
        }
    }

    pub fn from_app_route(route: &AppRoute) -> Self {
        RouteInfo {
            found: true,
            params: route.params.clone(),
            page: Some(route.page.clone()),
            layouts: route.layouts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    fn vfs_with(files: &[&str]) -> InMemoryVfs {
        let vfs = InMemoryVfs::new();
        for f in files {
            vfs.seed_file(f, "export default function Page() { return null }");
        }
        vfs
    }

    #[test]
    fn pages_router_static_and_index() {
        let vfs = vfs_with(&["/pages/about.tsx", "/pages/index.tsx", "/pages/blog/index.tsx"]);
        assert_eq!(
            resolve_page_file(&vfs, "/pages", "/about").unwrap().file,
            "/pages/about.tsx"
        );
        assert_eq!(resolve_page_file(&vfs, "/pages", "/").unwrap().file, "/pages/index.tsx");
        assert_eq!(
            resolve_page_file(&vfs, "/pages", "/blog").unwrap().file,
            "/pages/blog/index.tsx"
        );
        assert!(resolve_page_file(&vfs, "/pages", "/missing").is_none());
    }

    #[test]
    fn pages_router_dynamic_param() {
        let vfs = vfs_with(&["/pages/users/[id].tsx"]);
        let route = resolve_page_file(&vfs, "/pages", "/users/42").unwrap();
        assert_eq!(route.file, "/pages/users/[id].tsx");
        assert_eq!(route.params.get("id"), Some(&ParamValue::Single("42".into())));
    }

    #[test]
    fn pages_router_specificity_prefers_static() {
        let vfs = vfs_with(&["/pages/foo.tsx", "/pages/[x].tsx"]);
        let route = resolve_page_file(&vfs, "/pages", "/foo").unwrap();
        assert_eq!(route.file, "/pages/foo.tsx");
    }

    #[test]
    fn pages_router_catch_all_binds_list() {
        let vfs = vfs_with(&["/pages/docs/[...slug].tsx"]);
        let route = resolve_page_file(&vfs, "/pages", "/docs/a/b/c").unwrap();
        assert_eq!(
            route.params.get("slug"),
            Some(&ParamValue::List(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn app_router_resolves_with_layouts() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/layout.tsx", "x");
        vfs.seed_file("/app/users/[id]/page.tsx", "x");
        let route = resolve_app_route(&vfs, "/app", "/users/42").unwrap();
        assert_eq!(route.page, "/app/users/[id]/page.tsx");
        assert_eq!(route.layouts, vec!["/app/layout.tsx".to_string()]);
        assert_eq!(route.params.get("id"), Some(&ParamValue::Single("42".into())));
    }

    #[test]
    fn app_router_route_group_does_not_consume_segment() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/(marketing)/about/page.tsx", "x");
        let route = resolve_app_route(&vfs, "/app", "/about").unwrap();
        assert_eq!(route.page, "/app/(marketing)/about/page.tsx");
    }

    #[test]
    fn app_router_private_dir_never_selected() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/_internal/page.tsx", "x");
        assert!(resolve_app_route(&vfs, "/app", "/_internal").is_none());
    }

    #[test]
    fn app_router_ui_conventions_from_nearest_dir() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/dashboard/loading.tsx", "x");
        vfs.seed_file("/app/dashboard/error.tsx", "x");
        vfs.seed_file("/app/dashboard/page.tsx", "x");
        let route = resolve_app_route(&vfs, "/app", "/dashboard").unwrap();
        assert_eq!(route.loading.as_deref(), Some("/app/dashboard/loading.tsx"));
        assert_eq!(route.error.as_deref(), Some("/app/dashboard/error.tsx"));
    }

    #[test]
    fn has_app_router_detects_nested_pages() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/users/page.tsx", "x");
        assert!(has_app_router(&vfs, "/app"));
        let empty = InMemoryVfs::new();
        empty.seed_dir("/app");
        assert!(!has_app_router(&empty, "/app"));
    }

    #[test]
    fn resolve_app_route_handler_requires_route_file() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/chat/route.ts", "export async function POST(){}");
        let handler = resolve_app_route_handler(&vfs, "/app", "/chat").unwrap();
        assert_eq!(handler.file, "/app/chat/route.ts");
    }

    #[test]
    fn resolve_file_with_extension_probes_in_order() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/util.js", "x");
        assert_eq!(
            resolve_file_with_extension(&vfs, "/lib/util"),
            Some("/lib/util.js".to_string())
        );
    }
}
