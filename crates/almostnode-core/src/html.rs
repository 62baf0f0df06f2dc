//! HTML shell generation (spec §4.2): import map, React-Refresh
//! preamble, HMR client, and the App/Pages Router bootstrap module.
//!
//! Built as plain string assembly with small escaping helpers rather
//! than a templating crate — grounded on the teacher's
//! `next-core::util::expand_next_js_template`, which expands a static
//! template with `replacements`/`injections` substitutions rather than
//! invoking a templating engine; the equivalent restraint here is not
//! reaching for a template-engine dependency for one document shape.

use indexmap::IndexMap;

use crate::config::NextDevServerOptions;
use crate::model::AppRoute;
use crate::route::RouteInfo;
use crate::shims::IMPORT_MAP_ENTRIES;

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders a value as a JS string literal, safe to splice into an
/// inline `<script>` (used for paths/env values that might otherwise
/// break out of the literal).
pub fn js_string_literal(input: &str) -> String {
    serde_json::to_string(input).unwrap_or_else(|_| "\"\"".to_string())
}

pub struct PageShellInput<'a> {
    pub options: &'a NextDevServerOptions,
    pub pathname: &'a str,
    pub is_app_router: bool,
    /// The resolved route, when one was found; `None` renders the 404
    /// shell (spec §4.2 "A 404 page is returned when no route matches
    /// and no not-found convention file exists").
    pub app_route: Option<&'a AppRoute>,
    pub pages_module_path: Option<&'a str>,
    pub global_css_links: &'a [String],
    pub tailwind_config_script: Option<&'a str>,
}

/// `renderPageShell` (spec §4.2): the single-shot HTML document.
pub fn render_page_shell(input: &PageShellInput) -> String {
    let opts = input.options;
    let base = format!("{}/", opts.virtual_prefix());

    let mut import_map = IndexMap::new();
    for (specifier, path) in IMPORT_MAP_ENTRIES {
        import_map.insert(specifier.to_string(), format!("{}{}", opts.virtual_prefix(), path));
    }
    for (k, v) in &opts.additional_import_map {
        import_map.insert(k.clone(), v.clone());
    }
    let import_map_json = serde_json::to_string(&serde_json::json!({ "imports": import_map }))
        .unwrap_or_else(|_| "{}".to_string());

    let public_env: IndexMap<&str, &str> = opts.public_env();
    let env_json = serde_json::to_string(&public_env).unwrap_or_else(|_| "{}".to_string());

    let css_links: String = input
        .global_css_links
        .iter()
        .map(|href| format!("<link rel=\"stylesheet\" href=\"{}\">\n", escape_html(href)))
        .collect();

    let tailwind_block = input
        .tailwind_config_script
        .map(|script| {
            format!(
                "<script src=\"https://cdn.tailwindcss.com\"></script>\n<script>{script}</script>\n"
            )
        })
        .unwrap_or_default();

    let route_cache_json = match input.app_route {
        Some(route) => {
            serde_json::to_string(&RouteInfo::from_app_route(route)).unwrap_or_else(|_| "null".into())
        }
        None => serde_json::to_string(&RouteInfo::not_found()).unwrap_or_else(|_| "null".into()),
    };

    let params_json = input
        .app_route
        .map(|r| serde_json::to_string(&r.params).unwrap_or_else(|_| "{}".into()))
        .unwrap_or_else(|| "{}".to_string());

    let body_script = if input.is_app_router {
        app_router_bootstrap(opts, input.app_route)
    } else {
        pages_router_bootstrap(opts, input.pages_module_path)
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<base href="{base}">
<script>
window.__NEXT_BASE_PATH__ = {base_path_json};
window.__NEXT_PUBLIC_ENV__ = {env_json};
window.__NEXT_ROUTE_PARAMS__ = {params_json};
window.__NEXT_ROUTE_CACHE__ = {route_cache_json};
</script>
{tailwind_block}{css_links}<script>
{cors_proxy_helper}
</script>
<script type="importmap">{import_map_json}</script>
{react_refresh_preamble}
{hmr_client}
</head>
<body>
<div id="__next"></div>
<script type="module">
{body_script}
</script>
</body>
</html>
"#,
        base_path_json = js_string_literal(opts.base_path.as_deref().unwrap_or("")),
        cors_proxy_helper = cors_proxy_helper_script(opts.cors_proxy.as_deref()),
        react_refresh_preamble = REACT_REFRESH_PREAMBLE,
        hmr_client = HMR_CLIENT_SCRIPT,
    )
}

fn cors_proxy_helper_script(cors_proxy: Option<&str>) -> String {
    match cors_proxy {
        Some(prefix) => format!(
            "window.__NEXT_CORS_PROXY__ = {};\nconst _origFetch = window.fetch;\nwindow.fetch = (input, init) => {{\n  const url = typeof input === 'string' ? input : input.url;\n  if (/^https?:\\/\\//.test(url) && !url.startsWith(window.location.origin)) {{\n    return _origFetch(window.__NEXT_CORS_PROXY__ + encodeURIComponent(url), init);\n  }}\n  return _origFetch(input, init);\n}};",
            js_string_literal(prefix)
        ),
        None => String::new(),
    }
}

/// React-Refresh preamble (spec §4.2): must run before any user module
/// import so `$RefreshReg$`/`$RefreshSig$` exist when a transformed
/// module references them.
const REACT_REFRESH_PREAMBLE: &str = r#"<script type="module">
import RefreshRuntime from "/_next/shims/react-refresh-runtime";
RefreshRuntime.injectIntoGlobalHook(window);
window.$RefreshReg$ = () => {};
window.$RefreshSig$ = () => (type) => type;
window.$RefreshRuntime$ = RefreshRuntime;
</script>"#;

/// HMR client (spec §4.2/§6.5): listens for `next-hmr` messages and
/// re-imports changed modules, cache-busts CSS links, or full-reloads.
const HMR_CLIENT_SCRIPT: &str = r#"<script type="module">
window.addEventListener('message', async (event) => {
  const data = event.data;
  if (!data || data.channel !== 'next-hmr') return;
  if (data.path && data.path.endsWith('.css')) {
    document.querySelectorAll('link[rel="stylesheet"]').forEach((link) => {
      if (link.href.includes(data.path)) {
        const url = new URL(link.href);
        url.searchParams.set('t', String(data.timestamp));
        link.href = url.toString();
      }
    });
    return;
  }
  if (data.path && /\.(jsx|tsx|ts|js)$/.test(data.path)) {
    try {
      await import(data.path + '?t=' + data.timestamp);
      window.$RefreshRuntime$ && window.$RefreshRuntime$.performReactRefresh();
      return;
    } catch (e) {
      console.error(e);
    }
  }
  window.location.reload();
});
</script>"#;

fn app_router_bootstrap(opts: &NextDevServerOptions, route: Option<&AppRoute>) -> String {
    let prefix = opts.virtual_prefix();
    let (page, layouts, loading, error) = match route {
        Some(r) => (
            Some(format!("{prefix}/_next/app{}", r.page)),
            r.layouts
                .iter()
                .map(|l| format!("{prefix}/_next/app{l}"))
                .collect::<Vec<_>>(),
            r.loading.as_ref().map(|l| format!("{prefix}/_next/app{l}")),
            r.error.as_ref().map(|e| format!("{prefix}/_next/app{e}")),
        ),
        None => (None, Vec::new(), None, None),
    };

    format!(
        r#"
import React from "{prefix}/_next/shims/react";
import {{ createRoot }} from "{prefix}/_next/shims/react-dom-client";

async function mount() {{
  const pageUrl = {page_url};
  if (!pageUrl) {{
    document.getElementById('__next').innerHTML = '<h1>404</h1><p>Page not found</p>';
    return;
  }}
  const pageMod = await import(pageUrl);
  const layoutUrls = {layout_urls};
  const layoutMods = await Promise.all(layoutUrls.map((u) => import(u)));
  const errorUrl = {error_url};
  const loadingUrl = {loading_url};
  const ErrorMod = errorUrl ? (await import(errorUrl)).default : null;
  const LoadingMod = loadingUrl ? (await import(loadingUrl)).default : null;
  const Page = pageMod.default;

  let tree = React.createElement(Page, window.__NEXT_ROUTE_PARAMS__ || {{}});
  for (const mod of layoutMods.slice().reverse()) {{
    const Layout = mod.default;
    const child = tree;
    tree = React.createElement(Layout, null, child);
  }}

  class ErrorBoundary extends React.Component {{
    constructor(props) {{ super(props); this.state = {{ hasError: false }}; }}
    static getDerivedStateFromError() {{ return {{ hasError: true }}; }}
    render() {{
      if (this.state.hasError && ErrorMod) return React.createElement(ErrorMod);
      if (this.state.hasError) return React.createElement('pre', null, 'Something went wrong');
      return this.props.children;
    }}
  }}

  const suspenseFallback = LoadingMod ? React.createElement(LoadingMod) : null;
  const app = React.createElement(
    ErrorBoundary,
    null,
    React.createElement(React.Suspense, {{ fallback: suspenseFallback }}, tree)
  );

  const root = createRoot(document.getElementById('__next'));
  root.render(app);
}}

mount();
"#,
        page_url = page.map(|p| js_string_literal(&p)).unwrap_or_else(|| "null".into()),
        layout_urls = format!(
            "[{}]",
            layouts.iter().map(|l| js_string_literal(l)).collect::<Vec<_>>().join(",")
        ),
        error_url = error.map(|e| js_string_literal(&e)).unwrap_or_else(|| "null".into()),
        loading_url = loading.map(|l| js_string_literal(&l)).unwrap_or_else(|| "null".into()),
    )
}

fn pages_router_bootstrap(opts: &NextDevServerOptions, module_path: Option<&str>) -> String {
    let prefix = opts.virtual_prefix();
    match module_path {
        Some(path) => format!(
            r#"
import React from "{prefix}/_next/shims/react";
import {{ createRoot }} from "{prefix}/_next/shims/react-dom-client";
import Page from "{prefix}/_next/pages{path}.js";

const root = createRoot(document.getElementById('__next'));
root.render(React.createElement(Page));
"#
        ),
        None => "document.getElementById('__next').innerHTML = '<h1>404</h1><p>Page not found</p>';"
            .to_string(),
    }
}

/// The literal 404 shell used when no route and no not-found
/// convention file exists (spec §4.2).
pub fn render_not_found_shell(options: &NextDevServerOptions) -> String {
    render_page_shell(&PageShellInput {
        options,
        pathname: "/",
        is_app_router: false,
        app_route: None,
        pages_module_path: None,
        global_css_links: &[],
        tailwind_config_script: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Params;

    #[test]
    fn shell_contains_next_div_and_import_map() {
        let opts = NextDevServerOptions::default();
        let html = render_page_shell(&PageShellInput {
            options: &opts,
            pathname: "/",
            is_app_router: true,
            app_route: Some(&AppRoute {
                page: "/app/page.tsx".into(),
                layouts: vec!["/app/layout.tsx".into()],
                params: Params::new(),
                loading: None,
                error: None,
                not_found: None,
            }),
            pages_module_path: None,
            global_css_links: &[],
            tailwind_config_script: None,
        });
        assert!(html.contains(r#"<div id="__next">"#));
        assert!(html.contains("\"react\""));
        assert!(html.contains("/_next/app/app/page.tsx"));
    }

    #[test]
    fn shell_only_serializes_public_env() {
        let mut opts = NextDevServerOptions::default();
        opts.env.insert("NEXT_PUBLIC_X".into(), "1".into());
        opts.env.insert("SERVER_SECRET".into(), "hidden".into());
        let html = render_page_shell(&PageShellInput {
            options: &opts,
            pathname: "/",
            is_app_router: false,
            app_route: None,
            pages_module_path: Some("/pages/index"),
            global_css_links: &[],
            tailwind_config_script: None,
        });
        assert!(html.contains("NEXT_PUBLIC_X"));
        assert!(!html.contains("hidden"));
    }
}
