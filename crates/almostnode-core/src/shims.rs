//! Virtual `next/*` shim modules (spec §6.3 `/_next/shims/*`): small
//! hand-written ESM modules that stand in for `next/link`,
//! `next/router`, etc. inside the browser shell. Grounded on the
//! teacher's own import-map idiom (`next_import_map.rs` maps bare
//! specifiers to generated/virtual sources) but expressed here as
//! static strings rather than generated ASTs, since these shims are a
//! fixed, small set rather than something that needs to vary per
//! project.

/// `(shim name, virtual path suffix)` pairs that make up the import
/// map additions in spec §4.2, in the fixed order the HTML generator
/// emits them.
pub const IMPORT_MAP_ENTRIES: &[(&str, &str)] = &[
    ("react", "/_next/shims/react"),
    ("react-dom", "/_next/shims/react-dom"),
    ("react-dom/client", "/_next/shims/react-dom-client"),
    ("next/link", "/_next/shims/link"),
    ("next/router", "/_next/shims/router"),
    ("next/navigation", "/_next/shims/navigation"),
    ("next/head", "/_next/shims/head"),
    ("next/image", "/_next/shims/image"),
    ("next/dynamic", "/_next/shims/dynamic"),
    ("next/script", "/_next/shims/script"),
    ("next/font/google", "/_next/shims/font/google"),
    ("next/font/local", "/_next/shims/font/local"),
];

/// Source for a shim requested at `/_next/shims/<name>` (spec §6.3
/// table). Returns `None` for an unknown shim name (dispatcher falls
/// through to its next dispatch step).
pub fn shim_source(name: &str) -> Option<&'static str> {
    Some(match name {
        "link" => LINK_SHIM,
        "router" => ROUTER_SHIM,
        "navigation" => NAVIGATION_SHIM,
        "head" => HEAD_SHIM,
        "image" => IMAGE_SHIM,
        "dynamic" => DYNAMIC_SHIM,
        "script" => SCRIPT_SHIM,
        "font/google" => FONT_GOOGLE_SHIM,
        "font/local" => FONT_LOCAL_SHIM,
        _ => return None,
    })
}

const LINK_SHIM: &str = r#"
import React from 'react';
export default function Link({ href, children, ...rest }) {
  const onClick = (e) => {
    e.preventDefault();
    window.history.pushState({}, '', href);
    window.dispatchEvent(new PopStateEvent('popstate'));
  };
  return React.createElement('a', { href, onClick, ...rest }, children);
}
"#;

const ROUTER_SHIM: &str = r#"
export function useRouter() {
  return {
    push: (url) => { window.history.pushState({}, '', url); window.dispatchEvent(new PopStateEvent('popstate')); },
    replace: (url) => { window.history.replaceState({}, '', url); window.dispatchEvent(new PopStateEvent('popstate')); },
    back: () => window.history.back(),
    pathname: window.location.pathname,
    query: Object.fromEntries(new URLSearchParams(window.location.search)),
  };
}
export default { useRouter };
"#;

const NAVIGATION_SHIM: &str = r#"
export function useRouter() {
  return {
    push: (url) => { window.history.pushState({}, '', url); window.dispatchEvent(new PopStateEvent('popstate')); },
    replace: (url) => { window.history.replaceState({}, '', url); window.dispatchEvent(new PopStateEvent('popstate')); },
    back: () => window.history.back(),
  };
}
export function usePathname() {
  return window.location.pathname;
}
export function useSearchParams() {
  return new URLSearchParams(window.location.search);
}
export function useParams() {
  return window.__NEXT_ROUTE_PARAMS__ || {};
}
export function notFound() {
  const err = new Error('NEXT_NOT_FOUND');
  err.digest = 'NEXT_NOT_FOUND';
  throw err;
}
"#;

const HEAD_SHIM: &str = r#"
import React from 'react';
export default function Head({ children }) {
  React.useEffect(() => {
    // Intentionally inert: a faithful <head> portal is out of scope.
  }, [children]);
  return null;
}
"#;

const IMAGE_SHIM: &str = r#"
import React from 'react';
export default function Image({ src, alt, ...rest }) {
  return React.createElement('img', { src, alt, ...rest });
}
"#;

const DYNAMIC_SHIM: &str = r#"
import React from 'react';
export default function dynamic(loader, options = {}) {
  return function DynamicComponent(props) {
    const [Component, setComponent] = React.useState(null);
    React.useEffect(() => {
      let cancelled = false;
      loader().then((mod) => {
        if (!cancelled) setComponent(() => mod.default ?? mod);
      });
      return () => { cancelled = true; };
    }, []);
    if (!Component) return options.loading ? React.createElement(options.loading) : null;
    return React.createElement(Component, props);
  };
}
"#;

const SCRIPT_SHIM: &str = r#"
import React from 'react';
export default function Script({ src, strategy, children, ...rest }) {
  React.useEffect(() => {
    if (!src) return;
    const el = document.createElement('script');
    el.src = src;
    Object.entries(rest).forEach(([k, v]) => el.setAttribute(k, v));
    document.body.appendChild(el);
    return () => { document.body.removeChild(el); };
  }, [src]);
  return null;
}
"#;

const FONT_GOOGLE_SHIM: &str = r#"
function makeFont() {
  return () => ({ className: '', style: {}, variable: '' });
}
export const Inter = makeFont();
export const Roboto = makeFont();
export default new Proxy({}, { get: () => makeFont() });
"#;

const FONT_LOCAL_SHIM: &str = r#"
export default function localFont() {
  return { className: '', style: {}, variable: '' };
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_import_map_shim_except_react_has_source() {
        for (specifier, path) in IMPORT_MAP_ENTRIES {
            if specifier.starts_with("react") {
                continue;
            }
            let name = path.strip_prefix("/_next/shims/").unwrap();
            assert!(shim_source(name).is_some(), "missing shim source for {specifier}");
        }
    }
}
