//! React-Refresh registration injection (spec §4.3 step 7). Applied
//! only to `.jsx`/`.tsx` outputs: every exported function/const whose
//! name starts with an uppercase letter gets a trailing
//! `$RefreshReg$(Component, "<filename>:Component")` call, plus a
//! terminating `import.meta.hot.accept()`-equivalent.
//!
//! Implemented as a post-codegen string pass rather than an swc
//! visitor: the shape is "append a call referencing an already-bound
//! top-level name after its declaration", which a regex over codegen'd
//! source expresses more directly than threading a new AST visitor
//! through the transform pipeline for a single call-site pattern — the
//! same trade-off the spec itself makes for alias rewriting and npm
//! redirection.

use once_cell::sync::Lazy;
use regex::Regex;

static EXPORT_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+function\s+([A-Z]\w*)\s*\(").unwrap());
static EXPORT_CONST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+(?:default\s+)?const\s+([A-Z]\w*)\s*=").unwrap());
static EXPORT_DEFAULT_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^export\s+default\s+function\s+([A-Z]\w*)?\s*\(").unwrap()
});

/// Appends `$RefreshReg$` registration calls for every uppercase-named
/// exported component, plus the HMR-accept terminator.
pub fn inject_react_refresh(code: &str, filename: &str) -> String {
    let mut names: Vec<String> = Vec::new();
    for re in [&*EXPORT_FUNCTION, &*EXPORT_CONST] {
        for caps in re.captures_iter(code) {
            names.push(caps[1].to_string());
        }
    }
    let mut has_default_component = false;
    for caps in EXPORT_DEFAULT_FUNCTION.captures_iter(code) {
        if let Some(name) = caps.get(1) {
            names.push(name.as_str().to_string());
        } else {
            has_default_component = true;
        }
    }

    let mut out = code.to_string();
    out.push('\n');
    for name in &names {
        out.push_str(&format!(
            "if (typeof $RefreshReg$ === 'function') {{ $RefreshReg$({name}, {filename:?} + \":{name}\"); }}\n"
        ));
    }
    if has_default_component {
        out.push_str(&format!(
            "if (typeof $RefreshReg$ === 'function') {{ $RefreshReg$(_default, {filename:?} + \":default\"); }}\n"
        ));
    }
    out.push_str("if (import.meta.hot) { import.meta.hot.accept(); }\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_named_exported_components() {
        let code = "export function Button() { return null; }\n";
        let out = inject_react_refresh(code, "/app/Button.tsx");
        assert!(out.contains("$RefreshReg$(Button"));
        assert!(out.contains("import.meta.hot.accept()"));
    }

    #[test]
    fn ignores_lowercase_exports() {
        let code = "export function useThing() { return 1; }\n";
        let out = inject_react_refresh(code, "/app/hooks.ts");
        assert!(!out.contains("$RefreshReg$(useThing"));
    }
}
