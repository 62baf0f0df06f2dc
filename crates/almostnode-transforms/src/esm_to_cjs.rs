//! The regex-based ESM→CJS safety net (spec §4.3, API handler
//! pipeline): used when `swc_core`'s CJS codegen is unavailable or
//! undesired for a given module. Spec §9 Open Question (b) flags that
//! this will mis-transform code using the strings `import`/`export`
//! inside template literals — DESIGN.md records the decision to keep
//! this simple fallback and prefer routing through swc when possible,
//! exactly as the spec's own note suggests.

use once_cell::sync::Lazy;
use regex::Regex;

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+default\s+").unwrap());
static EXPORT_NAMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s*\{\s*([^}]+)\s*\}\s*;?").unwrap());
static EXPORT_CONST_LET_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+(const|let|var|function|class)\s+(\w+)").unwrap());
static IMPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import\s+(\w+)\s+from\s+['"]([^'"]+)['"];?"#).unwrap()
});

/// `transformEsmToCjsSimple` (spec §4.3/§4.5): converts
/// `export default X` → `module.exports = X;`, `export { a, b }` →
/// `module.exports.a = a; module.exports.b = b;`, and
/// `import x from 'y'` → `const x = require('y').default ?? require('y');`.
pub fn transform_esm_to_cjs_simple(source: &str) -> String {
    let mut out = EXPORT_DEFAULT
        .replace_all(source, "module.exports = ")
        .into_owned();

    out = EXPORT_NAMED
        .replace_all(&out, |caps: &regex::Captures| {
            caps[1]
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|name| {
                    let (local, exported) = match name.split_once(" as ") {
                        Some((l, e)) => (l.trim(), e.trim()),
                        None => (name, name),
                    };
                    format!("module.exports.{exported} = {local};")
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .into_owned();

    out = EXPORT_CONST_LET_VAR
        .replace_all(&out, |caps: &regex::Captures| {
            format!("{} {}", &caps[1], &caps[2])
        })
        .into_owned();

    out = IMPORT_DEFAULT
        .replace_all(&out, |caps: &regex::Captures| {
            format!(
                "const {} = require({:?}).default ?? require({:?});",
                &caps[1], &caps[2], &caps[2]
            )
        })
        .into_owned();

    out
}

/// True if `source` contains a bare (unquoted, statement-level)
/// `import`/`export` keyword — the trigger condition for running the
/// safety net at all (spec §4.5 `loadModule`: "if not `.cjs` and the
/// file contains `\bimport\b` or `\bexport\b`").
pub fn looks_like_esm(source: &str) -> bool {
    static IMPORT_OR_EXPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(import|export)\b").unwrap());
    IMPORT_OR_EXPORT.is_match(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_default_export() {
        let out = transform_esm_to_cjs_simple("export default function handler() {}\n");
        assert!(out.starts_with("module.exports = function handler() {}"));
    }

    #[test]
    fn converts_named_exports() {
        let out = transform_esm_to_cjs_simple("export { a, b };\n");
        assert!(out.contains("module.exports.a = a;"));
        assert!(out.contains("module.exports.b = b;"));
    }

    #[test]
    fn converts_default_import() {
        let out = transform_esm_to_cjs_simple("import x from 'y';\n");
        assert!(out.contains("const x = require(\"y\").default ?? require(\"y\");"));
    }

    #[test]
    fn detects_esm_markers() {
        assert!(looks_like_esm("export default 1;"));
        assert!(!looks_like_esm("module.exports = 1;"));
    }
}
