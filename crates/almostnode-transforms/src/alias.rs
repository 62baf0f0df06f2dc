//! Path-alias rewriting (spec §4.3 step 4): rewrites
//! `tsconfig.json`-declared `paths` prefixes to absolute
//! `/__virtual__/<port><target>` import specifiers, in both static
//! `import ... from` and dynamic `import(...)` forms, single- and
//! double-quoted.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `from '<specifier>'`/`from "<specifier>"` and
/// `import('<specifier>')`/`import("<specifier>")`, capturing the
/// quote character and the specifier body.
static IMPORT_SPECIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(from\s+|import\()(['"])([^'"]+)(['"])"#).unwrap()
});

/// Rewrites every import specifier in `source` whose prefix matches an
/// alias, replacing the matched prefix with
/// `/__virtual__/<port><target>`. Aliases are tried in declaration
/// order; the first matching prefix wins.
pub fn resolve_aliases(source: &str, aliases: &[(String, String)], port: u16) -> String {
    if aliases.is_empty() {
        return source.to_string();
    }
    IMPORT_SPECIFIER
        .replace_all(source, |caps: &regex::Captures| {
            let keyword = &caps[1];
            let quote_open = &caps[2];
            let specifier = &caps[3];
            let quote_close = &caps[4];
            for (prefix, target) in aliases {
                if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                    let rewritten = format!("/__virtual__/{port}{target}{rest}");
                    return format!("{keyword}{quote_open}{rewritten}{quote_close}");
                }
            }
            caps[0].to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_static_and_dynamic_imports() {
        let aliases = vec![("@/".to_string(), "/src/".to_string())];
        let src = r#"
import Button from "@/components/Button";
const mod = import('@/lib/util');
"#;
        let out = resolve_aliases(src, &aliases, 3000);
        assert!(out.contains(r#"from "/__virtual__/3000/src/components/Button""#));
        assert!(out.contains("import('/__virtual__/3000/src/lib/util')"));
    }

    #[test]
    fn leaves_non_matching_imports_untouched() {
        let aliases = vec![("@/".to_string(), "/src/".to_string())];
        let src = r#"import React from "react";"#;
        assert_eq!(resolve_aliases(src, &aliases, 3000), src);
    }

    #[test]
    fn no_aliases_is_identity() {
        let src = r#"import React from "react";"#;
        assert_eq!(resolve_aliases(src, &[], 3000), src);
    }
}
