//! Entry scanning for dependency discovery.
//!
//! The `pre-scan`, `scan`, and `eager` strategies seed the discovered-dep set
//! before (or while) the first requests arrive, by crawling entry files for
//! bare import specifiers. This is a lexical scan, not a parse: comments and
//! string literals are skipped, `import`/`export ... from` clauses and
//! (optionally) dynamic `import(...)` calls are read for their specifier.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::debug;

/// Extensions probed when crawling extensionless relative imports.
const RESOLVE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs"];

/// Crawl entry files and collect bare import specifiers.
///
/// Relative imports are followed transitively; each bare specifier is
/// reported once, in first-seen order.
pub fn scan_entries(root: &Path, entries: &[PathBuf], include_dynamic: bool) -> Vec<String> {
    let mut queue: VecDeque<PathBuf> = entries
        .iter()
        .map(|e| if e.is_absolute() { e.clone() } else { root.join(e) })
        .collect();
    let mut visited: FxHashSet<PathBuf> = FxHashSet::default();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut found = Vec::new();

    while let Some(file) = queue.pop_front() {
        if !visited.insert(file.clone()) {
            continue;
        }
        let Ok(code) = fs::read_to_string(&file) else {
            debug!("optimize"; "scan: cannot read {}", file.display());
            continue;
        };

        let specifiers = if file.extension().is_some_and(|e| e == "html") {
            script_sources(&code)
        } else {
            scan_imports(&code, include_dynamic)
        };

        for spec in specifiers {
            if is_bare_specifier(&spec) {
                if seen.insert(spec.clone()) {
                    found.push(spec);
                }
            } else if let Some(resolved) = resolve_relative(&file, &spec) {
                queue.push_back(resolved);
            }
        }
    }

    found
}

/// Extract import specifiers from JS/TS source.
pub fn scan_imports(code: &str, include_dynamic: bool) -> Vec<String> {
    let bytes = code.as_bytes();
    let mut specifiers = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'\'' | b'"' | b'`' => i = skip_string(bytes, i),
            _ if keyword_at(code, i, "import") => {
                let after = i + "import".len();
                match next_significant(bytes, after) {
                    Some((j, b'(')) => {
                        if include_dynamic
                            && let Some(spec) = string_literal_at(code, next_index(bytes, j + 1))
                        {
                            specifiers.push(spec);
                        }
                        i = j + 1;
                    }
                    Some((_, b'.')) => i = after, // import.meta
                    Some((j, b'\'' | b'"')) => {
                        // Side-effect import: import "spec"
                        if let Some(spec) = string_literal_at(code, j) {
                            specifiers.push(spec);
                        }
                        i = j + 1;
                    }
                    _ => {
                        if let Some((spec, end)) = from_clause(code, after) {
                            specifiers.push(spec);
                            i = end;
                        } else {
                            i = after;
                        }
                    }
                }
            }
            _ if keyword_at(code, i, "export") => {
                let after = i + "export".len();
                if let Some((spec, end)) = from_clause(code, after) {
                    specifiers.push(spec);
                    i = end;
                } else {
                    i = after;
                }
            }
            _ => i += 1,
        }
    }

    specifiers
}

/// `<script src="...">` attributes in an HTML entry.
fn script_sources(html: &str) -> Vec<String> {
    let mut sources = Vec::new();
    let mut from = 0;
    while let Some(tag_pos) = html[from..].find("<script") {
        let tag_start = from + tag_pos;
        let Some(tag_end) = html[tag_start..].find('>') else {
            break;
        };
        let tag = &html[tag_start..tag_start + tag_end];
        if let Some(src_pos) = tag.find("src=") {
            let rest = &tag[src_pos + 4..];
            let quote = rest.chars().next();
            if let Some(q @ ('"' | '\'')) = quote
                && let Some(end) = rest[1..].find(q)
            {
                sources.push(rest[1..1 + end].to_string());
            }
        }
        from = tag_start + tag_end;
    }
    sources
}

/// Bare specifiers name packages; everything else is a path or URL.
pub fn is_bare_specifier(spec: &str) -> bool {
    !spec.starts_with('.')
        && !spec.starts_with('/')
        && !spec.contains("://")
        && !spec.starts_with("data:")
}

// -----------------------------------------------------------------------------
// Lexing helpers
// -----------------------------------------------------------------------------

fn keyword_at(code: &str, i: usize, keyword: &str) -> bool {
    let bytes = code.as_bytes();
    if !code[i..].starts_with(keyword) {
        return false;
    }
    let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
    let after = i + keyword.len();
    let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
    before_ok && after_ok
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    i += 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Next non-whitespace byte at or after `i`.
fn next_significant(bytes: &[u8], mut i: usize) -> Option<(usize, u8)> {
    while i < bytes.len() {
        if !bytes[i].is_ascii_whitespace() {
            return Some((i, bytes[i]));
        }
        i += 1;
    }
    None
}

fn next_index(bytes: &[u8], i: usize) -> usize {
    next_significant(bytes, i).map_or(bytes.len(), |(j, _)| j)
}

/// Read a quoted string literal starting at `i`, returning its contents.
fn string_literal_at(code: &str, i: usize) -> Option<String> {
    let bytes = code.as_bytes();
    let quote = *bytes.get(i)?;
    if quote != b'\'' && quote != b'"' {
        return None;
    }
    let end = code[i + 1..].find(quote as char)?;
    Some(code[i + 1..i + 1 + end].to_string())
}

/// Find `from "spec"` before the end of the current statement.
fn from_clause(code: &str, start: usize) -> Option<(String, usize)> {
    let bytes = code.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b';' => return None,
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            _ if keyword_at(code, i, "from") => {
                let j = next_index(bytes, i + "from".len());
                let spec = string_literal_at(code, j)?;
                let end = j + spec.len() + 2;
                return Some((spec, end));
            }
            // A block open means this was `export { ... }` or a declaration;
            // keep scanning, `from` may follow the closing brace.
            _ => i += 1,
        }
    }
    None
}

/// Probe a relative import against the importing file's directory.
fn resolve_relative(importer: &Path, spec: &str) -> Option<PathBuf> {
    if !spec.starts_with('.') {
        return None;
    }
    let base = importer.parent()?;
    let candidate = base.join(spec);

    if candidate.is_file() {
        return Some(candidate);
    }
    if candidate.extension().is_none() {
        for ext in RESOLVE_EXTENSIONS {
            let with_ext = candidate.with_extension(ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
        for index in RESOLVE_EXTENSIONS {
            let index_file = candidate.join(format!("index.{index}"));
            if index_file.is_file() {
                return Some(index_file);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_static_imports() {
        let code = r#"
            import React from "react";
            import { clone } from 'lodash-es';
            import "./side-effect.css";
        "#;
        let specs = scan_imports(code, false);
        assert_eq!(specs, vec!["react", "lodash-es", "./side-effect.css"]);
    }

    #[test]
    fn test_export_from() {
        let code = r#"export { helper } from "shared-utils";
export const local = "not-a-specifier";"#;
        let specs = scan_imports(code, false);
        assert_eq!(specs, vec!["shared-utils"]);
    }

    #[test]
    fn test_dynamic_import_gated() {
        let code = r#"const mod = await import("heavy-lib");"#;
        assert!(scan_imports(code, false).is_empty());
        assert_eq!(scan_imports(code, true), vec!["heavy-lib"]);
    }

    #[test]
    fn test_import_meta_ignored() {
        let code = r#"console.log(import.meta.url); import x from "pkg";"#;
        assert_eq!(scan_imports(code, false), vec!["pkg"]);
    }

    #[test]
    fn test_comments_and_strings_skipped() {
        let code = r#"
            // import fake from "commented-out";
            /* import "also-commented"; */
            const s = 'import "in-string"';
            import real from "actual-pkg";
        "#;
        assert_eq!(scan_imports(code, false), vec!["actual-pkg"]);
    }

    #[test]
    fn test_is_bare_specifier() {
        assert!(is_bare_specifier("react"));
        assert!(is_bare_specifier("@scope/pkg"));
        assert!(!is_bare_specifier("./local.js"));
        assert!(!is_bare_specifier("../up.js"));
        assert!(!is_bare_specifier("/abs.js"));
        assert!(!is_bare_specifier("https://cdn.example.com/x.js"));
        assert!(!is_bare_specifier("data:text/javascript,1"));
    }

    #[test]
    fn test_script_sources() {
        let html = r#"<html><script type="module" src="/src/main.ts"></script>
            <script src='./legacy.js'></script></html>"#;
        assert_eq!(script_sources(html), vec!["/src/main.ts", "./legacy.js"]);
    }

    #[test]
    fn test_scan_entries_crawls_relative_imports() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("main.js"),
            "import \"./app\";\nimport React from \"react\";",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("app.js"),
            "import { clone } from \"lodash-es\";",
        )
        .unwrap();

        let found = scan_entries(dir.path(), &[PathBuf::from("main.js")], false);
        assert_eq!(found, vec!["react", "lodash-es"]);
    }

    #[test]
    fn test_scan_entries_html() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            r#"<script type="module" src="./main.js"></script>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("main.js"), "import \"vue\";").unwrap();

        let found = scan_entries(dir.path(), &[PathBuf::from("index.html")], false);
        assert_eq!(found, vec!["vue"]);
    }

    #[test]
    fn test_scan_entries_dedupes_and_terminates_on_cycle() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.js"), "import \"./b\";\nimport \"pkg\";").unwrap();
        std::fs::write(dir.path().join("b.js"), "import \"./a\";\nimport \"pkg\";").unwrap();

        let found = scan_entries(dir.path(), &[PathBuf::from("a.js")], false);
        assert_eq!(found, vec!["pkg"]);
    }
}
