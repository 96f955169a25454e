//! Module URL query handling.
//!
//! Dev-server module URLs carry meaningful query parameters:
//!
//! - `?t=<timestamp>` - HMR cache buster, rewritten on every hot update
//! - `?import` - marker for assets imported from JS (vs. referenced directly)
//! - `?v=<hash>` - optimized-dep browser hash, stable across reload-safe rebundles
//!
//! Graph keys must ignore `t` and `import` (two requests for the same module
//! with different timestamps are the same node) while preserving everything
//! else, so query stripping here is parameter-precise rather than a blanket
//! "cut at `?`".

use std::path::{Path, PathBuf};

/// URL prefix for modules addressed directly by filesystem path.
pub const FS_PREFIX: &str = "/@fs/";

/// URL prefix for resolved ids that are not valid browser paths.
pub const ID_PREFIX: &str = "/@id/";

const CSS_EXTENSIONS: &[&str] = &["css", "less", "sass", "scss", "styl", "stylus", "pcss", "postcss"];

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "mts", "cjs", "cts"];

/// Strip query and fragment, leaving the bare path.
#[inline]
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Remove the HMR timestamp query (`t=...`), preserving other parameters.
pub fn remove_timestamp_query(url: &str) -> String {
    remove_query_param(url, "t")
}

/// Remove the `import` marker query, preserving other parameters.
pub fn remove_import_query(url: &str) -> String {
    remove_query_param(url, "import")
}

/// Canonical graph key for a raw request URL: no `t=`, no `import`.
pub fn strip_hmr_queries(url: &str) -> String {
    remove_import_query(&remove_timestamp_query(url))
}

/// Remove a single query parameter by key, dropping `?` when none remain.
fn remove_query_param(url: &str, key: &str) -> String {
    let Some(query_start) = url.find('?') else {
        return url.to_string();
    };
    let (path, query) = url.split_at(query_start);
    let query = &query[1..];

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or(pair);
            name != key
        })
        .collect();

    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, kept.join("&"))
    }
}

/// Append the optimized-dep version query: `<url>?v=<hash>`.
pub fn with_version_query(url: &str, browser_hash: &str) -> String {
    if url.contains('?') {
        format!("{url}&v={browser_hash}")
    } else {
        format!("{url}?v={browser_hash}")
    }
}

/// Append the HMR timestamp query: `<url>?t=<timestamp>`.
pub fn with_timestamp_query(url: &str, timestamp: u64) -> String {
    if url.contains('?') {
        format!("{url}&t={timestamp}")
    } else {
        format!("{url}?t={timestamp}")
    }
}

/// Whether the URL refers to a stylesheet request.
#[inline]
pub fn is_css_request(url: &str) -> bool {
    has_extension(clean_url(url), CSS_EXTENSIONS)
}

/// Whether the URL refers to a script request.
#[inline]
pub fn is_js_request(url: &str) -> bool {
    has_extension(clean_url(url), JS_EXTENSIONS)
}

/// Whether a JS import of this URL needs the explicit `?import` marker
/// (anything that is neither a script nor a stylesheet, e.g. assets).
#[inline]
pub fn is_explicit_import_required(url: &str) -> bool {
    !is_js_request(url) && !is_css_request(url)
}

/// Normalize a URL for an HMR payload: bare ids are routed through `/@id/`.
pub fn normalize_hmr_url(url: &str) -> String {
    if url.starts_with('/') || url.starts_with('.') {
        url.to_string()
    } else {
        format!("{ID_PREFIX}{url}")
    }
}

/// Extract the filesystem path from a resolved id (query stripped).
#[inline]
pub fn file_from_id(id: &str) -> PathBuf {
    PathBuf::from(clean_url(id))
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}
