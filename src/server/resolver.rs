//! Filesystem resolver.
//!
//! The default resolver for project-local URLs: maps `/src/app` onto the
//! project tree, probing extensions and index files. Bare specifiers are not
//! resolved here; they belong to the dep optimizer.

use std::path::{Path, PathBuf};

use crate::graph::{ModuleResolver, ResolveFuture, ResolvedId};
use crate::utils::url::clean_url;

/// Extensions probed for extensionless URLs.
const RESOLVE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "css"];

/// Index files probed for directory URLs.
const INDEX_FILES: &[&str] = &["index.js", "index.ts", "index.jsx", "index.tsx"];

/// Resolves root-relative URLs against the project directory.
pub struct FsResolver {
    root: PathBuf,
}

impl FsResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn try_resolve(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        if path.extension().is_none() {
            for ext in RESOLVE_EXTENSIONS {
                let with_ext = path.with_extension(ext);
                if with_ext.is_file() {
                    return Some(with_ext);
                }
            }
        }

        if path.is_dir() {
            for index in INDEX_FILES {
                let candidate = path.join(index);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

impl ModuleResolver for FsResolver {
    fn resolve_id<'a>(&'a self, url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let path_part = clean_url(url);
            let query = &url[path_part.len()..];

            if !path_part.starts_with('/') {
                return None;
            }

            let candidate = self.root.join(&path_part[1..]);
            let resolved = self.try_resolve(&candidate)?;
            Some(ResolvedId {
                id: format!("{}{}", resolved.display(), query),
                meta: None,
            })
        })
    }
}
