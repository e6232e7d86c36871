//! Build context fingerprints
//!
//! A fingerprint is a SHA-256 over every file the build backend would see:
//! sorted relative paths and contents (honouring `.dockerignore`), followed by
//! the build arguments and the target image reference.

use crate::error::CacheError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const DOCKERIGNORE: &str = ".dockerignore";

pub fn fingerprint_context(
    context: &Path,
    build_args: &BTreeMap<String, String>,
    image: &str,
) -> Result<String, CacheError> {
    fingerprint_context_excluding(context, build_args, image, &[])
}

/// Same as [`fingerprint_context`], skipping any of `excluded` that lies
/// inside the context (the state directory when a context is the stack root).
pub fn fingerprint_context_excluding(
    context: &Path,
    build_args: &BTreeMap<String, String>,
    image: &str,
    excluded: &[PathBuf],
) -> Result<String, CacheError> {
    if !context.is_dir() {
        return Err(CacheError::UnreadableContext {
            path: context.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let dockerignore = load_dockerignore(context)?;
    let skipped: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|dir| nested_in(context, dir))
        .collect();
    let root = context.to_path_buf();

    let walker = WalkBuilder::new(context)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            if skipped.iter().any(|dir| relative.starts_with(dir)) {
                return false;
            }
            let is_dir = entry.file_type().map_or(false, |t| t.is_dir());
            !dockerignore.matched(path, is_dir).is_ignore()
        })
        .build();

    let mut hasher = Sha256::new();
    let mut files = 0usize;

    for entry in walker {
        let entry = entry.map_err(|e| CacheError::UnreadableContext {
            path: context.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if path == context {
            continue;
        }

        let relative = path
            .strip_prefix(context)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            hasher.update(b"dir\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| unreadable(path, e))?;
            hasher.update(b"link\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            hasher.update(target.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        } else {
            let content = fs::read(path).map_err(|e| unreadable(path, e))?;
            hasher.update(b"file\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
            files += 1;
            trace!(file = %relative, bytes = content.len(), "Fingerprinted");
        }
    }

    for (key, value) in build_args {
        hasher.update(b"arg\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }

    hasher.update(b"image\0");
    hasher.update(image.as_bytes());

    let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
    debug!(context = %context.display(), files, fingerprint = %digest, "Computed context fingerprint");
    Ok(digest)
}

/// Only the context's top-level `.dockerignore` applies, as with `docker build`.
fn load_dockerignore(context: &Path) -> Result<Gitignore, CacheError> {
    let mut builder = GitignoreBuilder::new(context);
    let file = context.join(DOCKERIGNORE);
    if file.is_file() {
        if let Some(e) = builder.add(&file) {
            return Err(unreadable(&file, e));
        }
    }
    builder.build().map_err(|e| unreadable(&file, e))
}

/// `dir` relative to `context` when it lies strictly inside it.
fn nested_in(context: &Path, dir: &Path) -> Option<PathBuf> {
    let context = fs::canonicalize(context).ok()?;
    let dir = fs::canonicalize(dir).ok()?;
    dir.strip_prefix(&context)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn unreadable(path: &Path, e: impl fmt::Display) -> CacheError {
    CacheError::UnreadableContext {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
