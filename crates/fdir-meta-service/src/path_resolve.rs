//! Path resolution over the in-memory namespace.
//!
//! Paths are absolute, `/`-separated, and empty segments are ignored, so
//! `"/a//b/"` names the same entry as `"/a/b"`. `"/"` (and the empty path)
//! name the root.

use std::sync::Arc;

use fdir_types::{make_error_msg, MetaCode, Result, StatusCode};

use crate::dentry::Dentry;

/// Split an absolute path into its name segments.
pub fn split_path(path: &str, max_segments: usize) -> Result<Vec<&str>> {
    if !path.is_empty() && !path.starts_with('/') {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("path {:?} is not absolute", path),
        );
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > max_segments {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!(
                "path has {} segments, limit is {}",
                segments.len(),
                max_segments
            ),
        );
    }
    Ok(segments)
}

/// Where the final segment of a path lives.
#[derive(Debug)]
pub struct ResolveResult<'p> {
    pub parent: Arc<Dentry>,
    pub name: &'p str,
    pub entry: Option<Arc<Dentry>>,
}

/// Walks from a root directory, taking each directory's child lock only for
/// the duration of one lookup.
pub struct PathResolver<'a> {
    root: &'a Arc<Dentry>,
    max_segments: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(root: &'a Arc<Dentry>, max_segments: usize) -> Self {
        Self { root, max_segments }
    }

    /// Resolve a full path to its entry.
    pub fn resolve(&self, path: &str) -> Result<Arc<Dentry>> {
        let segments = split_path(path, self.max_segments)?;
        self.walk(&segments, path)
    }

    /// Resolve every segment but the last, then look the last one up.
    ///
    /// Fails with `INVALID_ARG` for the root itself, which has no parent.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> Result<ResolveResult<'p>> {
        let segments = split_path(path, self.max_segments)?;
        let Some((&name, ancestors)) = segments.split_last() else {
            return make_error_msg(StatusCode::INVALID_ARG, "the root has no parent");
        };
        let parent = self.walk(ancestors, path)?;
        let Some(children) = parent.children_read() else {
            return make_error_msg(
                MetaCode::NOT_DIRECTORY,
                format!("{:?} is not a directory", parent.name()),
            );
        };
        if children.is_unlinked() {
            return make_error_msg(MetaCode::NOT_FOUND, path.to_string());
        }
        let entry = children.get(name).cloned();
        drop(children);
        Ok(ResolveResult {
            parent,
            name,
            entry,
        })
    }

    fn walk(&self, segments: &[&str], path: &str) -> Result<Arc<Dentry>> {
        let mut current = Arc::clone(self.root);
        for segment in segments {
            let next = {
                let Some(children) = current.children_read() else {
                    return make_error_msg(
                        MetaCode::NOT_DIRECTORY,
                        format!("{:?} in {} is not a directory", current.name(), path),
                    );
                };
                children.get(segment).cloned()
            };
            match next {
                Some(child) => current = child,
                None => return make_error_msg(MetaCode::NOT_FOUND, path.to_string()),
            }
        }
        Ok(current)
    }
}
