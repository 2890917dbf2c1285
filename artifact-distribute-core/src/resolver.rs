//! File-set resolution: glob patterns → artifact groups.
//!
//! Matching a pattern against the filesystem is delegated to a
//! [`PathMatcher`]; the default [`GlobMatcher`] understands `*`, `?`, `**`,
//! `[...]`, `{a,b}` and `(a|b)`. The resolver then classifies each match:
//!
//! - a plain file becomes a single-file group named after the file,
//! - a bundle directory (name ends with a configured suffix, compared
//!   case-insensitively) becomes one group holding every descendant file,
//! - any other directory yields one group per top-level bundle beneath it,
//!   or, when it holds no bundle at all, one group for the directory itself.
//!
//! Resolution only stats and lists directories; no file is opened.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use mockall::automock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::DistributeError;
use crate::model::{ArtifactGroup, FileEntry};

/// Expands a pattern into the filesystem entries it names.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait PathMatcher: Send + Sync {
    fn find_matches(&self, pattern: &str) -> Result<Vec<PathBuf>, DistributeError>;
}

/// Filesystem glob matcher backed by `globset`. A pattern that names an
/// existing path is taken literally, so names such as `App (1).ipa` or
/// `out[v1].ipa` resolve to themselves. Otherwise the walk starts at the
/// literal prefix of the pattern and stops descending once a directory
/// matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobMatcher;

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '(', ')', '|'];

impl PathMatcher for GlobMatcher {
    fn find_matches(&self, pattern: &str) -> Result<Vec<PathBuf>, DistributeError> {
        if fs::symlink_metadata(pattern).is_ok() {
            debug!(pattern, "[RESOLVE] Pattern names an existing path");
            return Ok(vec![PathBuf::from(pattern)]);
        }

        let components: Vec<&str> = pattern.split('/').collect();
        let Some(first_glob) = components
            .iter()
            .position(|c| c.contains(GLOB_META) || c.contains('\\'))
        else {
            return Ok(Vec::new());
        };

        let base = match &components[..first_glob] {
            [] => PathBuf::new(),
            [""] => PathBuf::from("/"),
            prefix => PathBuf::from(prefix.join("/")),
        };
        let remainder = &components[first_glob..];
        let glob = compile_glob(&remainder.join("/")).map_err(|reason| DistributeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        let max_depth = if remainder.contains(&"**") {
            usize::MAX
        } else {
            remainder.len()
        };

        let root = if base.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base.clone()
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut matches = Vec::new();
        let mut walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                DistributeError::io(path, e.into())
            })?;
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if glob.is_match(&rel) {
                matches.push(base.join(&rel));
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
            }
        }

        matches.dedup();
        debug!(pattern, count = matches.len(), "[RESOLVE] Pattern expanded");
        Ok(matches)
    }
}

/// Compiles a `/`-separated glob. `(a|b)` alternation is accepted as an
/// alias for `{a,b}`; `*` and `?` never cross a separator.
fn compile_glob(pattern: &str) -> Result<globset::GlobMatcher, String> {
    let rewritten = rewrite_alternation(pattern)?;
    let glob = GlobBuilder::new(&rewritten)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map_err(|e| e.to_string())?;
    Ok(glob.compile_matcher())
}

fn rewrite_alternation(pattern: &str) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    let mut depth = 0usize;
    let mut in_class = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                out.push(ch);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' if !in_class => {
                in_class = true;
                out.push(ch);
            }
            ']' if in_class => {
                in_class = false;
                out.push(ch);
            }
            '(' if !in_class => {
                depth += 1;
                out.push('{');
            }
            ')' if !in_class && depth > 0 => {
                depth -= 1;
                out.push('}');
            }
            '|' if !in_class && depth > 0 => out.push(','),
            other => out.push(other),
        }
    }

    if depth != 0 {
        return Err(format!("unbalanced parentheses in `{pattern}`"));
    }
    Ok(out)
}

pub struct FileSetResolver {
    matcher: Box<dyn PathMatcher>,
    bundle_suffixes: Vec<String>,
}

impl FileSetResolver {
    pub fn new(bundle_suffixes: Vec<String>) -> Self {
        Self::with_matcher(Box::new(GlobMatcher), bundle_suffixes)
    }

    pub fn with_matcher(matcher: Box<dyn PathMatcher>, bundle_suffixes: Vec<String>) -> Self {
        Self {
            matcher,
            bundle_suffixes: bundle_suffixes
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Every group named by `pattern`. Zero matches is an empty result.
    pub fn resolve(&self, pattern: &str) -> Result<Vec<ArtifactGroup>, DistributeError> {
        let matches = self.matcher.find_matches(pattern)?;
        let mut seen_roots = HashSet::new();
        let mut groups = Vec::new();

        for path in matches {
            let meta = fs::metadata(&path).map_err(|e| DistributeError::io(&path, e))?;
            let candidates = if meta.is_file() {
                vec![single_file_group(&path, meta.len())]
            } else if meta.is_dir() {
                self.directory_groups(&path)?
            } else {
                debug!(path = %path.display(), "[RESOLVE] Skipping special file");
                continue;
            };

            for group in candidates.into_iter().flatten() {
                let key = fs::canonicalize(&group.root)
                    .unwrap_or_else(|_| group.root.clone())
                    .join(&group.group_id);
                if seen_roots.insert(key) {
                    groups.push(group);
                }
            }
        }

        info!(pattern, groups = groups.len(), "[RESOLVE] Resolved artifact groups");
        Ok(groups)
    }

    /// Like [`Self::resolve`] but an empty result is an error.
    pub fn resolve_required(&self, pattern: &str) -> Result<Vec<ArtifactGroup>, DistributeError> {
        let groups = self.resolve(pattern)?;
        if groups.is_empty() {
            return Err(DistributeError::ArtifactNotFound {
                pattern: pattern.to_string(),
            });
        }
        Ok(groups)
    }

    /// Exactly one plain file. Several matches abort: uploading an arbitrary
    /// one of them would be non-deterministic.
    pub fn resolve_single(&self, pattern: &str) -> Result<ArtifactGroup, DistributeError> {
        let mut matches = self.matcher.find_matches(pattern)?;
        if matches.len() > 1 {
            warn!(pattern, count = matches.len(), "[RESOLVE] Pattern is ambiguous");
            return Err(DistributeError::AmbiguousArtifact {
                pattern: pattern.to_string(),
                matches,
            });
        }
        let Some(path) = matches.pop() else {
            return Err(DistributeError::ArtifactNotFound {
                pattern: pattern.to_string(),
            });
        };

        let meta = fs::metadata(&path).map_err(|e| DistributeError::io(&path, e))?;
        if !meta.is_file() {
            return Err(DistributeError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("{} is not a file", path.display()),
            });
        }
        single_file_group(&path, meta.len()).ok_or_else(|| DistributeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("{} has no file name", path.display()),
        })
    }

    fn is_bundle(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_ascii_lowercase();
        self.bundle_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    fn directory_groups(&self, dir: &Path) -> Result<Vec<Option<ArtifactGroup>>, DistributeError> {
        if self.is_bundle(dir) {
            return Ok(vec![self.bundle_group(dir)?]);
        }

        let mut bundles = Vec::new();
        self.find_bundles(dir, &mut bundles)?;
        if bundles.is_empty() {
            return Ok(vec![self.bundle_group(dir)?]);
        }
        bundles.sort();
        bundles.iter().map(|b| self.bundle_group(b)).collect()
    }

    /// Top-level bundles beneath `dir`; does not look inside bundles.
    fn find_bundles(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DistributeError> {
        for entry in fs::read_dir(dir).map_err(|e| DistributeError::io(dir, e))? {
            let path = entry.map_err(|e| DistributeError::io(dir, e))?.path();
            if !path.is_dir() {
                debug!(path = %path.display(), "[RESOLVE] Skipping loose file outside bundles");
                continue;
            }
            if self.is_bundle(&path) {
                out.push(path);
            } else {
                self.find_bundles(&path, out)?;
            }
        }
        Ok(())
    }

    fn bundle_group(&self, root: &Path) -> Result<Option<ArtifactGroup>, DistributeError> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        let group_id = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let group = ArtifactGroup::new(group_id, root.to_path_buf(), files);
        if group.is_none() {
            warn!(path = %root.display(), "[RESOLVE] Bundle contains no files, skipping");
        }
        Ok(group)
    }
}

fn single_file_group(path: &Path, size: u64) -> Option<ArtifactGroup> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let entry = FileEntry {
        absolute_path: absolute(path),
        relative_path: name.clone(),
        size_bytes: size,
        is_directory: false,
    };
    ArtifactGroup::new(name, root, vec![entry])
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<FileEntry>) -> Result<(), DistributeError> {
    for entry in fs::read_dir(dir).map_err(|e| DistributeError::io(dir, e))? {
        let path = entry.map_err(|e| DistributeError::io(dir, e))?.path();
        let meta = fs::metadata(&path).map_err(|e| DistributeError::io(&path, e))?;
        if meta.is_dir() {
            collect_files(root, &path, out)?;
        } else if meta.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let relative_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(FileEntry {
                absolute_path: absolute(&path),
                relative_path,
                size_bytes: meta.len(),
                is_directory: false,
            });
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
