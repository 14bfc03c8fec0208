//! Maps a request path onto the mixed physical/archive namespace.
//!
//! Translated from `get_archive_path()` in the original Python implementation:
//! scan the path right-to-left for `!/` markers, and for each candidate check
//! whether an override marker (`<name>!`) suppresses archive interpretation
//! before checking whether `<name>` is actually a valid ZIP.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A real filesystem path (may or may not exist yet).
    Physical(PathBuf),
    /// `archive_path` is a ZIP file on disk; `inner_path` is the (possibly
    /// empty) path of the entry within it, using `/` separators.
    Archive { archive_path: PathBuf, inner_path: String },
    /// An override marker suppressed every candidate archive interpretation.
    None,
}

/// Joins `rel` onto `root` and collapses `.`/`..` components purely
/// lexically (no symlink resolution, no filesystem access). Returns `None`
/// if the result would escape `root`.
pub fn normalize_under(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for comp in Path::new(rel.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn is_valid_zip(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    zip::ZipArchive::new(file).is_ok()
}

/// Resolve `url_path` (already percent-decoded) against `root`.
pub fn resolve(root: &Path, url_path: &str) -> Resolved {
    let marker_positions: Vec<usize> = url_path
        .match_indices("!/")
        .map(|(idx, _)| idx)
        .collect();

    for &idx in marker_positions.iter().rev() {
        let prefix = &url_path[..idx];
        let suffix = &url_path[idx + 2..];
        let trimmed_prefix = prefix.trim_matches('/');

        let Some(candidate) = normalize_under(root, trimmed_prefix) else {
            continue;
        };

        let mut override_marker = candidate.clone().into_os_string();
        override_marker.push("!");
        let override_marker = PathBuf::from(override_marker);
        if override_marker.symlink_metadata().is_ok() {
            return Resolved::None;
        }

        if is_valid_zip(&candidate) {
            let inner = suffix.trim_end_matches('/').to_string();
            return Resolved::Archive {
                archive_path: candidate,
                inner_path: inner,
            };
        }
    }

    match normalize_under(root, url_path) {
        Some(p) => Resolved::Physical(p),
        None => Resolved::None,
    }
}
