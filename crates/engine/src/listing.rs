//! Physical-directory listing and filesize formatting.
//!
//! Translated from `util.listdir`/`util.file_info`/`util.format_filesize`.
//! Archive-directory listings are produced by `archive::list_dir` instead;
//! this module covers the plain-filesystem half of the Listing Formatter's
//! input.

use std::path::Path;
use wsb_domain::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    File,
    Dir,
    Link,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub kind: Kind,
    pub size: Option<u64>,
    pub last_modified: Option<u64>,
}

fn classify(path: &Path) -> Result<Kind> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(Kind::Unknown),
    };
    if meta.file_type().is_symlink() {
        return Ok(Kind::Link);
    }
    if meta.is_dir() {
        return Ok(Kind::Dir);
    }
    if meta.is_file() {
        return Ok(Kind::File);
    }
    Ok(Kind::Unknown)
}

fn info_for(path: &Path, name: String) -> Result<FileInfo> {
    let kind = classify(path)?;
    let (size, last_modified) = if kind == Kind::File {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        (Some(meta.len()), mtime)
    } else {
        (None, None)
    };
    Ok(FileInfo {
        name,
        kind,
        size,
        last_modified,
    })
}

/// List `base`'s entries, recursing into subdirectories when `recursive`.
/// Entries whose type can't be determined (raced away mid-scan) are skipped,
/// matching the original's `if info.type is None: continue`.
pub fn list_dir(base: &Path, recursive: bool) -> Result<Vec<FileInfo>> {
    let mut out = Vec::new();
    walk(base, base, recursive, &mut out)?;
    Ok(out)
}

fn walk(root: &Path, dir: &Path, recursive: bool, out: &mut Vec<FileInfo>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let info = info_for(&path, rel)?;
        let is_dir = info.kind == Kind::Dir;
        if info.kind != Kind::Unknown {
            out.push(info);
        }
        if recursive && is_dir {
            walk(root, &path, recursive, out)?;
        }
    }
    Ok(())
}

/// Human-readable file size, matching `util.format_filesize`: binary units
/// by default, SI units (1000-based) when requested.
pub fn format_filesize(bytes: u64, si: bool) -> String {
    let (base, units): (f64, &[&str]) = if si {
        (1000.0, &["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"])
    } else {
        (
            1024.0,
            &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"],
        )
    };

    let mut value = bytes as f64;
    let mut exp = 0usize;
    while value >= base && exp < units.len() - 1 {
        value /= base;
        exp += 1;
    }

    if exp >= 1 && value < 10.0 {
        format!("{value:.1} {}", units[exp])
    } else {
        format!("{value:.0} {}", units[exp])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_flat_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut entries = list_dir(dir.path(), false).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].kind, Kind::File);
        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].kind, Kind::Dir);
    }

    #[test]
    fn recursive_listing_descends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/nested.txt"), b"1").unwrap();

        let entries = list_dir(dir.path(), true).unwrap();
        assert!(entries.iter().any(|e| e.name == "sub/nested.txt"));
    }

    #[test]
    fn format_filesize_matches_thresholds() {
        assert_eq!(format_filesize(500, false), "500 B");
        assert_eq!(format_filesize(2048, false), "2.0 KiB");
        assert_eq!(format_filesize(1500, true), "1.5 kB");
    }
}
