//! Read and mutate ZIP archives without ever leaving a partial archive
//! visible at its original path.
//!
//! Translated from the `save`/`delete`/`mkdir` action handlers in the
//! original implementation: mutations that replace or remove entries go
//! through a write-rewrite-rename protocol (read every retained entry into
//! a fresh sibling file, then two-step rename it into place); additions of
//! a brand-new entry use an append-only fast path instead.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use wsb_domain::error::{Error, Result};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// Either an explicit `name/` entry, or an implicit directory inferred
    /// from a descendant entry (`check_missing_dir` in the original).
    Dir,
    Absent,
}

#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub last_modified: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub last_modified: Option<u64>,
}

fn open_archive(path: &Path) -> Result<ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
    ZipArchive::new(file).map_err(|e| Error::Internal(format!("not a valid zip: {e}")))
}

/// Metadata for `subpath` inside `archive_path`. Mirrors `util.zip_file_info`.
pub fn entry_info(archive_path: &Path, subpath: &str) -> Result<EntryInfo> {
    let mut zip = open_archive(archive_path)?;

    if let Ok(f) = zip.by_name(subpath) {
        return Ok(EntryInfo {
            kind: EntryKind::File,
            size: Some(f.size()),
            last_modified: dos_datetime_to_epoch(f.last_modified()),
        });
    }

    let dir_name = format!("{}/", subpath.trim_end_matches('/'));
    if subpath.is_empty() || zip.by_name(&dir_name).is_ok() {
        return Ok(EntryInfo {
            kind: EntryKind::Dir,
            size: None,
            last_modified: None,
        });
    }

    let prefix = if subpath.is_empty() {
        String::new()
    } else {
        dir_name
    };
    for i in 0..zip.len() {
        let Ok(f) = zip.by_index(i) else { continue };
        if f.name().starts_with(&prefix) {
            return Ok(EntryInfo {
                kind: EntryKind::Dir,
                size: None,
                last_modified: None,
            });
        }
    }

    Ok(EntryInfo {
        kind: EntryKind::Absent,
        size: None,
        last_modified: None,
    })
}

/// List the immediate children of `subpath` inside the archive. Mirrors
/// `util.zip_listdir`.
pub fn list_dir(archive_path: &Path, subpath: &str) -> Result<Vec<FileEntry>> {
    let mut zip = open_archive(archive_path)?;
    let base = if subpath.is_empty() {
        String::new()
    } else {
        format!("{}/", subpath.trim_end_matches('/'))
    };

    let mut dir_exists = base.is_empty();
    let mut children: std::collections::BTreeMap<String, Option<(u64, u64)>> =
        std::collections::BTreeMap::new();

    for i in 0..zip.len() {
        let Ok(f) = zip.by_index(i) else { continue };
        let name = f.name().to_string();
        if !name.starts_with(&base) {
            continue;
        }
        let rest = &name[base.len()..];
        if rest.is_empty() {
            dir_exists = true;
            continue;
        }
        let child = rest.split('/').next().unwrap_or(rest).to_string();
        let is_exact_file = rest == child && !name.ends_with('/');
        let entry = children.entry(child).or_insert(None);
        if is_exact_file {
            *entry = Some((f.size(), dos_datetime_to_epoch(f.last_modified()).unwrap_or(0)));
        } else if entry.is_none() {
            // implicit or explicit directory child; leave as None (dir marker)
        }
    }

    if children.is_empty() && !dir_exists {
        return Err(Error::NotFound(format!(
            "directory '{subpath}' does not exist in archive"
        )));
    }

    Ok(children
        .into_iter()
        .map(|(name, meta)| match meta {
            Some((size, mtime)) => FileEntry {
                name,
                kind: EntryKind::File,
                size: Some(size),
                last_modified: Some(mtime),
            },
            None => FileEntry {
                name,
                kind: EntryKind::Dir,
                size: None,
                last_modified: None,
            },
        })
        .collect())
}

/// Stream the full contents of `subpath` out of the archive.
pub fn read_entry(archive_path: &Path, subpath: &str) -> Result<Vec<u8>> {
    let mut zip = open_archive(archive_path)?;
    let mut f = zip
        .by_name(subpath)
        .map_err(|_| Error::NotFound(format!("no such entry '{subpath}'")))?;
    let mut buf = Vec::with_capacity(f.size() as usize);
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn monotonic_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn temp_sibling(archive_path: &Path, suffix: u128) -> PathBuf {
    let mut s = archive_path.as_os_str().to_os_string();
    s.push(format!(".{suffix}"));
    PathBuf::from(s)
}

/// Write (create or replace) `subpath` with `data`. If the entry does not
/// already exist, appends directly; otherwise performs a full rewrite.
pub fn write_entry(archive_path: &Path, subpath: &str, data: &[u8]) -> Result<()> {
    let exists = matches!(entry_info(archive_path, subpath)?.kind, EntryKind::File);
    if !exists {
        return append_entry(archive_path, subpath, data, CompressionMethod::Deflated);
    }
    rewrite_with(archive_path, |zip, writer| {
        for i in 0..zip.len() {
            let f = zip.by_index(i).map_err(zip_err)?;
            if f.name() == subpath {
                continue;
            }
            copy_entry(f, writer)?;
        }
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(subpath, options)
            .map_err(|e| Error::Internal(format!("writing entry: {e}")))?;
        writer
            .write_all(data)
            .map_err(|e| Error::Internal(format!("writing entry: {e}")))?;
        Ok(())
    })
}

fn append_entry(
    archive_path: &Path,
    subpath: &str,
    data: &[u8],
    method: CompressionMethod,
) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(archive_path)?;
    let mut writer =
        ZipWriter::new_append(file).map_err(|e| Error::Internal(format!("appending: {e}")))?;
    let options = FileOptions::default().compression_method(method);
    writer
        .start_file(subpath, options)
        .map_err(|e| Error::Internal(format!("appending entry: {e}")))?;
    writer
        .write_all(data)
        .map_err(|e| Error::Internal(format!("appending entry: {e}")))?;
    writer
        .finish()
        .map_err(|e| Error::Internal(format!("finishing append: {e}")))?;
    Ok(())
}

/// Create a directory entry (`name/`). Idempotent if it already exists.
pub fn mkdir_entry(archive_path: &Path, subpath: &str) -> Result<()> {
    if matches!(entry_info(archive_path, subpath)?.kind, EntryKind::Dir) {
        return Ok(());
    }
    let name = format!("{}/", subpath.trim_end_matches('/'));
    append_entry(archive_path, &name, &[], CompressionMethod::Stored)
}

/// Remove `subpath` and every entry nested under it. Fails with `NotFound`
/// if nothing matched, mirroring the original's 404 behavior.
pub fn delete_entry(archive_path: &Path, subpath: &str) -> Result<()> {
    let prefix = format!("{}/", subpath.trim_end_matches('/'));
    let mut deleted = false;
    rewrite_with(archive_path, |zip, writer| {
        for i in 0..zip.len() {
            let f = zip.by_index(i).map_err(zip_err)?;
            let name = f.name().to_string();
            if name == subpath || name.starts_with(&prefix) {
                deleted = true;
                continue;
            }
            copy_entry(f, writer)?;
        }
        Ok(())
    })?;
    if !deleted {
        return Err(Error::NotFound(
            "entry does not exist in this zip file".into(),
        ));
    }
    Ok(())
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Internal(format!("reading zip entry: {e}"))
}

fn copy_entry(
    mut src: zip::read::ZipFile,
    dst: &mut ZipWriter<std::fs::File>,
) -> Result<()> {
    let name = src.name().to_string();
    let method = src.compression();
    let options = FileOptions::default().compression_method(method);
    dst.start_file(name, options)
        .map_err(|e| Error::Internal(format!("copying entry: {e}")))?;
    let mut buf = Vec::with_capacity(src.size() as usize);
    src.read_to_end(&mut buf)?;
    dst.write_all(&buf)
        .map_err(|e| Error::Internal(format!("copying entry: {e}")))?;
    Ok(())
}

/// Runs `body` against a fresh writer built from the current contents of
/// `archive_path`, then atomically swaps the rewritten file into place. On
/// any failure the temporary file is removed and the original archive is
/// left untouched.
fn rewrite_with(
    archive_path: &Path,
    body: impl FnOnce(&mut ZipArchive<std::fs::File>, &mut ZipWriter<std::fs::File>) -> Result<()>,
) -> Result<()> {
    let temp_writing = temp_sibling(archive_path, monotonic_suffix());

    let result = (|| -> Result<()> {
        let mut zip = open_archive(archive_path)?;
        let out = std::fs::File::create(&temp_writing)?;
        let mut writer = ZipWriter::new(out);
        body(&mut zip, &mut writer)?;
        writer
            .finish()
            .map_err(|e| Error::Internal(format!("finishing rewrite: {e}")))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_writing);
        return Err(e);
    }

    let temp_renaming = temp_sibling(archive_path, monotonic_suffix() + 1);
    std::fs::rename(archive_path, &temp_renaming)?;
    if let Err(e) = std::fs::rename(&temp_writing, archive_path) {
        // best effort: restore the original so callers never see it missing.
        let _ = std::fs::rename(&temp_renaming, archive_path);
        return Err(Error::Internal(format!("swapping rewritten archive: {e}")));
    }
    let _ = std::fs::remove_file(&temp_renaming);
    Ok(())
}

fn dos_datetime_to_epoch(dt: zip::DateTime) -> Option<u64> {
    use chrono::{NaiveDate, NaiveTime};
    let date = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?;
    let time = NaiveTime::from_hms_opt(
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )?;
    Some(date.and_time(time).and_utc().timestamp() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_names(path: &Path) -> Vec<String> {
        let zip = open_archive(path).unwrap();
        zip.file_names().map(|s| s.to_string()).collect()
    }

    #[test]
    fn write_existing_entry_preserves_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("hello.txt", b"old"), ("other.bin", b"xx")]);

        write_entry(&path, "hello.txt", b"new").unwrap();

        assert_eq!(read_entry(&path, "hello.txt").unwrap(), b"new");
        assert_eq!(read_entry(&path, "other.bin").unwrap(), b"xx");
    }

    #[test]
    fn write_new_entry_uses_append_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("hello.txt", b"hi")]);

        write_entry(&path, "new.txt", b"fresh").unwrap();

        assert_eq!(read_entry(&path, "new.txt").unwrap(), b"fresh");
        assert_eq!(read_entry(&path, "hello.txt").unwrap(), b"hi");
    }

    #[test]
    fn delete_missing_entry_is_an_error_and_leaves_archive_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("hello.txt", b"hi")]);

        let before = read_names(&path);
        let err = delete_entry(&path, "missing.txt").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(read_names(&path), before);
    }

    #[test]
    fn delete_removes_entry_and_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(
            &path,
            &[("dir/a.txt", b"1"), ("dir/b.txt", b"2"), ("keep.txt", b"3")],
        );

        delete_entry(&path, "dir").unwrap();

        let names = read_names(&path);
        assert!(!names.iter().any(|n| n.starts_with("dir")));
        assert!(names.contains(&"keep.txt".to_string()));
    }

    #[test]
    fn mkdir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("keep.txt", b"1")]);

        mkdir_entry(&path, "sub").unwrap();
        mkdir_entry(&path, "sub").unwrap();

        assert_eq!(entry_info(&path, "sub").unwrap().kind, EntryKind::Dir);
    }

    #[test]
    fn list_dir_reports_implicit_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("sub/inner.txt", b"1")]);

        let entries = list_dir(&path, "").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "sub");
        assert_eq!(entries[0].kind, EntryKind::Dir);
    }

    #[test]
    fn list_dir_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        make_zip(&path, &[("keep.txt", b"1")]);

        assert!(list_dir(&path, "nope").is_err());
    }
}
