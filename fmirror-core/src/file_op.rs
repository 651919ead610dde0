//! Filesystem primitives used to mutate destination trees.
//!
//! A source path that disappears between detection and processing is an
//! expected outcome, not a failure: such calls return [`Outcome::Vanished`].

use anyhow::{Context, Result};
use filetime::FileTime;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The path the operation depends on no longer exists.
    Vanished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

pub(crate) fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Kind of the entry at `path`, following symlinks. `None` when absent.
pub fn entry_kind(path: &Path) -> Result<Option<EntryKind>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
        Ok(_) => Ok(Some(EntryKind::File)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
    }
}

pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

/// Copy `src` over `dest`, carrying the source modification time along.
pub fn copy_file(src: &Path, dest: &Path) -> Result<Outcome> {
    let src_meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if is_not_found(&e) => return Ok(Outcome::Vanished),
        Err(e) => return Err(e).with_context(|| format!("stat {}", src.display())),
    };
    if let Some(parent) = dest.parent() {
        create_dir(parent)?;
    }
    clear_readonly(dest)?;
    if let Err(e) = fs::copy(src, dest) {
        if is_not_found(&e) && !src.exists() {
            return Ok(Outcome::Vanished);
        }
        return Err(e).with_context(|| format!("copy {} -> {}", src.display(), dest.display()));
    }
    // The copy carries the source mode along, so the destination may be
    // read-only by now; set the time by path instead of through a handle.
    filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&src_meta))
        .with_context(|| format!("set modification time of {}", dest.display()))?;
    Ok(Outcome::Applied)
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) -> Result<()> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
    };
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)
            .with_context(|| format!("clear read-only flag on {}", path.display()))?;
    }
    Ok(())
}

/// Remove a file or a whole directory tree.
pub fn remove_path(path: &Path) -> Result<Outcome> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if is_not_found(&e) => {
            debug!("Nothing to remove at {}", path.display());
            return Ok(Outcome::Vanished);
        }
        Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match res {
        Ok(()) => Ok(Outcome::Applied),
        Err(e) if is_not_found(&e) => Ok(Outcome::Vanished),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Rename `from` to `to`; works for files and directories.
///
/// When the two paths differ only by letter case the rename goes through a
/// temporary name, since a direct rename is a no-op on case-insensitive
/// filesystems.
pub fn rename_path(from: &Path, to: &Path) -> Result<Outcome> {
    if from != to && same_ignoring_case(from.as_os_str(), to.as_os_str()) {
        return rename_case_only(from, to);
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(Outcome::Applied),
        Err(e) if is_not_found(&e) && fs::symlink_metadata(from).is_err() => {
            debug!("Nothing to rename at {}", from.display());
            Ok(Outcome::Vanished)
        }
        Err(e) => Err(e).with_context(|| format!("rename {} -> {}", from.display(), to.display())),
    }
}

fn rename_case_only(from: &Path, to: &Path) -> Result<Outcome> {
    let tmp = from.with_file_name(temp_name(from.file_name().unwrap_or_default()));
    match fs::rename(from, &tmp) {
        Ok(()) => {}
        Err(e) if is_not_found(&e) => return Ok(Outcome::Vanished),
        Err(e) => {
            return Err(e).with_context(|| format!("rename {} -> {}", from.display(), tmp.display()))
        }
    }
    fs::rename(&tmp, to)
        .with_context(|| format!("rename {} -> {}", tmp.display(), to.display()))?;
    Ok(Outcome::Applied)
}

fn temp_name(name: &OsStr) -> OsString {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let mut tmp = OsString::from(".");
    tmp.push(name);
    tmp.push(format!(".{}-{nanos}.fmirror", std::process::id()));
    tmp
}

/// Names equal under Unicode lowercase folding.
pub fn same_ignoring_case(a: &OsStr, b: &OsStr) -> bool {
    match (a.to_str(), b.to_str()) {
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => a == b,
    }
}

/// Names of the entries of `dir`; empty when `dir` does not exist.
pub fn list_names(dir: &Path) -> Result<Vec<OsString>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if is_not_found(&e) => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        names.push(entry.file_name());
    }
    Ok(names)
}
