use crate::binding::RootBinding;
use crate::event::{ChangeEvent, ChangeKind};
use crate::file_op::{self, EntryKind, Outcome};
use crate::mirror::Mirror;
use crate::retry::RetryPolicy;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use walkdir::WalkDir;

const PROGRESS_EVERY: u64 = 5000;

/// Counters of one full synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub entries: u64,
    pub dirs_scanned: u64,
    pub dirs_updated: u64,
    pub files_scanned: u64,
    pub files_updated: u64,
}

impl SyncStats {
    pub fn updated(&self) -> u64 {
        self.dirs_updated + self.files_updated
    }
}

/// Applies source state to a destination tree, either by a full
/// comparison pass or one change at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSynchronizer {
    retry: RetryPolicy,
}

impl TreeSynchronizer {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Compare the whole source tree of `binding` with its destination and
    /// copy everything missing or outdated. Nothing is ever deleted.
    pub fn full_sync(&self, binding: &RootBinding, report_progress: bool) -> Result<SyncStats> {
        if report_progress {
            info!(
                "Synchronizing {} to {}...",
                binding.source_root().display(),
                binding.dest_root().display()
            );
        }
        if file_op::entry_kind(binding.source_root())? != Some(EntryKind::Dir) {
            bail!("{} is not a directory", binding.source_root().display());
        }
        self.sync_subtree(binding, binding.source_root(), report_progress)
    }

    /// Full pass limited to `src_dir`, a directory at or below the source root.
    pub fn sync_subtree(
        &self,
        binding: &RootBinding,
        src_dir: &Path,
        report_progress: bool,
    ) -> Result<SyncStats> {
        self.walk(binding, src_dir, report_progress, self.retry)
    }

    fn walk(
        &self,
        binding: &RootBinding,
        src_dir: &Path,
        report_progress: bool,
        retry: RetryPolicy,
    ) -> Result<SyncStats> {
        let started = Instant::now();
        let dest_dir = binding.dest_path(src_dir)?;
        let mut listings = Listings::default();
        if src_dir == binding.source_root() {
            retry.run_blocking(|| file_op::create_dir(&dest_dir))?;
        } else {
            retry.run_blocking(|| sync_dir(&dest_dir, &mut listings))?;
        }

        let filter = binding.filter();
        let mut stats = SyncStats::default();
        let walker = WalkDir::new(src_dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !filter.is_excluded(e.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(file_op::is_not_found) => {
                    debug!("Skip vanished entry: {e}");
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("scan {}", src_dir.display())),
            };
            stats.entries += 1;
            let dest = binding.dest_path(entry.path())?;
            if entry.file_type().is_dir() {
                stats.dirs_scanned += 1;
                if retry.run_blocking(|| sync_dir(&dest, &mut listings))? {
                    stats.dirs_updated += 1;
                }
            } else {
                stats.files_scanned += 1;
                if retry.run_blocking(|| sync_file(entry.path(), &dest, &mut listings))? {
                    stats.files_updated += 1;
                }
            }
            if report_progress && stats.entries % PROGRESS_EVERY == 0 {
                info!(
                    "{} entries scanned, {} updated",
                    stats.entries,
                    stats.updated()
                );
            }
        }

        if report_progress {
            info!(
                "Synchronized {} in {:.1?}: directories scanned {}, updated {}; files scanned {}, updated {}",
                src_dir.display(),
                started.elapsed(),
                stats.dirs_scanned,
                stats.dirs_updated,
                stats.files_scanned,
                stats.files_updated
            );
        }
        Ok(stats)
    }

    /// Apply a single detected change to the destination tree.
    pub fn apply_incremental(&self, event: &ChangeEvent) -> Result<()> {
        let Some(binding) = event.binding() else {
            return Ok(());
        };
        let filter = binding.filter();
        match event.kind() {
            ChangeKind::Created(path) | ChangeKind::Changed(path) => {
                if filter.is_excluded(path) {
                    return Ok(());
                }
                debug!("Event {}", event.kind());
                let dest = binding.dest_path(path)?;
                match file_op::entry_kind(path)? {
                    // Children arrive as their own events
                    Some(EntryKind::Dir) => file_op::create_dir(&dest)?,
                    Some(EntryKind::File) => {
                        if file_op::copy_file(path, &dest)? == Outcome::Vanished {
                            debug!("{} vanished before it could be copied", path.display());
                        }
                    }
                    None => debug!("{} vanished before it could be copied", path.display()),
                }
            }
            ChangeKind::Deleted(path) => {
                if filter.is_excluded(path) {
                    return Ok(());
                }
                debug!("Event {}", event.kind());
                file_op::remove_path(&binding.dest_path(path)?)?;
            }
            ChangeKind::Renamed { from, to } => self.apply_rename(binding, from, to)?,
            ChangeKind::WatchError(cause) => {
                info!(
                    "The file system watcher of {} detected an error: {cause}",
                    binding.source_root().display()
                );
            }
            ChangeKind::Poison => {}
        }
        Ok(())
    }

    fn apply_rename(&self, binding: &RootBinding, from: &Path, to: &Path) -> Result<()> {
        let filter = binding.filter();
        debug!("Event renamed {} -> {}", from.display(), to.display());
        match (filter.is_excluded(from), filter.is_excluded(to)) {
            (false, false) => {
                let dest_from = binding.dest_path(from)?;
                if file_op::rename_path(&dest_from, &binding.dest_path(to)?)? == Outcome::Vanished {
                    debug!(
                        "{} was never mirrored, copying {} instead",
                        dest_from.display(),
                        to.display()
                    );
                    self.copy_into_scope(binding, to)?;
                }
            }
            // Entered the mirrored scope: it was never copied, so there is
            // nothing to rename on the destination side.
            (true, false) => self.copy_into_scope(binding, to)?,
            // Left the mirrored scope. The source may be gone already, so
            // both steps only look at the destination.
            (false, true) => {
                let dest_to = binding.dest_path(to)?;
                file_op::rename_path(&binding.dest_path(from)?, &dest_to)?;
                file_op::remove_path(&dest_to)?;
            }
            (true, true) => {}
        }
        Ok(())
    }

    // Runs inside the processor's retry loop, so the subtree pass makes a
    // single attempt per entry.
    fn copy_into_scope(&self, binding: &RootBinding, path: &Path) -> Result<()> {
        match file_op::entry_kind(path)? {
            Some(EntryKind::Dir) => {
                self.walk(binding, path, false, RetryPolicy::once())?;
            }
            Some(EntryKind::File) => {
                file_op::copy_file(path, &binding.dest_path(path)?)?;
            }
            None => debug!("{} vanished before it could be copied", path.display()),
        }
        Ok(())
    }
}

#[async_trait]
impl Mirror for TreeSynchronizer {
    async fn apply(&self, event: &ChangeEvent) -> Result<()> {
        let synchronizer = *self;
        let event = event.clone();
        tokio::task::spawn_blocking(move || synchronizer.apply_incremental(&event))
            .await
            .context("synchronizer worker panicked")?
    }
}

fn sync_dir(dest: &Path, listings: &mut Listings) -> Result<bool> {
    let Some(stored) = listings.stored_name(dest)? else {
        file_op::create_dir(dest)?;
        return Ok(true);
    };
    let renamed = fix_case(dest, &stored, listings)?;
    if file_op::entry_kind(dest)? != Some(EntryKind::Dir) {
        file_op::remove_path(dest)?;
        file_op::create_dir(dest)?;
        return Ok(true);
    }
    Ok(renamed)
}

fn sync_file(src: &Path, dest: &Path, listings: &mut Listings) -> Result<bool> {
    let src_meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if file_op::is_not_found(&e) => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("stat {}", src.display())),
    };
    if src_meta.is_dir() {
        debug!("Skip symlinked directory {}", src.display());
        return Ok(false);
    }
    let Some(stored) = listings.stored_name(dest)? else {
        return Ok(file_op::copy_file(src, dest)? == Outcome::Applied);
    };
    let renamed = fix_case(dest, &stored, listings)?;
    let dest_meta = fs::metadata(dest).with_context(|| format!("stat {}", dest.display()))?;
    if dest_meta.is_dir() {
        file_op::remove_path(dest)?;
    } else if !is_outdated(&src_meta, &dest_meta) {
        return Ok(renamed);
    }
    Ok(file_op::copy_file(src, dest)? == Outcome::Applied || renamed)
}

/// Source strictly newer than the destination, or a different size.
fn is_outdated(src: &Metadata, dest: &Metadata) -> bool {
    let newer = match (src.modified(), dest.modified()) {
        (Ok(src_time), Ok(dest_time)) => src_time > dest_time,
        _ => false,
    };
    newer || src.len() != dest.len()
}

/// Rename the entry stored as `stored` next to `dest` when its name only
/// differs from the wanted one by letter case.
fn fix_case(dest: &Path, stored: &OsStr, listings: &mut Listings) -> Result<bool> {
    if dest.file_name() == Some(stored) {
        return Ok(false);
    }
    let current = dest.with_file_name(stored);
    debug!("Fix case {} -> {}", current.display(), dest.display());
    let outcome = file_op::rename_path(&current, dest)?;
    listings.replace(dest, stored);
    Ok(outcome == Outcome::Applied)
}

/// Cached names of destination directories, used to read back the exact
/// stored spelling of an entry.
#[derive(Debug, Default)]
struct Listings {
    dirs: HashMap<PathBuf, Vec<OsString>>,
}

impl Listings {
    /// Stored name of `path`: the exact name if present, otherwise a name
    /// equal to it ignoring case.
    fn stored_name(&mut self, path: &Path) -> Result<Option<OsString>> {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(None);
        };
        // The walk is depth first: directories that are not ancestors of
        // the current one are never visited again.
        self.dirs.retain(|dir, _| parent.starts_with(dir));
        let names = match self.dirs.entry(parent.to_path_buf()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(file_op::list_names(parent)?),
        };
        Ok(names
            .iter()
            .find(|n| n.as_os_str() == name)
            .or_else(|| names.iter().find(|n| file_op::same_ignoring_case(n, name)))
            .cloned())
    }

    fn replace(&mut self, path: &Path, old: &OsStr) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if let Some(names) = self.dirs.get_mut(parent) {
            for n in names.iter_mut().filter(|n| n.as_os_str() == old) {
                *n = name.to_os_string();
            }
        }
    }
}
