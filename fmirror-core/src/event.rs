use crate::binding::RootBinding;
use notify::{
    event::{MetadataKind, ModifyKind, RenameMode},
    EventKind,
};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What happened to a path under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// The watch subsystem failed or dropped notifications.
    WatchError(String),
    /// Shutdown sentinel; never produced by a watcher.
    Poison,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created(p) => write!(f, "created {}", p.display()),
            ChangeKind::Changed(p) => write!(f, "changed {}", p.display()),
            ChangeKind::Deleted(p) => write!(f, "deleted {}", p.display()),
            ChangeKind::Renamed { from, to } => {
                write!(f, "renamed {} -> {}", from.display(), to.display())
            }
            ChangeKind::WatchError(cause) => write!(f, "watch error: {cause}"),
            ChangeKind::Poison => f.write_str("poison"),
        }
    }
}

/// One detected change, stamped with its origin root and arrival time.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    binding: Option<Arc<RootBinding>>,
    kind: ChangeKind,
    detected_at: Instant,
}

impl ChangeEvent {
    pub fn new(binding: Arc<RootBinding>, kind: ChangeKind) -> Self {
        Self::detected(binding, kind, Instant::now())
    }

    /// Event with an explicit detection time.
    pub fn detected(binding: Arc<RootBinding>, kind: ChangeKind, detected_at: Instant) -> Self {
        Self {
            binding: Some(binding),
            kind,
            detected_at,
        }
    }

    pub fn poison() -> Self {
        Self {
            binding: None,
            kind: ChangeKind::Poison,
            detected_at: Instant::now(),
        }
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, ChangeKind::Poison)
    }

    /// Root the event came from; `None` only for the sentinel.
    pub fn binding(&self) -> Option<&Arc<RootBinding>> {
        self.binding.as_ref()
    }

    pub fn kind(&self) -> &ChangeKind {
        &self.kind
    }

    pub fn detected_at(&self) -> Instant {
        self.detected_at
    }

    pub fn age(&self) -> Duration {
        self.detected_at.elapsed()
    }
}

/// How long a "renamed from" half waits for its "renamed to" partner
/// before it is treated as a move out of the tree.
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct PendingRename {
    tracker: Option<usize>,
    path: PathBuf,
    since: Instant,
}

/// Turns notify events into changes, pairing the halves of a rename.
///
/// Backends report one rename in pieces: inotify sends a "from" half, a
/// "to" half and then the joined event, all carrying the same tracker.
/// A "from" half is held back until its partner arrives; a joined event
/// for a tracker that was already paired is dropped. A "from" half left
/// alone for longer than the pairing window becomes a deletion when
/// [`ChangeNormalizer::expire`] runs.
///
/// `exists` reports whether a path is currently present on disk. It is used
/// to drop deletions of paths that still exist (a case-only rename is
/// reported as delete + create before the rename itself) and to classify
/// rename halves of unknown direction.
#[derive(Debug)]
pub struct ChangeNormalizer {
    window: Duration,
    pending: VecDeque<PendingRename>,
    paired: VecDeque<(usize, Instant)>,
}

impl Default for ChangeNormalizer {
    fn default() -> Self {
        Self::new(RENAME_PAIR_WINDOW)
    }
}

impl ChangeNormalizer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: VecDeque::new(),
            paired: VecDeque::new(),
        }
    }

    /// Whether rename halves are waiting for a partner.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Convert one notify event received at `now`. Expired halves are
    /// flushed first so they keep their place ahead of the new event.
    pub fn normalize(
        &mut self,
        event: &notify::Event,
        now: Instant,
        exists: impl Fn(&Path) -> bool,
    ) -> Vec<ChangeKind> {
        let mut changes = self.expire(now, &exists);
        if event.need_rescan() {
            changes.push(ChangeKind::WatchError(
                "notification backlog overflowed, some changes were dropped".into(),
            ));
            return changes;
        }
        let tracker = event.tracker();
        match event.kind {
            EventKind::Create(_) => {
                for p in &event.paths {
                    changes.push(ChangeKind::Created(p.clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let already_paired = tracker.is_some_and(|t| self.take_paired(t));
                if let (false, [from, to]) = (already_paired, event.paths.as_slice()) {
                    self.pending
                        .retain(|r| !(r.tracker.is_some() && r.tracker == tracker));
                    changes.push(ChangeKind::Renamed {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for p in &event.paths {
                    self.pending.push_back(PendingRename {
                        tracker,
                        path: p.clone(),
                        since: now,
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for p in &event.paths {
                    match self.take_pending(tracker) {
                        Some(from) => {
                            if let Some(t) = tracker {
                                self.paired.push_back((t, now));
                            }
                            changes.push(ChangeKind::Renamed {
                                from,
                                to: p.clone(),
                            });
                        }
                        // Moved into the tree
                        None => changes.push(ChangeKind::Created(p.clone())),
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for p in &event.paths {
                    if exists(p.as_path()) {
                        changes.push(ChangeKind::Created(p.clone()));
                    } else {
                        changes.push(ChangeKind::Deleted(p.clone()));
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => {}
            EventKind::Modify(_) => {
                for p in &event.paths {
                    changes.push(ChangeKind::Changed(p.clone()));
                }
            }
            EventKind::Remove(_) => {
                for p in &event.paths {
                    if !exists(p.as_path()) {
                        changes.push(ChangeKind::Deleted(p.clone()));
                    }
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        changes
    }

    /// Flush "from" halves older than the pairing window. Each one is a
    /// move out of the tree, reported as a deletion unless the path has
    /// been recreated since.
    pub fn expire(&mut self, now: Instant, exists: impl Fn(&Path) -> bool) -> Vec<ChangeKind> {
        let window = self.window;
        self.paired
            .retain(|(_, since)| now.saturating_duration_since(*since) < window);
        let mut changes = Vec::new();
        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.since) < window {
                break;
            }
            if let Some(gone) = self.pending.pop_front() {
                if !exists(gone.path.as_path()) {
                    changes.push(ChangeKind::Deleted(gone.path));
                }
            }
        }
        changes
    }

    // Oldest waiting "from" half with the same tracker. Halves without a
    // tracker pair in arrival order.
    fn take_pending(&mut self, tracker: Option<usize>) -> Option<PathBuf> {
        let idx = self.pending.iter().position(|r| r.tracker == tracker)?;
        self.pending.remove(idx).map(|r| r.path)
    }

    fn take_paired(&mut self, tracker: usize) -> bool {
        match self.paired.iter().position(|(t, _)| *t == tracker) {
            Some(idx) => {
                self.paired.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, RemoveKind};

    fn never(_: &Path) -> bool {
        false
    }

    fn always(_: &Path) -> bool {
        true
    }

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn rename(mode: RenameMode, tracker: usize, paths: &[&str]) -> notify::Event {
        event(EventKind::Modify(ModifyKind::Name(mode)), paths).set_tracker(tracker)
    }

    fn once(event: &notify::Event, exists: impl Fn(&Path) -> bool) -> Vec<ChangeKind> {
        ChangeNormalizer::default().normalize(event, Instant::now(), exists)
    }

    #[test]
    fn create_modify_remove() {
        let created = event(EventKind::Create(CreateKind::File), &["/r/a"]);
        assert_eq!(once(&created, never), vec![ChangeKind::Created("/r/a".into())]);

        let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/r/a"]);
        assert_eq!(once(&written, always), vec![ChangeKind::Changed("/r/a".into())]);

        let removed = event(EventKind::Remove(RemoveKind::Folder), &["/r/d"]);
        assert_eq!(once(&removed, never), vec![ChangeKind::Deleted("/r/d".into())]);
    }

    #[test]
    fn delete_of_existing_path_is_suppressed() {
        let removed = event(EventKind::Remove(RemoveKind::Any), &["/r/Foo"]);
        assert!(once(&removed, always).is_empty());
    }

    #[test]
    fn joined_rename_without_halves() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/r/old", "/r/new"],
        );
        assert_eq!(
            once(&renamed, always),
            vec![ChangeKind::Renamed {
                from: "/r/old".into(),
                to: "/r/new".into()
            }]
        );
    }

    #[test]
    fn inotify_rename_sequence_yields_one_rename() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        let mut changes = Vec::new();
        changes.extend(normalizer.normalize(&rename(RenameMode::From, 7, &["/r/d"]), now, never));
        changes.extend(normalizer.normalize(&rename(RenameMode::To, 7, &["/r/e"]), now, always));
        changes.extend(normalizer.normalize(
            &rename(RenameMode::Both, 7, &["/r/d", "/r/e"]),
            now,
            always,
        ));
        assert_eq!(
            changes,
            vec![ChangeKind::Renamed {
                from: "/r/d".into(),
                to: "/r/e".into()
            }]
        );
        assert!(!normalizer.has_pending());
        assert!(normalizer.expire(now + RENAME_PAIR_WINDOW, never).is_empty());
    }

    #[test]
    fn halves_pair_by_tracker() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        assert!(normalizer
            .normalize(&rename(RenameMode::From, 1, &["/r/a"]), now, never)
            .is_empty());
        assert!(normalizer
            .normalize(&rename(RenameMode::From, 2, &["/r/b"]), now, never)
            .is_empty());
        assert_eq!(
            normalizer.normalize(&rename(RenameMode::To, 2, &["/r/b2"]), now, always),
            vec![ChangeKind::Renamed {
                from: "/r/b".into(),
                to: "/r/b2".into()
            }]
        );
        assert_eq!(
            normalizer.normalize(&rename(RenameMode::To, 1, &["/r/a2"]), now, always),
            vec![ChangeKind::Renamed {
                from: "/r/a".into(),
                to: "/r/a2".into()
            }]
        );
    }

    #[test]
    fn halves_without_tracker_pair_in_order() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/r/x"]);
        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/r/y"]);
        assert!(normalizer.normalize(&from, now, never).is_empty());
        assert_eq!(
            normalizer.normalize(&to, now, always),
            vec![ChangeKind::Renamed {
                from: "/r/x".into(),
                to: "/r/y".into()
            }]
        );
    }

    #[test]
    fn lone_from_half_expires_as_deletion() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        assert!(normalizer
            .normalize(&rename(RenameMode::From, 3, &["/r/out"]), now, never)
            .is_empty());
        assert!(normalizer.expire(now + Duration::from_millis(100), never).is_empty());
        assert!(normalizer.has_pending());
        assert_eq!(
            normalizer.expire(now + RENAME_PAIR_WINDOW, never),
            vec![ChangeKind::Deleted("/r/out".into())]
        );
        assert!(!normalizer.has_pending());
    }

    #[test]
    fn expired_half_is_flushed_before_the_next_event() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        normalizer.normalize(&rename(RenameMode::From, 3, &["/r/out"]), now, never);
        let created = event(EventKind::Create(CreateKind::File), &["/r/new"]);
        assert_eq!(
            normalizer.normalize(&created, now + Duration::from_secs(1), never),
            vec![
                ChangeKind::Deleted("/r/out".into()),
                ChangeKind::Created("/r/new".into())
            ]
        );
    }

    #[test]
    fn expired_half_of_recreated_path_is_dropped() {
        let mut normalizer = ChangeNormalizer::default();
        let now = Instant::now();
        normalizer.normalize(&rename(RenameMode::From, 4, &["/r/back"]), now, never);
        assert!(normalizer.expire(now + RENAME_PAIR_WINDOW, always).is_empty());
    }

    #[test]
    fn lone_to_half_is_a_creation() {
        assert_eq!(
            once(&rename(RenameMode::To, 9, &["/r/came"]), always),
            vec![ChangeKind::Created("/r/came".into())]
        );
    }

    #[test]
    fn rename_of_unknown_direction_is_classified_by_existence() {
        let any = event(EventKind::Modify(ModifyKind::Name(RenameMode::Any)), &["/r/x", "/r/y"]);
        let exists = |p: &Path| p == Path::new("/r/y");
        assert_eq!(
            once(&any, exists),
            vec![
                ChangeKind::Deleted("/r/x".into()),
                ChangeKind::Created("/r/y".into())
            ]
        );
    }

    #[test]
    fn access_is_ignored() {
        let read = event(EventKind::Access(AccessKind::Any), &["/r/a"]);
        assert!(once(&read, always).is_empty());
        let atime = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            &["/r/a"],
        );
        assert!(once(&atime, always).is_empty());
    }

    #[test]
    fn rescan_becomes_watch_error() {
        let overflow = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let changes = once(&overflow, never);
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], ChangeKind::WatchError(_)));
    }

    #[test]
    fn poison_has_no_binding() {
        let poison = ChangeEvent::poison();
        assert!(poison.is_poison());
        assert!(poison.binding().is_none());
    }
}
