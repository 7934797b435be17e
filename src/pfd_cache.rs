//! The per-process file-descriptor table: every kernel fd the traced
//! backend currently has open, keyed by fd number.
//! Ported in spirit from `pfd_cache.c`: append-mostly with tombstones,
//! growing in fixed chunks, identical in shape to `RnCache`.

use crate::cluster::ClusterContext;
use crate::error::ClusterError;
use crate::pfd::{FdKind, Pfd};

const GROWTH_CHUNK: usize = 64;

#[derive(Debug, Clone)]
struct Slot {
    pfd: Pfd,
    tombstoned: bool,
}

#[derive(Debug, Default)]
pub struct PfdCache {
    entries: Vec<Slot>,
}

impl PfdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `fd` is now open, pointing at `path`, classifying it
    /// against cluster conventions, mirroring `process_func_open`.
    /// Returns whether the path classified as a PostgreSQL relation file.
    pub fn on_open(&mut self, fd: i32, path: &str, fd_kind: FdKind, ctx: &mut ClusterContext) -> Result<bool, ClusterError> {
        let mut pfd = Pfd::new(fd, fd_kind);
        let is_pg_file = pfd.classify_path(path, ctx)?;
        self.insert(fd, pfd);
        Ok(is_pg_file)
    }

    /// Preloads a single fd discovered during bootstrap `lsof` inventory.
    /// Path classification failures during bootstrap are the caller's
    /// concern, not this cache's.
    pub fn preload(&mut self, fd: i32, path: Option<&str>, fd_kind: FdKind, ctx: &mut ClusterContext) -> Result<(), ClusterError> {
        let mut pfd = Pfd::new(fd, fd_kind);
        if let Some(path) = path {
            pfd.classify_path(path, ctx)?;
        }
        self.insert(fd, pfd);
        Ok(())
    }

    fn insert(&mut self, fd: i32, pfd: Pfd) {
        if let Some(slot) = self.find_slot_mut(fd) {
            slot.pfd = pfd;
            slot.tombstoned = false;
            return;
        }
        if let Some(slot) = self.entries.iter_mut().find(|s| s.tombstoned) {
            slot.pfd = pfd;
            slot.tombstoned = false;
            return;
        }
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve(GROWTH_CHUNK);
        }
        self.entries.push(Slot { pfd, tombstoned: false });
    }

    /// Overwrites the live entry for `pfd.fd` in place, used to persist a
    /// relname resolved after the initial `on_open`/`preload` classification.
    pub fn update(&mut self, pfd: Pfd) {
        if let Some(slot) = self.find_slot_mut(pfd.fd) {
            slot.pfd = pfd;
        }
    }

    /// Tombstones the slot for `fd`, mirroring `process_func_close`. The
    /// `tombstoned` flag is what actually excludes the slot from lookups
    /// and marks it reusable; `invalidate()` additionally clears the
    /// stored `Pfd` itself so a tombstoned slot's `fd_kind` reads as
    /// `Invalid` rather than whatever it was last classified as.
    pub fn on_close(&mut self, fd: i32) {
        if let Some(slot) = self.find_slot_mut(fd) {
            slot.pfd.invalidate();
            slot.tombstoned = true;
        }
    }

    fn find_slot_mut(&mut self, fd: i32) -> Option<&mut Slot> {
        self.entries.iter_mut().find(|s| !s.tombstoned && s.pfd.fd == fd)
    }

    /// Looks up `fd`, synthesizing a placeholder on a miss so callers
    /// always have something to `repr()`: a `read`/`write`
    /// on an fd we never saw opened still needs an annotation.
    pub fn get(&self, fd: i32) -> Pfd {
        self.entries
            .iter()
            .find(|s| !s.tombstoned && s.pfd.fd == fd)
            .map(|s| s.pfd.clone())
            .unwrap_or_else(|| Pfd::placeholder(fd))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|s| !s.tombstoned).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_unseen_fd_synthesizes_placeholder() {
        let cache = PfdCache::new();
        let pfd = cache.get(99);
        assert_eq!(pfd.fd, 99);
        assert_eq!(pfd.repr(), "fd=99");
    }

    #[test]
    fn open_then_get_returns_classified_pfd() {
        let mut cache = PfdCache::new();
        let mut ctx = ClusterContext::new();
        cache.on_open(4, "/data/base/16386/12345", FdKind::Reg, &mut ctx).unwrap();
        let pfd = cache.get(4);
        assert_eq!(pfd.filenode, 12345);
        assert!(!pfd.shared);
    }

    #[test]
    fn close_then_get_falls_back_to_placeholder() {
        let mut cache = PfdCache::new();
        let mut ctx = ClusterContext::new();
        cache.on_open(4, "/data/base/16386/12345", FdKind::Reg, &mut ctx).unwrap();
        cache.on_close(4);
        let pfd = cache.get(4);
        assert_eq!(pfd.repr(), "fd=4");
    }

    #[test]
    fn on_close_invalidates_the_pfd_in_place() {
        let mut cache = PfdCache::new();
        let mut ctx = ClusterContext::new();
        cache.on_open(4, "/data/base/16386/12345", FdKind::Reg, &mut ctx).unwrap();
        cache.on_close(4);
        let slot = cache.entries.iter().find(|s| s.pfd.fd == 4).unwrap();
        assert!(slot.tombstoned);
        assert_eq!(slot.pfd.fd_kind, FdKind::Invalid);
        assert!(slot.pfd.relname.is_none());
    }

    #[test]
    fn reopen_reuses_tombstoned_slot_not_growth() {
        let mut cache = PfdCache::new();
        let mut ctx = ClusterContext::new();
        cache.on_open(4, "/data/base/16386/1", FdKind::Reg, &mut ctx).unwrap();
        cache.on_open(5, "/data/base/16386/2", FdKind::Reg, &mut ctx).unwrap();
        cache.on_close(4);
        cache.on_open(6, "/data/base/16386/3", FdKind::Reg, &mut ctx).unwrap();
        assert_eq!(cache.entries.len(), 2, "tombstoned slot should be reused, not grown");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reopening_same_fd_replaces_in_place() {
        let mut cache = PfdCache::new();
        let mut ctx = ClusterContext::new();
        cache.on_open(4, "/data/base/16386/1", FdKind::Reg, &mut ctx).unwrap();
        cache.on_open(4, "/data/base/16386/2", FdKind::Reg, &mut ctx).unwrap();
        assert_eq!(cache.entries.len(), 1);
        assert_eq!(cache.get(4).filenode, 2);
    }
}
