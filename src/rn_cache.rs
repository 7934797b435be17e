//! In-memory `(origin, oid, filenode, relname)` table, avoiding repeated
//! linear scans of the on-disk relmap/pg_class data. Ported
//! in spirit from `rn_cache.c`: append-mostly with tombstones, growing in
//! fixed chunks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RnOrigin {
    Relmap,
    PgClass,
}

#[derive(Debug, Clone)]
struct RnRecord {
    #[allow(dead_code)]
    origin: RnOrigin,
    oid: u32,
    filenode: u32,
    relname: String,
    tombstoned: bool,
}

const GROWTH_CHUNK: usize = 64;

#[derive(Debug, Default)]
pub struct RnCache {
    entries: Vec<RnRecord>,
}

impl RnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the first tombstoned slot, or appends, growing capacity in
    /// fixed chunks. Collisions (same OID from both origins) keep the
    /// first entry: no update path is needed for a read-only observer.
    pub fn add(&mut self, origin: RnOrigin, oid: u32, filenode: u32, relname: impl Into<String>) {
        let relname = relname.into();
        if let Some(slot) = self.entries.iter_mut().find(|e| e.tombstoned) {
            slot.origin = origin;
            slot.oid = oid;
            slot.filenode = filenode;
            slot.relname = relname;
            slot.tombstoned = false;
            return;
        }
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve(GROWTH_CHUNK);
        }
        self.entries.push(RnRecord {
            origin,
            oid,
            filenode,
            relname,
            tombstoned: false,
        });
    }

    pub fn get_by_oid(&self, oid: u32) -> Option<&str> {
        if oid == 0 {
            return None;
        }
        self.entries
            .iter()
            .find(|e| !e.tombstoned && e.oid == oid)
            .map(|e| e.relname.as_str())
    }

    pub fn get_by_filenode(&self, filenode: u32) -> Option<&str> {
        if filenode == 0 {
            return None;
        }
        self.entries
            .iter()
            .find(|e| !e.tombstoned && e.filenode == filenode)
            .map(|e| e.relname.as_str())
    }

    pub fn delete(&mut self, oid: u32) {
        for e in self.entries.iter_mut() {
            if !e.tombstoned && e.oid == oid {
                e.tombstoned = true;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.tombstoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_oid_and_filenode() {
        let mut cache = RnCache::new();
        cache.add(RnOrigin::PgClass, 16390, 12345, "accounts");
        assert_eq!(cache.get_by_oid(16390), Some("accounts"));
        assert_eq!(cache.get_by_filenode(12345), Some("accounts"));
        assert_eq!(cache.get_by_oid(1), None);
    }

    #[test]
    fn invalid_keys_never_match() {
        let mut cache = RnCache::new();
        cache.add(RnOrigin::Relmap, 0, 0, "nothing");
        assert_eq!(cache.get_by_oid(0), None);
        assert_eq!(cache.get_by_filenode(0), None);
    }

    #[test]
    fn collisions_keep_the_first_entry() {
        let mut cache = RnCache::new();
        cache.add(RnOrigin::Relmap, 1259, 0, "pg_class_from_relmap");
        cache.add(RnOrigin::PgClass, 1259, 1259, "pg_class_from_pgclass");
        assert_eq!(cache.get_by_oid(1259), Some("pg_class_from_relmap"));
    }

    #[test]
    fn delete_tombstones_and_add_reuses_slot() {
        let mut cache = RnCache::new();
        cache.add(RnOrigin::PgClass, 1, 1, "a");
        cache.add(RnOrigin::PgClass, 2, 2, "b");
        cache.delete(1);
        assert_eq!(cache.get_by_oid(1), None);
        cache.add(RnOrigin::PgClass, 3, 3, "c");
        assert_eq!(cache.get_by_oid(3), Some("c"));
        assert_eq!(cache.entries.len(), 2, "tombstoned slot should be reused, not grown");
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache = RnCache::new();
        cache.add(RnOrigin::PgClass, 1, 1, "a");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_by_oid(1), None);
    }
}
