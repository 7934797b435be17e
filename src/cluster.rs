//! Process-wide discovery state: the cluster data directory and the single
//! database OID this backend is assumed to access.
//!
//! Kept as an explicit context object threaded through the resolver rather
//! than a true global.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ClusterError;

#[derive(Debug, Default)]
pub struct ClusterContext {
    cluster_path: Option<Utf8PathBuf>,
    database_oid: Option<u32>,
}

impl ClusterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_path(&self) -> Option<&Utf8Path> {
        self.cluster_path.as_deref()
    }

    pub fn database_oid(&self) -> Option<u32> {
        self.database_oid
    }

    pub fn is_discovered(&self) -> bool {
        self.cluster_path.is_some() && self.database_oid.is_some()
    }

    /// Record a SharedGlobal observation: sets `cluster_path` if unset, never
    /// touches `database_oid`.
    pub fn observe_shared(&mut self, cluster_path: &Utf8Path) {
        if self.cluster_path.is_none() {
            self.cluster_path = Some(cluster_path.to_owned());
        }
    }

    /// Record a LocalBase observation. Fails fatally if a different database
    /// OID was already locked in.
    pub fn observe_local(&mut self, cluster_path: &Utf8Path, db_oid: u32) -> Result<(), ClusterError> {
        if self.cluster_path.is_none() {
            self.cluster_path = Some(cluster_path.to_owned());
        }
        match self.database_oid {
            None => {
                self.database_oid = Some(db_oid);
                Ok(())
            }
            Some(existing) if existing == db_oid => Ok(()),
            Some(existing) => Err(ClusterError::BackendSwitchedDatabase {
                previous: existing,
                observed: db_oid,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_then_local_sets_both_fields() {
        let mut ctx = ClusterContext::new();
        ctx.observe_shared(Utf8Path::new("/var/lib/pg/main"));
        assert_eq!(ctx.database_oid(), None);
        ctx.observe_local(Utf8Path::new("/var/lib/pg/main"), 16386).unwrap();
        assert_eq!(ctx.cluster_path(), Some(Utf8Path::new("/var/lib/pg/main")));
        assert_eq!(ctx.database_oid(), Some(16386));
    }

    #[test]
    fn conflicting_local_oid_is_fatal() {
        let mut ctx = ClusterContext::new();
        ctx.observe_local(Utf8Path::new("/data"), 16386).unwrap();
        let err = ctx.observe_local(Utf8Path::new("/data"), 20000).unwrap_err();
        assert_eq!(
            err,
            ClusterError::BackendSwitchedDatabase {
                previous: 16386,
                observed: 20000
            }
        );
    }

    #[test]
    fn repeated_same_oid_is_fine() {
        let mut ctx = ClusterContext::new();
        ctx.observe_local(Utf8Path::new("/data"), 16386).unwrap();
        ctx.observe_local(Utf8Path::new("/data"), 16386).unwrap();
        assert_eq!(ctx.database_oid(), Some(16386));
    }
}
