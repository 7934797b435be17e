//! A single kernel file descriptor's resolved identity: what kind of thing
//! it is, whether it names a PostgreSQL relation, and (once resolved) that
//! relation's name. Reconstructed from `pfd.c`/`pfd.h`
//! in the original source, with `FdKind`/`FileType` widened to the variants
//! this tool names (`Ipv4`/`Ipv6`/`Xlog`, not present upstream).

use camino::Utf8PathBuf;

use crate::cluster::ClusterContext;
use crate::error::{ClusterError, RelmapError};
use crate::path_classifier::{classify, FileSubtype, PathClass};
use crate::relmap::RelmapDecoder;
use crate::rn_cache::RnCache;

/// Mirrors `lsof -Faftn`'s `t` (type) field, widened with `Invalid` for a
/// tombstoned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Char,
    Reg,
    Dir,
    Fifo,
    Ipv4,
    Ipv6,
    Unknown,
    Invalid,
}

impl FdKind {
    /// Maps an `lsof` type-string to `FdKind`; anything unrecognised is
    /// `Unknown`, never an error: soft-tolerated.
    pub fn from_lsof_type(s: &str) -> FdKind {
        match s {
            "CHR" => FdKind::Char,
            "REG" => FdKind::Reg,
            "DIR" => FdKind::Dir,
            "FIFO" => FdKind::Fifo,
            "IPv4" => FdKind::Ipv4,
            "IPv6" => FdKind::Ipv6,
            _ => FdKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Table,
    VM,
    FSM,
    Xlog,
    Unknown,
}

fn subtype_to_file_type(subtype: FileSubtype) -> FileType {
    match subtype {
        FileSubtype::Table => FileType::Table,
        FileSubtype::VM => FileType::VM,
        FileSubtype::FSM => FileType::FSM,
        FileSubtype::Unknown => FileType::Unknown,
    }
}

#[derive(Debug, Clone)]
pub struct Pfd {
    pub fd: i32,
    pub fd_kind: FdKind,
    pub shared: bool,
    pub file_type: FileType,
    pub filepath: Option<Utf8PathBuf>,
    pub filenode: u32,
    pub relname: Option<String>,
}

impl Pfd {
    pub fn new(fd: i32, fd_kind: FdKind) -> Self {
        Self {
            fd,
            fd_kind,
            shared: false,
            file_type: FileType::Unknown,
            filepath: None,
            filenode: 0,
            relname: None,
        }
    }

    /// A cache miss on `get(fd)` creates this: no classification has ever
    /// happened for it, so callers display `fd=<n>`.
    pub fn placeholder(fd: i32) -> Self {
        Self::new(fd, FdKind::Unknown)
    }

    /// Classifies `path` against cluster conventions and updates `self`
    /// in place. Returns `Ok(true)` if the path resolved to a PostgreSQL
    /// relation file (i.e. RN-cache bootstrap may now be warranted).
    pub fn classify_path(&mut self, path: &str, ctx: &mut ClusterContext) -> Result<bool, ClusterError> {
        self.filepath = Some(Utf8PathBuf::from(path));
        match classify(path, ctx)? {
            PathClass::NotPg => {
                self.filenode = 0;
                Ok(false)
            }
            PathClass::SharedGlobal { filenode, subtype, .. } => {
                self.shared = true;
                self.filenode = filenode;
                self.file_type = subtype_to_file_type(subtype);
                Ok(true)
            }
            PathClass::LocalBase { filenode, subtype, .. } => {
                self.shared = false;
                self.filenode = filenode;
                self.file_type = subtype_to_file_type(subtype);
                Ok(true)
            }
        }
    }

    /// Resolves `relname` from the filenode via the relmap and RN cache
    /// mirroring `pfd.resolve()`. A no-op if already resolved or if
    /// there is no filenode to resolve from. A corrupt or missing relmap
    /// file is reported rather than silently falling back to the
    /// filenode-keyed lookup — the relmap is load-bearing for every
    /// catalog-table relname, so a read failure here means the cluster
    /// state can no longer be trusted.
    pub fn resolve(
        &mut self,
        relmap: &mut RelmapDecoder,
        rn_cache: &RnCache,
        ctx: &ClusterContext,
    ) -> Result<(), RelmapError> {
        if self.relname.is_some() || self.filenode == 0 {
            return Ok(());
        }

        if let Some(cluster_path) = ctx.cluster_path() {
            relmap.load(cluster_path, ctx.database_oid(), self.shared)?;
            let oid = relmap.filenode_to_oid(self.filenode, self.shared);
            if let Some(name) = rn_cache.get_by_oid(oid) {
                self.relname = Some(name.to_owned());
                return Ok(());
            }
        }

        if let Some(name) = rn_cache.get_by_filenode(self.filenode) {
            self.relname = Some(name.to_owned());
        }
        Ok(())
    }

    /// Human representation used in the annotated trace output.
    pub fn repr(&self) -> String {
        if let Some(name) = &self.relname {
            let suffix = match self.file_type {
                FileType::VM => "(vm)",
                FileType::FSM => "(fsm)",
                FileType::Unknown => "(?!?)",
                FileType::Table | FileType::Xlog => "",
            };
            format!("relname={name}{suffix}")
        } else if let Some(path) = &self.filepath {
            format!("filepath={path}")
        } else {
            format!("fd={}", self.fd)
        }
    }

    pub fn invalidate(&mut self) {
        self.fd_kind = FdKind::Invalid;
        self.relname = None;
        self.filepath = None;
    }
}
