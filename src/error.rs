//! Domain error types for the components that must fail loudly: a silently
//! mis-attributed relation is worse than stopping.

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelmapError {
    #[error("could not open relation mapping file \"{path}\"")]
    Missing {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read relation mapping file \"{path}\": got {got} of {expected} bytes")]
    Truncated {
        path: Utf8PathBuf,
        got: usize,
        expected: usize,
    },
    #[error("relation mapping file \"{path}\" contains invalid data: bad magic {found:#010x}, expected {expected:#010x}")]
    BadMagic {
        path: Utf8PathBuf,
        found: i32,
        expected: i32,
    },
    #[error("relation mapping file \"{path}\" contains invalid data: mapping count {count} out of range")]
    InvalidCount { path: Utf8PathBuf, count: i32 },
    #[error("relation mapping file \"{path}\" contains incorrect checksum (computed {computed:#010x}, stored {stored:#010x})")]
    BadCrc {
        path: Utf8PathBuf,
        computed: u32,
        stored: u32,
    },
}

#[derive(Debug, Error)]
pub enum PgClassError {
    #[error("could not open pg_class file \"{path}\"")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pg_class file \"{path}\" truncated at page offset {offset}")]
    PageTruncated { path: Utf8PathBuf, offset: u64 },
    #[error("no cluster has been discovered yet")]
    NoClusterYet,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error(
        "backend switched from database {previous} to database {observed}; \
         pg_trace follows a single backend against a single database"
    )]
    BackendSwitchedDatabase { previous: u32, observed: u32 },
}

/// Errors that abort parsing of a single trace line; the event dispatcher
/// reports these and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineParseError {
    #[error("not a function call: {0:?}")]
    NotAFunctionCall(String),
    #[error("too many arguments (max {0})")]
    TooManyArgs(usize),
    #[error("unterminated quoted argument")]
    UnterminatedQuote,
}

/// Everything dispatching a single trace line can fail with. `Parse` is
/// recoverable: the event dispatcher logs it and moves to the next line.
/// Every other variant reflects on-disk corruption or a cluster-discovery
/// invariant violation, and is fatal to the process — a silently
/// mis-attributed relation is worse than stopping.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] LineParseError),
    #[error(transparent)]
    Relmap(#[from] RelmapError),
    #[error(transparent)]
    PgClass(#[from] PgClassError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
