//! Routes each parsed trace line to a per-syscall handler that prints the
//! annotated form, falling back to echoing the line verbatim for anything
//! we don't special-case. Ported in spirit from
//! `process_func()` and its helpers in `main.c`.

use camino::Utf8PathBuf;

use crate::cluster::ClusterContext;
use crate::error::{DispatchError, LineParseError};
use crate::pfd_cache::PfdCache;
use crate::pg_class::{load_rn_cache_from_pg_class, pg_class_filepath};
use crate::relmap::RelmapDecoder;
use crate::rn_cache::RnCache;
use crate::trace_parser::{parse_line, TracerFlavor};

/// Everything the dispatcher threads through calls: the fd table, the
/// relation-name resolver chain, and the backend's working directory for
/// resolving relative paths seen in `open()` calls.
pub struct DispatcherState {
    pub pfd_cache: PfdCache,
    pub relmap: RelmapDecoder,
    pub rn_cache: RnCache,
    pub cluster_ctx: ClusterContext,
    pub pwd: Option<String>,
    rn_cache_loaded: bool,
}

impl DispatcherState {
    pub fn new(pwd: Option<String>) -> Self {
        Self {
            pfd_cache: PfdCache::new(),
            relmap: RelmapDecoder::new(),
            rn_cache: RnCache::new(),
            cluster_ctx: ClusterContext::new(),
            pwd,
            rn_cache_loaded: false,
        }
    }

    /// Performs the one-time bulk load of `pg_class` into the RN cache, the
    /// moment the cluster path and database oid first become known
    /// (`pfd_update_from_pg()`'s `rn_cache_initial_load` gate). A corrupt
    /// relmap or pg_class page is fatal: continuing with an empty cache
    /// would silently mis-attribute every relation file from then on.
    fn ensure_rn_cache_loaded(&mut self) -> Result<(), DispatchError> {
        if self.rn_cache_loaded || !self.cluster_ctx.is_discovered() {
            return Ok(());
        }
        self.rn_cache_loaded = true;

        self.relmap.load(
            self.cluster_ctx.cluster_path().unwrap(),
            self.cluster_ctx.database_oid(),
            false,
        )?;
        let path = pg_class_filepath(&self.cluster_ctx, &self.relmap)?;
        load_rn_cache_from_pg_class(&path, &mut self.rn_cache)?;
        Ok(())
    }

    fn human_fd(&mut self, fd: i32) -> Result<String, DispatchError> {
        self.ensure_rn_cache_loaded()?;
        let mut pfd = self.pfd_cache.get(fd);
        pfd.resolve(&mut self.relmap, &self.rn_cache, &self.cluster_ctx)?;
        let repr = pfd.repr();
        self.pfd_cache.update(pfd);
        Ok(repr)
    }

    /// Records that `fd` is now open at `path`, classifies it, and — if it
    /// turned out to name a PostgreSQL relation file — resolves and caches
    /// its relname right away rather than waiting for the next read/write
    /// mirroring `pfd_cache_add` immediately chaining into resolution.
    pub fn open_fd(&mut self, fd: i32, path: &str, fd_kind: crate::pfd::FdKind) -> Result<(), DispatchError> {
        let is_pg_file = self.pfd_cache.on_open(fd, path, fd_kind, &mut self.cluster_ctx)?;
        if is_pg_file {
            self.ensure_rn_cache_loaded()?;
            let mut pfd = self.pfd_cache.get(fd);
            pfd.resolve(&mut self.relmap, &self.rn_cache, &self.cluster_ctx)?;
            self.pfd_cache.update(pfd);
        }
        Ok(())
    }

    /// Resolves `path` to an absolute path using the backend's pwd, exactly
    /// as `resolve_path()` does for relative `open()` targets.
    fn resolve_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            return path.to_owned();
        }
        match &self.pwd {
            Some(pwd) => Utf8PathBuf::from(pwd).join(path).into_string(),
            None => path.to_owned(),
        }
    }
}

/// Parses and dispatches one raw trace line, returning the text that should
/// be printed to the user. A `DispatchError::Parse` is the caller's
/// concern to log and skip; every other variant reflects cluster state the
/// dispatcher can no longer trust and is fatal to the process.
pub fn dispatch(raw_line: &str, flavor: TracerFlavor, state: &mut DispatcherState) -> Result<String, DispatchError> {
    let call = parse_line(raw_line, flavor)?;

    let out = match call.func_name.as_str() {
        "read" | "write" => dispatch_fd_func(&call.func_name, &call.args, state)?,
        "open" => dispatch_open(&call.args, call.result.as_deref(), state)?,
        "close" => dispatch_close(&call.args, state)?,
        "lseek" => dispatch_seek(&call.args, state)?,
        _ => raw_line.to_owned(),
    };

    Ok(out)
}

fn dispatch_fd_func(func_name: &str, args: &[String], state: &mut DispatcherState) -> Result<String, DispatchError> {
    let Some(fd) = args.first().and_then(|a| a.parse::<i32>().ok()) else {
        return Ok(format!("{func_name}(<unparsable fd>)"));
    };
    let size = args.get(2).map(String::as_str).unwrap_or("?");
    let human_fd = state.human_fd(fd)?;
    Ok(format!("{func_name}({human_fd}, {size})"))
}

fn dispatch_seek(args: &[String], state: &mut DispatcherState) -> Result<String, DispatchError> {
    let (Some(fd), Some(offset), Some(whence)) = (
        args.first().and_then(|a| a.parse::<i32>().ok()),
        args.get(1),
        args.get(2),
    ) else {
        return Ok("lseek(<malformed args>)".to_owned());
    };
    let human_fd = state.human_fd(fd)?;
    Ok(format!("lseek({human_fd}, {offset}, {whence})"))
}

fn dispatch_open(args: &[String], result: Option<&str>, state: &mut DispatcherState) -> Result<String, DispatchError> {
    if args.len() != 2 && args.len() != 3 {
        return Ok(format!("open(<{} args>)", args.len()));
    }
    let path = state.resolve_path(&args[0]);
    if let Some(result) = result {
        if let Ok(fd) = result.parse::<i32>() {
            state.open_fd(fd, &path, crate::pfd::FdKind::Reg)?;
        }
    }
    let result = result.unwrap_or("?");
    Ok(format!("open({path}, ...) -> fd:{result}"))
}

fn dispatch_close(args: &[String], state: &mut DispatcherState) -> Result<String, DispatchError> {
    let Some(fd) = args.first().and_then(|a| a.parse::<i32>().ok()) else {
        return Ok("close(<unparsable fd>)".to_owned());
    };
    let human_fd = state.human_fd(fd)?;
    state.pfd_cache.on_close(fd);
    Ok(format!("close({human_fd})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhandled_function_echoes_line_verbatim() {
        let mut state = DispatcherState::new(None);
        let out = dispatch("fstat(3, {...}) = 0", TracerFlavor::Strace, &mut state).unwrap();
        assert_eq!(out, "fstat(3, {...}) = 0");
    }

    #[test]
    fn open_then_read_annotates_with_filepath() {
        let mut state = DispatcherState::new(Some("/var/lib/postgresql".to_owned()));
        let out = dispatch(
            r#"open("relative/path/16386/12345", O_RDWR) = 7"#,
            TracerFlavor::Strace,
            &mut state,
        )
        .unwrap();
        assert!(out.starts_with("open("));
        assert!(out.contains("fd:7"));

        let out = dispatch("read(7, \"...\", 8192) = 8192", TracerFlavor::Strace, &mut state).unwrap();
        assert!(out.contains("filepath="));
    }

    #[test]
    fn close_annotates_and_evicts() {
        let mut state = DispatcherState::new(None);
        dispatch(r#"open("/tmp/x", O_RDWR) = 9"#, TracerFlavor::Strace, &mut state).unwrap();
        let out = dispatch("close(9) = 0", TracerFlavor::Strace, &mut state).unwrap();
        assert_eq!(out, "close(filepath=/tmp/x)");
        let out = dispatch("close(9) = 0", TracerFlavor::Strace, &mut state).unwrap();
        assert_eq!(out, "close(fd=9)");
    }

    #[test]
    fn malformed_parse_is_reported_not_panicked() {
        let mut state = DispatcherState::new(None);
        let err = dispatch("not a call", TracerFlavor::Strace, &mut state).unwrap_err();
        assert!(matches!(err, DispatchError::Parse(LineParseError::NotAFunctionCall(_))));
    }
}
