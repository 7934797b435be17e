//! Wires the external collaborators (`which`, `lsof`, `ps`, the syscall
//! tracer) into a running trace session. Grounded on
//! `main()` in `main.c`.

use std::io::Read;

use anyhow::{bail, Context};

use crate::collaborators::{
    extract_pwd, for_each_line, parse_lsof_output, resolve_trace_tool, spawn_lsof, spawn_ps, spawn_tracer, which,
};
use crate::dispatcher::{dispatch, DispatcherState};
use crate::error::DispatchError;
use crate::pfd::FdKind;
use crate::trace_parser::TracerFlavor;

/// Finds `lsof`, `ps` and a tracer on `$PATH`, failing fast with a message
/// naming the missing tool, exactly as `*_resolve_path()` does upstream.
pub fn resolve_tools() -> anyhow::Result<(camino::Utf8PathBuf, camino::Utf8PathBuf, crate::collaborators::TraceTool)> {
    let ps_path = which("ps").context("ps is not in your PATH (good luck)")?;
    let lsof_path = which("lsof").context("lsof is not in your PATH")?;
    let tool = resolve_trace_tool().context("strace (or dtruss) is not in your PATH")?;
    Ok((ps_path, lsof_path, tool))
}

/// Runs `lsof -Faftn -p <pid>` to completion and seeds `state`'s fd table
/// with everything the backend currently has open, mirroring
/// `pfd_cache_preload_from_lsof()`.
pub fn preload_pfd_cache(lsof_path: &camino::Utf8Path, pid: u32, state: &mut DispatcherState) -> anyhow::Result<()> {
    let mut child = spawn_lsof(lsof_path, pid).context("failed to spawn lsof")?;
    let mut output = String::new();
    child
        .stdout
        .take()
        .context("lsof child has no stdout")?
        .read_to_string(&mut output)
        .context("failed to read lsof output")?;
    child.wait().context("lsof exited abnormally")?;

    for record in parse_lsof_output(&output) {
        let Some(fd) = record.fd else { continue };
        let fd_kind = record.fd_kind.unwrap_or(FdKind::Unknown);
        state
            .pfd_cache
            .preload(fd, record.filepath.as_deref(), fd_kind, &mut state.cluster_ctx)?;
    }
    Ok(())
}

/// Runs `ps e <pid>` once and extracts the backend's working directory,
/// grounded on `ps_get_pwd()`. Cached for the process's lifetime by the
/// caller.
pub fn discover_pwd(ps_path: &camino::Utf8Path, pid: u32) -> anyhow::Result<Option<String>> {
    let mut child = spawn_ps(ps_path, pid).context("failed to spawn ps")?;
    let mut output = String::new();
    child
        .stdout
        .take()
        .context("ps child has no stdout")?
        .read_to_string(&mut output)
        .context("failed to read ps output")?;
    child.wait().context("ps exited abnormally")?;
    Ok(extract_pwd(&output))
}

/// Spawns the tracer against `pid` and streams its stderr through the
/// dispatcher until it exits, printing the annotated trace, mirroring
/// `trace_read_lines()`. A line that fails to parse is logged and
/// skipped; a corrupt relmap or pg_class page aborts the session, since
/// that reflects cluster state the dispatcher can no longer trust.
pub fn run_trace(
    tool: &crate::collaborators::TraceTool,
    pid: u32,
    state: &mut DispatcherState,
) -> anyhow::Result<()> {
    let mut child = spawn_tracer(tool, pid).context("failed to spawn tracer")?;
    let stderr = child.stderr.take().context("tracer child has no stderr")?;

    for_each_line(stderr, |line| {
        if crate::signal::requested() {
            eprintln!("Interrupted");
            let _ = child.kill();
            std::process::exit(1);
        }
        if line.is_empty() {
            return Ok(());
        }
        match dispatch(line, tool.flavor, state) {
            Ok(annotated) => println!("{annotated}"),
            Err(DispatchError::Parse(err)) => {
                tracing::warn!(line, error = %err, "failed to parse trace line");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    })
    .context("failed reading tracer output")?;

    let status = child.wait().context("tracer exited abnormally")?;
    if !status.success() {
        bail!("tracer exited with {status}");
    }
    Ok(())
}

/// Reads a trace already being piped into our stdin (no pid, no helper
/// tools needed), as `main()` does when `!isatty(STDIN_FILENO)`.
pub fn run_trace_from_stdin(flavor: TracerFlavor, state: &mut DispatcherState) -> anyhow::Result<()> {
    for_each_line(std::io::stdin(), |line| {
        if crate::signal::requested() {
            eprintln!("Interrupted");
            std::process::exit(1);
        }
        if line.is_empty() {
            return Ok(());
        }
        match dispatch(line, flavor, state) {
            Ok(annotated) => println!("{annotated}"),
            Err(DispatchError::Parse(err)) => {
                tracing::warn!(line, error = %err, "failed to parse trace line");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    })
    .context("failed reading stdin")
}
