//! Everything that talks to the outside world: finding helper tools on
//! `$PATH`, spawning them, and parsing `lsof`'s machine-readable output.
//! Grounded on `which.c`, `ps.c` and `lsof.c` in the original source.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use crate::pfd::FdKind;
use crate::trace_parser::TracerFlavor;

/// Walks `$PATH` looking for an executable, regular file named `prog`,
/// mirroring OpenBSD's `which(1)` as carried in `which.c`. Rust's
/// `std::env::split_paths` replaces the original's hand-rolled `strsep`
/// loop; the executability check is POSIX-only (`nix`'s `access`).
pub fn which(prog: &str) -> Option<Utf8PathBuf> {
    if prog.contains('/') {
        return is_executable_file(Utf8Path::new(prog)).then(|| Utf8PathBuf::from(prog));
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let dir = Utf8PathBuf::from_path_buf(dir).ok()?;
        let candidate = dir.join(prog);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(path: &Utf8Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
        && access(path.as_std_path(), AccessFlags::X_OK).is_ok()
}

/// Which tool provides the syscall trace, and how its output should be
/// read. Grounded on `trace_resolve_path()`.
pub struct TraceTool {
    pub path: Utf8PathBuf,
    pub flavor: TracerFlavor,
}

pub fn resolve_trace_tool() -> Option<TraceTool> {
    if let Some(path) = which("strace") {
        return Some(TraceTool {
            path,
            flavor: TracerFlavor::Strace,
        });
    }
    which("dtruss").map(|path| TraceTool {
        path,
        flavor: TracerFlavor::Dtruss,
    })
}

/// Spawns the resolved tracer attached to `pid`, returning the child with
/// its stderr piped back (both `strace` and `dtruss` write the trace to
/// stderr, per `trace_spawn_strace`/`trace_spawn_dtruss`).
pub fn spawn_tracer(tool: &TraceTool, pid: u32) -> std::io::Result<Child> {
    let mut cmd = match tool.flavor {
        TracerFlavor::Strace => {
            let mut c = Command::new(tool.path.as_std_path());
            c.args(["-q", "-s", "8", "-p"]).arg(pid.to_string());
            c
        }
        TracerFlavor::Dtruss => {
            let mut c = Command::new(tool.path.as_std_path());
            c.arg("-p").arg(pid.to_string());
            c
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
}

/// Spawns `lsof -Faftn -p <pid>`, the parser-friendly invocation documented
/// in `lsof(8)`. Grounded on `lsof_open()`.
pub fn spawn_lsof(lsof_path: &Utf8Path, pid: u32) -> std::io::Result<Child> {
    Command::new(lsof_path.as_std_path())
        .args(["-Faftn", "-p"])
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Spawns `ps e <pid>`, used to recover the backend's working directory,
/// grounded on `ps_open()`.
pub fn spawn_ps(ps_path: &Utf8Path, pid: u32) -> std::io::Result<Child> {
    Command::new(ps_path.as_std_path())
        .arg("e")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Scrapes `PWD=` out of the second line (first is the header) of `ps e`'s
/// output. `ps`'s output isn't quote-escaped, so a `PWD` containing spaces
/// is recovered by locating the *next* `KEY=` and backtracking to the space
/// before it — exactly `ps_get_pwd()`'s hack.
pub fn extract_pwd(ps_output: &str) -> Option<String> {
    let record = ps_output.lines().nth(1)?;
    let pwd_at = record.find("PWD=")?;
    let start = pwd_at + "PWD=".len();
    let rest = &record[start..];

    match rest.find('=') {
        None => Some(rest.trim_end().to_owned()),
        Some(next_eq) => {
            let before_next_var = rest[..next_eq].rfind(' ')?;
            Some(rest[..before_next_var].to_owned())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LsofRecord {
    pub fd: Option<i32>,
    pub fd_kind: Option<FdKind>,
    pub filepath: Option<String>,
}

/// Parses `lsof -Faftn`'s field-letter-prefixed output into one record per
/// open file descriptor. Grounded on `lsof_read_lines()`, widened here
/// to tolerate a stream that starts a new record on either the
/// `f` (fd number) tag or the `a` (access mode) tag — some `lsof` builds
/// omit blank access-mode lines for descriptors we don't care about.
pub fn parse_lsof_output(text: &str) -> Vec<LsofRecord> {
    let mut records = Vec::new();
    let mut current: Option<LsofRecord> = None;

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let tag = &line[..1];
        let rest = &line[1..];

        match tag {
            "p" => continue,
            "a" => {
                if rest.is_empty() {
                    // Blank access mode: not an io-relevant fd, drop it.
                    current = None;
                } else {
                    if let Some(rec) = current.take() {
                        records.push(rec);
                    }
                    current = Some(LsofRecord::default());
                }
            }
            "f" => {
                if current.is_none() {
                    current = Some(LsofRecord::default());
                } else if current.as_ref().unwrap().fd.is_some() {
                    // A second 'f' line without an intervening 'a' means a
                    // new record started without an access-mode line.
                    if let Some(rec) = current.take() {
                        records.push(rec);
                    }
                    current = Some(LsofRecord::default());
                }
                if let Some(rec) = current.as_mut() {
                    rec.fd = rest.parse().ok();
                }
            }
            "t" => {
                if let Some(rec) = current.as_mut() {
                    rec.fd_kind = Some(FdKind::from_lsof_type(rest));
                }
            }
            "n" => {
                if let Some(rec) = current.as_mut() {
                    rec.filepath = Some(rest.to_owned());
                }
            }
            _ => continue,
        }
    }

    if let Some(rec) = current {
        records.push(rec);
    }

    records
}

/// Drains `reader` line by line, yielding each to `on_line`. Used for both
/// the `lsof`/`ps` one-shot reads and the long-lived tracer stderr stream.
/// `on_line` returning `Err` stops the loop and propagates immediately.
pub fn for_each_line<R: std::io::Read>(
    reader: R,
    mut on_line: impl FnMut(&str) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut buf = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        let n = buf.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        on_line(line.trim_end_matches(['\n', '\r']))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_f_first_record_boundary() {
        let text = "p1234\nf4\nt REG\nn/data/base/1/2\nf5\ntREG\nn/data/base/1/3\n";
        let records = parse_lsof_output(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filepath.as_deref(), Some("/data/base/1/2"));
        assert_eq!(records[1].filepath.as_deref(), Some("/data/base/1/3"));
    }

    #[test]
    fn parses_a_first_record_boundary_and_skips_blank_access() {
        let text = "p1234\na\nf3\ntCHR\nn/dev/null\na r\nf4\ntREG\nn/data/base/1/2\n";
        let records = parse_lsof_output(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filepath.as_deref(), Some("/data/base/1/2"));
        assert_eq!(records[0].fd_kind, Some(FdKind::Reg));
    }

    #[test]
    fn extract_pwd_when_last_variable() {
        let ps_output = "COMMAND\nCOMMAND PWD=/var/lib/postgresql/9.1/main\n";
        assert_eq!(extract_pwd(ps_output).as_deref(), Some("/var/lib/postgresql/9.1/main"));
    }

    #[test]
    fn extract_pwd_with_spaces_and_trailing_variable() {
        let ps_output = "COMMAND\nCOMMAND PWD=/mnt/My Files/pg LANG=en_US.UTF-8\n";
        assert_eq!(extract_pwd(ps_output).as_deref(), Some("/mnt/My Files/pg"));
    }

    #[test]
    fn extract_pwd_missing_is_none() {
        let ps_output = "COMMAND\nCOMMAND USER=postgres\n";
        assert_eq!(extract_pwd(ps_output), None);
    }
}
