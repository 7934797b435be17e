//! `pg_trace`: attaches a syscall tracer to a running PostgreSQL backend and
//! annotates its file descriptor traffic with relation names instead of
//! raw fd numbers. Ported in spirit from `main.c`.

mod bootstrap;
mod cli;
mod cluster;
mod collaborators;
mod crc32;
mod dispatcher;
mod error;
mod path_classifier;
mod pfd;
mod pfd_cache;
mod pg_class;
mod relmap;
mod rn_cache;
mod signal;
mod trace_parser;

use std::io::IsTerminal;

use anyhow::bail;
use clap::Parser;
use nix::unistd::Uid;

use cli::PgTraceArgs;
use dispatcher::DispatcherState;
use trace_parser::TracerFlavor;

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = PgTraceArgs::parse();
    init_tracing(args.debug);
    signal::install()?;

    if std::io::stdin().is_terminal() {
        run_attached(&args)
    } else {
        run_piped()
    }
}

fn run_attached(args: &PgTraceArgs) -> anyhow::Result<()> {
    if !Uid::effective().is_root() {
        bail!("you need to be root");
    }

    let Some(pid) = args.pid else {
        bail!("usage: pg_trace [-h] [-d] [-p pid]");
    };
    let pid = pid as u32;

    let (ps_path, lsof_path, tool) = bootstrap::resolve_tools()?;

    let mut state = DispatcherState::new(None);
    bootstrap::preload_pfd_cache(&lsof_path, pid, &mut state)?;
    state.pwd = bootstrap::discover_pwd(&ps_path, pid)?;

    bootstrap::run_trace(&tool, pid, &mut state)
}

fn run_piped() -> anyhow::Result<()> {
    let mut state = DispatcherState::new(None);
    bootstrap::run_trace_from_stdin(TracerFlavor::Strace, &mut state)
}
