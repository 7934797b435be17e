//! Command-line surface: no config files, every knob is a flag.
//! Mirrors `main.c`'s `getopt(argc, argv, "hp:d")` one for one.

use clap::Parser;

/// Annotates a PostgreSQL backend's traced syscalls with relation names.
#[derive(Parser, Debug)]
#[command(name = "pg_trace", about, version)]
pub struct PgTraceArgs {
    /// PID of the PostgreSQL backend to attach to. Required unless a trace
    /// is being piped in on stdin.
    #[clap(short = 'p', long = "pid")]
    pub pid: Option<i32>,

    /// Enable debug logging of resolver internals.
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,
}
