//! SIGINT handling, grounded on `sigint_handler()`. The handler itself
//! only flips an atomic flag — `signal_hook::flag::register` already does
//! exactly that — and regular code checks it between blocking reads. No
//! work happens inside the signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

static INTERRUPTED: OnceCell<Arc<AtomicBool>> = OnceCell::new();

pub fn install() -> std::io::Result<()> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    let _ = INTERRUPTED.set(flag);
    Ok(())
}

pub fn requested() -> bool {
    INTERRUPTED.get().map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
}
