// ============================================================
// Layer 6 — Interrupt Flag
// ============================================================
// Ctrl-C sets a shared flag. Nothing is cancelled directly:
// the data providers check the flag before producing each
// batch and answer Fetch::Interrupted, so the orchestrator
// always stops on a step boundary and can checkpoint.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};

/// Install the process-wide Ctrl-C handler and return its flag.
/// ctrlc allows a single handler per process, so call this once.
pub fn install_ctrlc_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, finishing current step...");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;
    Ok(flag)
}
