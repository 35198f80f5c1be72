// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system state that outlives a single process:
//
//   ledger.rs     — Experiment ledger
//                   One JSON file mapping every experiment
//                   identity to the epoch it should resume at.
//
//   checkpoint.rs — Checkpoint directories
//                   Latest and best checkpoints per experiment,
//                   indexed by checkpoint.json and pruned to a
//                   fixed history length.
//
//   metrics.rs    — Summaries
//                   Scalar/distribution events (events.csv) and
//                   one row per finished epoch (epochs.csv).
//
//   interrupt.rs  — Ctrl-C flag shared with the data providers
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

use std::{fs, path::Path};

use anyhow::{Context, Result};

/// Experiment identity → resume epoch
pub mod ledger;

/// Checkpoint saving, indexing and pruning
pub mod checkpoint;

/// Event and epoch CSV logs
pub mod metrics;

/// Ctrl-C handling
pub mod interrupt;

/// Replace `path` with `contents` in one rename.
///
/// Readers see either the old file or the new one, never a
/// partially written mix. The temp file sits next to the target
/// so the rename stays on one file system.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }

    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("'{}' has no file name", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, contents)
        .with_context(|| format!("Cannot write '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot move '{}' into place", path.display()))?;
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Cannot remove '{}'", dir.display())),
    }
}
