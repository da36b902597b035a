//! Snapshot export: flush the live book and write the handshake file.
//!
//! Runs before the child process starts. The filesystem change watcher is
//! suspended only for the flush itself, never across the plugin's execution
//! window, so the flush is not misread as an external edit while external
//! edits made by the plugin later still are.

use std::path::Path;

use tracing::debug;

use folio_epub::BookStore;

use crate::error::PluginError;
use crate::handshake::Handshake;

/// Tracing target for snapshot operations.
const SNAPSHOT_TARGET: &str = "folio_plugins::snapshot";

/// Flushes unsaved edits to the book root and writes the handshake file
/// into the run's working directory.
///
/// # Errors
///
/// Returns [`PluginError::Store`] when the flush fails and
/// [`PluginError::Snapshot`] when the handshake write fails. The watcher is
/// resumed on every path.
pub fn export(
    store: &mut BookStore,
    handshake: &Handshake,
    working_dir: &Path,
) -> Result<(), PluginError> {
    store.suspend_watching();
    let flushed = store.save_all_to_disk();
    store.resume_watching();
    flushed?;

    handshake
        .write(working_dir)
        .map_err(|err| PluginError::Snapshot {
            path: working_dir.to_path_buf(),
            source: std::sync::Arc::new(err),
        })?;
    debug!(
        target: SNAPSHOT_TARGET,
        working_dir = %working_dir.display(),
        "book flushed and handshake written"
    );
    Ok(())
}
