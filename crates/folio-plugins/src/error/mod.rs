//! Domain errors raised by plugin runs.
//!
//! All errors use `thiserror`-derived enums with structured context so the
//! lifecycle controller can map a failure onto its terminal state. I/O
//! sources are wrapped in `Arc` to keep error values small and cloneable.
//!
//! Crash exits, cancellations, and a declined well-formedness override are
//! not errors: they are [`crate::Outcome`] values, because the run completed
//! and its result simply was not success.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from plugin execution and change application.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The requested plugin was not found in the registry.
    #[error("plugin '{name}' not found in registry")]
    NotFound {
        /// Name that was looked up.
        name: String,
    },

    /// None of the plugin's declared engines resolve to an interpreter.
    #[error("no interpreter path registered for engine list '{engines}'")]
    MissingInterpreter {
        /// The declared engine list, comma-joined.
        engines: String,
    },

    /// The fixed per-platform launcher script does not exist on disk.
    #[error("plugin launcher '{path}' does not exist")]
    MissingLauncher {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The plugin declares an engine family this host does not support.
    #[error("plugin engine '{engines}' is not supported")]
    UnsupportedEngine {
        /// The declared engine list, comma-joined.
        engines: String,
    },

    /// The child process could not be spawned at all.
    #[error("plugin failed to start: {message}")]
    StartFailure {
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The result protocol document was structurally invalid.
    #[error("error parsing result XML: {message}")]
    ProtocolParse {
        /// Parser message describing the failure.
        message: String,
    },

    /// Committing the change set would remove the final content document.
    #[error("change set would remove the last content document")]
    LastDocumentGuard,

    /// A registry entry failed validation or could not be loaded.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the failure.
        message: String,
    },

    /// The snapshot export or handshake write failed.
    #[error("snapshot export failed for '{path}': {source}")]
    Snapshot {
        /// Path the export targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A store operation failed while preparing or applying a run.
    #[error(transparent)]
    Store(#[from] folio_epub::StoreError),

    /// An I/O error occurred while communicating with the child process.
    #[error("I/O error communicating with plugin process: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl PluginError {
    /// Wraps an I/O error from the process channel.
    #[must_use]
    pub fn io(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }

    /// Builds a start failure from a spawn error.
    #[must_use]
    pub fn start_failure(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::StartFailure {
            message: message.into(),
            source: source.map(Arc::new),
        }
    }
}
