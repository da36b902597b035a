//! Plugin execution and change-application core for Folio.
//!
//! A plugin is an untrusted external process launched against an on-disk
//! snapshot of the open book. It reports requested file-level changes and
//! diagnostics through a line-oriented XML result document on its standard
//! output, and those changes are validated and applied back into the live
//! [`folio_epub::BookStore`] under strict consistency rules: a change set is
//! either fully and safely absorbed or the book is left exactly as it was.
//!
//! # Architecture
//!
//! Data flows one direction per run:
//!
//! 1. the snapshot exporter flushes unsaved edits and writes the handshake
//!    file the plugin reads at start ([`snapshot`], [`handshake`]);
//! 2. the launcher resolves an interpreter and starts the child process
//!    ([`launcher`], [`process`]);
//! 3. the result protocol parser decodes the child's output into an
//!    [`Outcome`], change records, and diagnostics ([`protocol`]);
//! 4. the well-formedness gatekeeper vets every candidate markup document
//!    ([`gatekeeper`]);
//! 5. the change applier mutates the store with ordering and
//!    protected-resource invariants enforced ([`applier`]);
//!
//! with the lifecycle controller ([`runner`]) supervising all stages and
//! able to abort at any point before the applier commits.

pub mod applier;
pub mod descriptor;
pub mod error;
pub mod gatekeeper;
pub mod handshake;
pub mod interact;
pub mod launcher;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod snapshot;
pub mod views;

#[cfg(test)]
mod tests;

pub use self::applier::{Applier, ApplyOutcome};
pub use self::descriptor::{PluginDescriptor, PluginKind};
pub use self::error::PluginError;
pub use self::interact::{DeclineAll, Interaction};
pub use self::process::ProcessEvent;
pub use self::protocol::{ChangeRecord, Outcome, PluginReport, Severity, ValidationDiagnostic};
pub use self::registry::PluginRegistry;
pub use self::runner::{
    PluginExecutor, PluginRunner, ProcessExecutor, RunReport, RunState, RunningPlugin,
};
pub use self::settings::Settings;
pub use self::views::{NoViews, ViewManager};
