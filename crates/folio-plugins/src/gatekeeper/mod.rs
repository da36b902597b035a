//! Pre-application well-formedness gate.
//!
//! Before any reported change touches the book, every added or modified
//! XHTML document is parsed in the run's working directory. Failures are
//! collected and put to the [`Interaction`] collaborator as a single
//! decision; declining leaves the book untouched.
//!
//! Auxiliary XML (package documents, NCX, page maps, SMIL overlays) is not
//! gated. It is normalised in place instead, so mildly broken output from
//! a plugin still round-trips through the store.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use folio_epub::{mediatype, repair, wellformed};

use crate::error::PluginError;
use crate::interact::Interaction;
use crate::protocol::{ChangeRecord, PluginReport};

/// Tracing target for the gate.
const GATE_TARGET: &str = "folio_plugins::gatekeeper";

/// Checks a report's output files, returning whether application may
/// proceed.
///
/// Returns `Ok(false)` when malformed XHTML was found and the interaction
/// declined to continue anyway.
///
/// # Errors
///
/// Returns [`PluginError::Io`] only for failures unrelated to the checked
/// documents themselves; an unreadable XHTML file counts as a gate failure,
/// not an error.
pub fn inspect(
    report: &PluginReport,
    working_dir: &Path,
    interaction: &dyn Interaction,
) -> Result<bool, PluginError> {
    let mut errors = Vec::new();
    for record in report.added.iter().chain(report.modified.iter()) {
        if record.media_type == mediatype::XHTML {
            if let Some(error) = check_content_document(record, working_dir) {
                errors.push(error);
            }
        } else if mediatype::is_auxiliary_xml(&record.media_type) {
            normalise_auxiliary(record, working_dir);
        }
    }

    if errors.is_empty() {
        return Ok(true);
    }
    warn!(
        target: GATE_TARGET,
        failures = errors.len(),
        "malformed documents in plugin output"
    );
    Ok(interaction.allow_malformed(&errors))
}

fn check_content_document(record: &ChangeRecord, working_dir: &Path) -> Option<String> {
    let path = working_dir.join(&record.href);
    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            return Some(format!("Incorrect XHTML: {} unreadable: {err}", record.href));
        }
    };
    wellformed::check(&source).map(|error| {
        format!(
            "Incorrect XHTML: {} Line/Col {},{} {}",
            record.href, error.line, error.column, error.message
        )
    })
}

fn normalise_auxiliary(record: &ChangeRecord, working_dir: &Path) {
    let path = working_dir.join(&record.href);
    // An unreadable auxiliary file is the applier's problem, not the gate's.
    let Ok(source) = fs::read_to_string(&path) else {
        warn!(target: GATE_TARGET, href = record.href.as_str(), "auxiliary file unreadable, skipped");
        return;
    };
    let repaired = repair::repair_xml(&source, &record.media_type);
    if repaired == source {
        return;
    }
    match fs::write(&path, &repaired) {
        Ok(()) => {
            debug!(target: GATE_TARGET, href = record.href.as_str(), "auxiliary XML normalised");
        }
        Err(err) => {
            warn!(
                target: GATE_TARGET,
                href = record.href.as_str(),
                error = %err,
                "could not write normalised auxiliary XML"
            );
        }
    }
}
