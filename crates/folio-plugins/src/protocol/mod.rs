//! The line-oriented XML result protocol written by a plugin.
//!
//! A plugin reports its outcome as one XML document embedded anywhere in
//! its standard output. Because plugins routinely print diagnostics before
//! the structured result, the parser discards everything before the last
//! occurrence of the XML declaration and parses from there,
//! namespace-unaware.
//!
//! Element and attribute names are fixed wire constants: `result`, `msg`,
//! `deleted`, `added`, `modified`, `validationresult`, with attributes
//! `href`, `id`, `media-type`, `type`, `linenumber`, `charoffset`,
//! `bookpath`, `message`.
//!
//! A structurally invalid document discards the entire report: nothing
//! gathered before the failure point is ever applied.

use std::collections::BTreeSet;

use percent_encoding::percent_decode_str;
use roxmltree::{Document, Node};
use tracing::debug;

use folio_epub::mediatype;

use crate::error::PluginError;

/// Tracing target for protocol parsing.
const PROTOCOL_TARGET: &str = "folio_plugins::protocol";

/// Authoritative result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The plugin completed and its changes may be applied.
    Success,
    /// The plugin reported failure, or its report could not be used.
    Failed,
    /// The child process terminated abnormally.
    Crashed,
    /// The run was cancelled by the user.
    Cancelled,
    /// The run could not be started or supervised.
    Error,
}

impl Outcome {
    /// Parses the `result` element's text content.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "crashed" => Some(Self::Crashed),
            "cancelled" => Some(Self::Cancelled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the wire keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested file-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Book-relative path, percent-decoded.
    pub href: String,
    /// Manifest identifier, possibly empty.
    pub id: String,
    /// Declared media type.
    pub media_type: String,
}

/// Severity of a validation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// A warning.
    Warning,
    /// An error.
    Error,
}

impl Severity {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One diagnostic reported by a validation plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDiagnostic {
    /// Diagnostic severity.
    pub severity: Severity,
    /// Book path the diagnostic refers to.
    pub book_path: String,
    /// 1-based line, `-1` when unknown.
    pub line: i32,
    /// 0-based character offset, `-1` when unknown.
    pub column: i32,
    /// Human-readable message.
    pub message: String,
}

/// The decoded result of one plugin run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginReport {
    /// The reported outcome, absent when no `result` element was present.
    pub outcome: Option<Outcome>,
    /// Human-readable messages, in document order.
    pub messages: Vec<String>,
    /// Requested additions, in report order.
    pub added: Vec<ChangeRecord>,
    /// Requested deletions, in report order.
    pub deleted: Vec<ChangeRecord>,
    /// Requested modifications, in report order.
    pub modified: Vec<ChangeRecord>,
    /// Validation diagnostics, in report order, never deduplicated.
    pub diagnostics: Vec<ValidationDiagnostic>,
    /// Net change in tracked content documents this report requests.
    pub content_document_delta: i64,
}

impl PluginReport {
    /// Returns `true` when the report requests no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Parses the accumulated child output into a [`PluginReport`].
///
/// `tracked_content` holds the hrefs of the content documents the store
/// currently tracks; a deletion only decrements the ledger when its target
/// is tracked, so deleting never-manifested files cannot over-count.
///
/// # Errors
///
/// Returns [`PluginError::ProtocolParse`] for a structurally invalid
/// document. The caller must treat the whole report as discarded.
pub fn parse_report(
    raw_output: &str,
    tracked_content: &BTreeSet<String>,
) -> Result<PluginReport, PluginError> {
    // Ignore anything the plugin printed before its structured result.
    let document_text = match raw_output.rfind("<?xml ") {
        Some(start) => raw_output.get(start..).unwrap_or(raw_output),
        None => raw_output,
    };
    let document = Document::parse(document_text).map_err(|err| PluginError::ProtocolParse {
        message: err.to_string(),
    })?;

    let mut report = PluginReport::default();
    let mut remaining: BTreeSet<String> = tracked_content.clone();

    for node in document.descendants().filter(Node::is_element) {
        match node.tag_name().name() {
            "result" => {
                let keyword = node.text().unwrap_or_default().trim().to_owned();
                report.outcome = Outcome::from_keyword(&keyword);
                debug!(target: PROTOCOL_TARGET, result = keyword.as_str(), "plugin result");
            }
            "msg" => {
                report
                    .messages
                    .push(node.text().unwrap_or_default().to_owned());
            }
            "deleted" => {
                let record = change_record(node);
                if record.media_type == mediatype::XHTML && remaining.remove(&record.href) {
                    report.content_document_delta -= 1;
                }
                report.deleted.push(record);
            }
            "added" => {
                let record = change_record(node);
                if record.media_type == mediatype::XHTML {
                    report.content_document_delta += 1;
                }
                report.added.push(record);
            }
            "modified" => report.modified.push(change_record(node)),
            "validationresult" => {
                // Unrecognised severities are skipped, not errors.
                if let Some(diagnostic) = validation_diagnostic(node) {
                    report.diagnostics.push(diagnostic);
                }
            }
            _ => {}
        }
    }
    Ok(report)
}

fn change_record(node: Node<'_, '_>) -> ChangeRecord {
    let href = node.attribute("href").unwrap_or_default();
    ChangeRecord {
        href: percent_decode_str(href).decode_utf8_lossy().into_owned(),
        id: node.attribute("id").unwrap_or_default().to_owned(),
        media_type: node.attribute("media-type").unwrap_or_default().to_owned(),
    }
}

fn validation_diagnostic(node: Node<'_, '_>) -> Option<ValidationDiagnostic> {
    let severity = Severity::from_keyword(node.attribute("type").unwrap_or_default())?;
    Some(ValidationDiagnostic {
        severity,
        book_path: node.attribute("bookpath").unwrap_or_default().to_owned(),
        line: lenient_int(node.attribute("linenumber")),
        column: lenient_int(node.attribute("charoffset")),
        message: node.attribute("message").unwrap_or_default().to_owned(),
    })
}

/// Diagnostics are advisory: an unparseable position defaults to `-1`
/// rather than rejecting the diagnostic.
fn lenient_int(value: Option<&str>) -> i32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(-1)
}
