//! Well-formedness checking for candidate markup documents.
//!
//! The gatekeeper refuses structurally broken XHTML before it can reach the
//! store. The check is a plain XML parse; no DTD or schema validation is
//! attempted, matching the guarantees the rest of the pipeline relies on.

use roxmltree::Document;

/// A well-formedness failure with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellFormedError {
    /// 1-based line of the failure.
    pub line: u32,
    /// 1-based column of the failure.
    pub column: u32,
    /// Parser message describing the failure.
    pub message: String,
}

/// Checks the source for well-formedness.
///
/// Returns `None` when the document parses cleanly, otherwise the position
/// and message of the first failure.
#[must_use]
pub fn check(source: &str) -> Option<WellFormedError> {
    match Document::parse(source) {
        Ok(_) => None,
        Err(err) => {
            let pos = err.pos();
            Some(WellFormedError {
                line: pos.row,
                column: pos.col,
                message: err.to_string(),
            })
        }
    }
}
