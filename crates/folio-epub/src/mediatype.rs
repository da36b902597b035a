//! Media-type constants used as wire values by the plugin result protocol.
//!
//! These strings are contracts shared with the external plugin framework and
//! must never be edited, including the historical misspelling in the
//! page-map type which shipped in the original framework and is relied on by
//! existing plugins.

/// Primary content documents (XHTML).
pub const XHTML: &str = "application/xhtml+xml";

/// The manifest (OPF package) document.
pub const OPF: &str = "application/oebps-package+xml";

/// The legacy navigation-control (NCX) document.
pub const NCX: &str = "application/x-dtbncx+xml";

/// Adobe page-map documents. The missing `p` is historical.
pub const PAGE_MAP: &str = "application/oebs-page-map+xml";

/// Synchronised-media (SMIL) overlay documents.
pub const SMIL: &str = "application/smil+xml";

/// A whole packaged archive, reported by input plugins to replace the book.
pub const EPUB: &str = "application/epub+zip";

/// Media types that receive auto-repair instead of strict validation.
pub const AUXILIARY_XML: [&str; 4] = [OPF, NCX, PAGE_MAP, SMIL];

/// Returns `true` when the media type is auxiliary XML (repaired, never
/// strictly validated).
#[must_use]
pub fn is_auxiliary_xml(media_type: &str) -> bool {
    AUXILIARY_XML.contains(&media_type)
}
