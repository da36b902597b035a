//! Best-effort auto-repair for auxiliary XML documents.
//!
//! Manifest, navigation-control, page-map, and synchronised-media documents
//! cannot be meaningfully validated without their DTDs, so instead of
//! rejecting them the pipeline runs every candidate through a normalisation
//! pass: line endings are unified, stray control characters are dropped,
//! bare ampersands are escaped, and a missing XML declaration is restored.
//! The pass never fails and is a fixed point: repairing already-repaired
//! output returns it byte for byte.

use tracing::debug;

/// Tracing target for repair operations.
const REPAIR_TARGET: &str = "folio_epub::repair";

/// Repairs and normalises an auxiliary XML document.
#[must_use]
pub fn repair_xml(source: &str, media_type: &str) -> String {
    let mut text = normalize_line_endings(source);
    text = strip_control_characters(&text);
    text = escape_bare_ampersands(&text);
    if !text.trim_start().starts_with("<?xml") {
        text.insert_str(0, "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    }
    let well_formed = roxmltree::Document::parse(&text).is_ok();
    debug!(
        target: REPAIR_TARGET,
        media_type,
        well_formed,
        bytes = text.len(),
        "auto-repaired auxiliary XML document"
    );
    text
}

fn normalize_line_endings(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_control_characters(source: &str) -> String {
    source
        .chars()
        .filter(|&c| c == '\t' || c == '\n' || !c.is_control())
        .collect()
}

/// Escapes `&` characters that do not introduce a recognisable entity or
/// character reference.
fn escape_bare_ampersands(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars.get(i).copied().unwrap_or('\0');
        if c == '&' && !is_entity_start(&chars, i) {
            out.push_str("&amp;");
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// Returns `true` when the text at `start` (an `&`) begins a named entity,
/// a decimal character reference, or a hexadecimal character reference.
fn is_entity_start(chars: &[char], start: usize) -> bool {
    let mut rest = chars.iter().skip(start + 1);
    let Some(&first) = rest.next() else {
        return false;
    };
    let body: Vec<char> = if first == '#' {
        rest.take_while(|&&c| c != ';' && !c.is_whitespace()).copied().collect()
    } else {
        std::iter::once(first)
            .chain(rest.take_while(|&&c| c != ';' && !c.is_whitespace()).copied())
            .collect()
    };
    // The reference must terminate with a semicolon within a short span.
    let len = if first == '#' { body.len() + 1 } else { body.len() };
    let terminated = chars.get(start + 1 + len).copied() == Some(';');
    if !terminated || body.is_empty() || len > 10 {
        return false;
    }
    if first == '#' {
        if body.first().copied() == Some('x') || body.first().copied() == Some('X') {
            body.len() > 1 && body.iter().skip(1).all(|c| c.is_ascii_hexdigit())
        } else {
            body.iter().all(char::is_ascii_digit)
        }
    } else {
        body.first().is_some_and(char::is_ascii_alphabetic)
            && body.iter().all(|c| c.is_ascii_alphanumeric())
    }
}
