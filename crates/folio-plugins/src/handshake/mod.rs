//! The handshake file a plugin reads before it starts.
//!
//! The handshake is a newline-delimited UTF-8 text file with positional
//! fields. The child process parses it by line number, so the field order
//! and count below are a wire contract: changing either is a breaking
//! protocol change.
//!
//! Field order:
//!
//! 1. manifest-document relative path
//! 2. host application directory
//! 3. user preferences directory
//! 4. dictionary search paths, `:`-joined
//! 5. UI language
//! 6. active dictionary
//! 7. book modified flag (`True` / `False`)
//! 8. book file path
//! 9. theme tag (`light` / `dark`)
//! 10. five theme colors, comma-joined
//! 11. UI font descriptor
//! 12. automation tag (`automate` / `manual`)
//! 13. automation parameter string (may be empty)
//! 14. font-obfuscation blob: per-font relative-path/algorithm pairs, with
//!     U+001F inside a pair and U+001E between pairs
//! 15+. currently selected resource paths, one per remaining line

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use folio_epub::BookStore;

use crate::settings::{Settings, Theme, ThemeColors};

/// Separator between the two halves of a font-obfuscation pair.
pub const PAIR_SEP: char = '\u{1f}';

/// Separator between font-obfuscation pairs.
pub const RECORD_SEP: char = '\u{1e}';

/// File name the handshake is written under in the working directory.
pub const HANDSHAKE_FILE: &str = "folio.cfg";

/// Number of fixed positional fields before the selected-resources tail.
const FIXED_FIELDS: usize = 14;

/// A handshake file parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeParseError {
    /// The file ended before all fixed fields were present.
    #[error("handshake truncated: expected {FIXED_FIELDS} fields, got {got}")]
    Truncated {
        /// Number of lines actually present.
        got: usize,
    },

    /// A positional field held an unrecognised value.
    #[error("handshake field {index} is invalid: {message}")]
    BadField {
        /// Zero-based field index.
        index: usize,
        /// Description of the problem.
        message: String,
    },
}

/// The session context serialized for the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Manifest-document relative path.
    pub opf_path: String,
    /// Host application directory.
    pub application_dir: PathBuf,
    /// User preferences directory.
    pub prefs_dir: PathBuf,
    /// Dictionary search paths.
    pub dictionary_dirs: Vec<PathBuf>,
    /// UI language code.
    pub ui_language: String,
    /// Active dictionary name.
    pub dictionary: String,
    /// Whether the book has unsaved changes.
    pub book_modified: bool,
    /// The book's file path.
    pub book_path: PathBuf,
    /// Light/dark theme tag.
    pub theme: Theme,
    /// The five theme colors.
    pub colors: ThemeColors,
    /// UI font descriptor.
    pub ui_font: String,
    /// Automation parameter, present only in automation-driven runs.
    pub automation_parameter: Option<String>,
    /// Per-font (relative path, obfuscation algorithm) pairs.
    pub font_obfuscation: Vec<(String, String)>,
    /// Currently selected resource paths.
    pub selected: Vec<String>,
}

impl Handshake {
    /// Builds the handshake for one run from the open book and settings.
    #[must_use]
    pub fn from_book(
        store: &BookStore,
        settings: &Settings,
        book_path: impl Into<PathBuf>,
        selected: Vec<String>,
    ) -> Self {
        Self {
            opf_path: store.opf_href().to_owned(),
            application_dir: settings.application_dir.clone(),
            prefs_dir: settings.prefs_dir.clone(),
            dictionary_dirs: settings.dictionary_dirs.clone(),
            ui_language: settings.ui_language.clone(),
            dictionary: settings.dictionary.clone(),
            book_modified: store.is_modified(),
            book_path: book_path.into(),
            theme: settings.theme,
            colors: settings.colors.clone(),
            ui_font: settings.ui_font.clone(),
            automation_parameter: settings.automation_parameter.clone(),
            font_obfuscation: store.font_obfuscation_pairs(),
            selected,
        }
    }

    /// Serialises the handshake into its ordered line list.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            self.opf_path.clone(),
            self.application_dir.display().to_string(),
            self.prefs_dir.display().to_string(),
            self.dictionary_dirs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(":"),
            self.ui_language.clone(),
            self.dictionary.clone(),
            if self.book_modified { "True" } else { "False" }.to_owned(),
            self.book_path.display().to_string(),
            self.theme.as_str().to_owned(),
            self.colors.join(),
            self.ui_font.clone(),
            if self.automation_parameter.is_some() {
                "automate"
            } else {
                "manual"
            }
            .to_owned(),
            self.automation_parameter.clone().unwrap_or_default(),
            self.font_obfuscation
                .iter()
                .map(|(path, algorithm)| format!("{path}{PAIR_SEP}{algorithm}"))
                .collect::<Vec<_>>()
                .join(&RECORD_SEP.to_string()),
        ];
        lines.extend(self.selected.iter().cloned());
        lines
    }

    /// Writes the handshake file into the run's working directory.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the write fails.
    pub fn write(&self, working_dir: &Path) -> io::Result<PathBuf> {
        let path = working_dir.join(HANDSHAKE_FILE);
        std::fs::write(&path, self.to_lines().join("\n"))?;
        Ok(path)
    }

    /// Parses a handshake file back into its structured form.
    ///
    /// This is the conforming-reader half of the round-trip contract; the
    /// child process implements the same positional parse.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeParseError`] on a truncated file or an
    /// unrecognised positional value.
    pub fn parse(text: &str) -> Result<Self, HandshakeParseError> {
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < FIXED_FIELDS {
            return Err(HandshakeParseError::Truncated { got: lines.len() });
        }
        let field = |index: usize| -> &str { lines.get(index).copied().unwrap_or_default() };

        let book_modified = match field(6) {
            "True" => true,
            "False" => false,
            other => {
                return Err(HandshakeParseError::BadField {
                    index: 6,
                    message: format!("expected True/False, got '{other}'"),
                });
            }
        };
        let theme = match field(8) {
            "light" => Theme::Light,
            "dark" => Theme::Dark,
            other => {
                return Err(HandshakeParseError::BadField {
                    index: 8,
                    message: format!("expected light/dark, got '{other}'"),
                });
            }
        };
        let colors = parse_colors(field(9))?;
        let automation_parameter = match field(11) {
            "automate" => Some(field(12).to_owned()),
            "manual" => None,
            other => {
                return Err(HandshakeParseError::BadField {
                    index: 11,
                    message: format!("expected automate/manual, got '{other}'"),
                });
            }
        };
        let font_obfuscation = parse_font_pairs(field(13))?;

        Ok(Self {
            opf_path: field(0).to_owned(),
            application_dir: PathBuf::from(field(1)),
            prefs_dir: PathBuf::from(field(2)),
            dictionary_dirs: if field(3).is_empty() {
                Vec::new()
            } else {
                field(3).split(':').map(PathBuf::from).collect()
            },
            ui_language: field(4).to_owned(),
            dictionary: field(5).to_owned(),
            book_modified,
            book_path: PathBuf::from(field(7)),
            theme,
            colors,
            ui_font: field(10).to_owned(),
            automation_parameter,
            font_obfuscation,
            selected: lines
                .iter()
                .skip(FIXED_FIELDS)
                .filter(|l| !l.is_empty())
                .map(|l| (*l).to_owned())
                .collect(),
        })
    }
}

fn parse_colors(joined: &str) -> Result<ThemeColors, HandshakeParseError> {
    let parts: Vec<&str> = joined.split(',').collect();
    let [window, base, text, highlight, highlighted_text] = parts.as_slice() else {
        return Err(HandshakeParseError::BadField {
            index: 9,
            message: format!("expected 5 colors, got {}", parts.len()),
        });
    };
    Ok(ThemeColors {
        window: (*window).to_owned(),
        base: (*base).to_owned(),
        text: (*text).to_owned(),
        highlight: (*highlight).to_owned(),
        highlighted_text: (*highlighted_text).to_owned(),
    })
}

fn parse_font_pairs(blob: &str) -> Result<Vec<(String, String)>, HandshakeParseError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    blob.split(RECORD_SEP)
        .map(|pair| {
            pair.split_once(PAIR_SEP)
                .map(|(path, algorithm)| (path.to_owned(), algorithm.to_owned()))
                .ok_or_else(|| HandshakeParseError::BadField {
                    index: 13,
                    message: format!("font pair '{pair}' has no separator"),
                })
        })
        .collect()
}
