//! Host and session settings consumed by the exporter and launcher.
//!
//! These are the read-only knobs the invoking application hands to the
//! lifecycle controller at construction: interpreter preferences, host
//! directories, UI state, and the theme values the handshake file forwards
//! to the plugin framework. Nothing here is persisted by this crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Light or dark UI theme tag, forwarded verbatim in the handshake file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light theme.
    #[default]
    Light,
    /// Dark theme.
    Dark,
}

impl Theme {
    /// Returns the wire tag written to the handshake file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

/// The five theme colors the handshake file carries, as `#rrggbb` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeColors {
    /// Window background color.
    pub window: String,
    /// Base (text-entry background) color.
    pub base: String,
    /// Foreground text color.
    pub text: String,
    /// Selection highlight color.
    pub highlight: String,
    /// Text color inside a selection.
    pub highlighted_text: String,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            window: "#efefef".to_owned(),
            base: "#ffffff".to_owned(),
            text: "#000000".to_owned(),
            highlight: "#308cc6".to_owned(),
            highlighted_text: "#ffffff".to_owned(),
        }
    }
}

impl ThemeColors {
    /// Joins the five colors into the comma-separated handshake field, in
    /// fixed order.
    #[must_use]
    pub fn join(&self) -> String {
        [
            self.window.as_str(),
            self.base.as_str(),
            self.text.as_str(),
            self.highlight.as_str(),
            self.highlighted_text.as_str(),
        ]
        .join(",")
    }
}

/// Read-only host settings for one plugin invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefer the bundled interpreter when the plugin supports it.
    pub use_bundled_interpreter: bool,
    /// The host application's installation directory.
    pub application_dir: PathBuf,
    /// The user preferences directory.
    pub prefs_dir: PathBuf,
    /// Platform-specific dictionary search paths.
    pub dictionary_dirs: Vec<PathBuf>,
    /// UI language code (e.g. `"en_GB"`).
    pub ui_language: String,
    /// Active spelling dictionary name.
    pub dictionary: String,
    /// UI font descriptor string.
    pub ui_font: String,
    /// Active UI theme.
    pub theme: Theme,
    /// The five theme colors.
    pub colors: ThemeColors,
    /// Set when an automation session drives the run; carries the
    /// automation parameter string.
    pub automation_parameter: Option<String>,
}
