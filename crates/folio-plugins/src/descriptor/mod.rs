//! Plugin descriptors: identity and declared capabilities.
//!
//! A [`PluginDescriptor`] is the immutable record the external plugin
//! registry loads for each installed plugin: its name, category, declared
//! engine identifiers, and dialog-behaviour flags. Descriptors are read-only
//! to the execution core and validated on registration.

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Category of a plugin.
///
/// The string form is a wire value: it is passed verbatim to the launcher
/// script as the plugin type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Produces a whole new archive that replaces the open book.
    Input,
    /// Exports the book to an external format.
    Output,
    /// Edits the book in place.
    Edit,
    /// Validates the book and reports diagnostics.
    Validation,
    /// Produces a report without changing the book.
    Report,
}

impl PluginKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Edit => "edit",
            Self::Validation => "validation",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of an installed plugin.
///
/// # Example
///
/// ```
/// use folio_plugins::{PluginDescriptor, PluginKind};
///
/// let descriptor = PluginDescriptor::new(
///     "FlightCrew",
///     PluginKind::Validation,
///     vec!["python3.13".into(), "python3.12".into()],
/// );
/// assert_eq!(descriptor.kind(), PluginKind::Validation);
/// assert!(!descriptor.autostart());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    name: String,
    kind: PluginKind,
    engines: Vec<String>,
    #[serde(default)]
    autostart: bool,
    #[serde(default)]
    autoclose: bool,
}

impl PluginDescriptor {
    /// Creates a descriptor with both dialog flags off.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PluginKind, engines: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            engines,
            autostart: false,
            autoclose: false,
        }
    }

    /// Enables starting the plugin without user interaction.
    #[must_use]
    pub const fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Enables closing the run dialog automatically on success.
    #[must_use]
    pub const fn with_autoclose(mut self, autoclose: bool) -> Self {
        self.autoclose = autoclose;
        self
    }

    /// Validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Registry`] when the name is empty or no
    /// engine is declared.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Registry {
                message: String::from("plugin name must not be empty"),
            });
        }
        if self.engines.iter().all(|e| e.trim().is_empty()) {
            return Err(PluginError::Registry {
                message: format!("plugin '{}' declares no engine", self.name),
            });
        }
        Ok(())
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plugin category.
    #[must_use]
    pub const fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Returns the declared engine identifiers, in preference order.
    #[must_use]
    pub fn engines(&self) -> &[String] {
        &self.engines
    }

    /// Returns whether the plugin starts without user interaction.
    #[must_use]
    pub const fn autostart(&self) -> bool {
        self.autostart
    }

    /// Returns whether the run dialog closes automatically on success.
    #[must_use]
    pub const fn autoclose(&self) -> bool {
        self.autoclose
    }
}
