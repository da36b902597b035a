//! Platform-conditional process environment construction.
//!
//! Everything platform-specific about launching an interpreter is isolated
//! behind [`plugin_environment`], a pure function from (platform, bundled
//! flag, paths, inherited environment) to a finished environment map. The
//! function is idempotent: applying it to its own output yields the same
//! map, so a retried launch sees the same effective environment.

use std::collections::BTreeMap;
use std::path::Path;

/// Host platform selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux and other unix-likes.
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
}

impl Platform {
    /// Returns the platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    /// Returns the search-path list delimiter for the platform.
    #[must_use]
    pub const fn path_delimiter(self) -> char {
        match self {
            Self::Windows => ';',
            Self::Linux | Self::MacOs => ':',
        }
    }

    const fn library_path_var(self) -> Option<&'static str> {
        match self {
            Self::Linux => Some("LD_LIBRARY_PATH"),
            Self::MacOs => Some("DYLD_FALLBACK_LIBRARY_PATH"),
            Self::Windows => None,
        }
    }
}

/// Interpreter environment variables removed when running the bundled
/// interpreter, so a system installation cannot interfere with it.
const ISOLATED_VARS: [&str; 14] = [
    "PYTHONPATH",
    "PYTHONOPTIMIZE",
    "PYTHONDEBUG",
    "PYTHONSTARTUP",
    "PYTHONINSPECT",
    "PYTHONUNBUFFERED",
    "PYTHONVERBOSE",
    "PYTHONCASEOK",
    "PYTHONDONTWRITEBYTECODE",
    "PYTHONHASHSEED",
    "PYTHONNOUSERSITE",
    "PYTHONUSERBASE",
    "PYTHONWARNINGS",
    "PYTHONFAULTHANDLER",
];

/// Marker consumed by the plugin framework for compatibility checks.
const RUNTIME_VERSION_VAR: &str = "FOLIO_RUNTIME_VERSION";

/// Builds the child-process environment for the given platform and
/// bundling mode, starting from the inherited environment.
#[must_use]
pub fn plugin_environment(
    platform: Platform,
    bundled: bool,
    application_dir: &Path,
    interpreter: &Path,
    base: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();

    if bundled {
        // Point the interpreter at its own pieces and keep any system
        // installation out of the picture.
        if let Some(home) = interpreter.parent() {
            env.insert("PYTHONHOME".to_owned(), home.display().to_string());
        }
        env.insert("PYTHONIOENCODING".to_owned(), "UTF-8".to_owned());
        env.insert(
            "SSL_CERT_FILE".to_owned(),
            application_dir
                .join("certifi")
                .join("cacert.pem")
                .display()
                .to_string(),
        );
        for var in ISOLATED_VARS {
            env.remove(var);
        }
    }

    let app = application_dir.display().to_string();
    let delimiter = platform.path_delimiter();
    if let Some(var) = platform.library_path_var() {
        env.insert(
            var.to_owned(),
            prepend_unique(&app, env.get(var).map(String::as_str), delimiter),
        );
    }
    if platform == Platform::Windows {
        env.insert(
            "PATH".to_owned(),
            prepend_unique(&app, env.get("PATH").map(String::as_str), delimiter),
        );
    }

    env.insert(
        RUNTIME_VERSION_VAR.to_owned(),
        env!("CARGO_PKG_VERSION").to_owned(),
    );
    env
}

/// Prepends `entry` to a delimited search path, removing prior occurrences
/// so the result is stable under repeated application.
fn prepend_unique(entry: &str, existing: Option<&str>, delimiter: char) -> String {
    let mut parts = vec![entry.to_owned()];
    if let Some(existing) = existing {
        parts.extend(
            existing
                .split(delimiter)
                .filter(|p| !p.is_empty() && *p != entry)
                .map(str::to_owned),
        );
    }
    parts.join(&delimiter.to_string())
}
