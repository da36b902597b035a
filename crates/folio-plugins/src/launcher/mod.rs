//! Interpreter resolution and launch-plan construction.
//!
//! A [`LaunchPlan`] is everything needed to start the child process: the
//! resolved interpreter, the fully-built argument vector, and the finished
//! environment map. Resolution prefers the optionally-bundled interpreter
//! when the user has opted in and the plugin declares a supported engine,
//! then falls back to scanning the declared engine list in order for a
//! registered external path.

pub mod env;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::descriptor::PluginDescriptor;
use crate::error::PluginError;
use crate::registry::PluginRegistry;
use crate::settings::Settings;

pub use self::env::{Platform, plugin_environment};

/// Tracing target for launcher operations.
const LAUNCHER_TARGET: &str = "folio_plugins::launcher";

/// Engine-family prefix this host supports.
const SUPPORTED_FAMILY: &str = "python3";

/// Launcher script resolved per engine family, relative to the launcher
/// root.
const LAUNCHER_SCRIPT: [&str; 2] = ["python", "launcher.py"];

/// A fully-resolved plan for starting one plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    interpreter: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl LaunchPlan {
    /// Returns the resolved interpreter executable.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Returns the argument vector.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the finished environment map.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Builds a [`Command`] ready to spawn, with the environment replaced
    /// wholesale by the plan's map.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.interpreter);
        command.args(&self.args);
        command.env_clear();
        command.envs(&self.env);
        command
    }
}

/// Resolves the interpreter for a plugin.
///
/// Returns the path and whether it is the bundled interpreter.
///
/// # Errors
///
/// Returns [`PluginError::UnsupportedEngine`] when no declared engine is in
/// a supported family and [`PluginError::MissingInterpreter`] when no
/// engine resolves to a registered path.
pub fn resolve_interpreter(
    descriptor: &PluginDescriptor,
    registry: &PluginRegistry,
    settings: &Settings,
) -> Result<(PathBuf, bool), PluginError> {
    let engines = descriptor.engines();
    if !engines.iter().any(|e| e.starts_with(SUPPORTED_FAMILY)) {
        return Err(PluginError::UnsupportedEngine {
            engines: engines.join(","),
        });
    }
    if settings.use_bundled_interpreter {
        if let Some(bundled) = registry.bundled_interpreter() {
            debug!(
                target: LAUNCHER_TARGET,
                plugin = descriptor.name(),
                interpreter = %bundled.display(),
                "using bundled interpreter"
            );
            return Ok((bundled.to_path_buf(), true));
        }
    }
    for engine in engines {
        if let Some(path) = registry.engine_path(engine) {
            debug!(
                target: LAUNCHER_TARGET,
                plugin = descriptor.name(),
                engine = engine.as_str(),
                interpreter = %path.display(),
                "resolved external interpreter"
            );
            return Ok((path.to_path_buf(), false));
        }
    }
    Err(PluginError::MissingInterpreter {
        engines: engines.join(","),
    })
}

/// Returns the fixed launcher script path for the supported engine family.
///
/// # Errors
///
/// Returns [`PluginError::MissingLauncher`] when the script does not exist
/// on disk.
pub fn launcher_script(registry: &PluginRegistry) -> Result<PathBuf, PluginError> {
    let mut path = registry.launcher_dir().to_path_buf();
    for part in LAUNCHER_SCRIPT {
        path.push(part);
    }
    if !path.is_file() {
        return Err(PluginError::MissingLauncher { path });
    }
    Ok(path)
}

/// Builds the complete launch plan for one run.
///
/// The argument vector is, in order: interpreter flags, the launcher
/// script, the book root, the working directory, the plugin type tag, and
/// the plugin's entry script.
///
/// # Errors
///
/// Propagates interpreter and launcher resolution failures; all are
/// detected before any process is started.
pub fn build_plan(
    descriptor: &PluginDescriptor,
    registry: &PluginRegistry,
    settings: &Settings,
    book_root: &Path,
    working_dir: &Path,
    base_env: &BTreeMap<String, String>,
) -> Result<LaunchPlan, PluginError> {
    let platform = Platform::current();
    let (interpreter, bundled) = resolve_interpreter(descriptor, registry, settings)?;
    let launcher = launcher_script(registry)?;
    let entry = registry.entry_script(descriptor.name());

    let mut args = vec![interpreter_flags(platform, bundled).to_owned()];
    args.push(launcher.display().to_string());
    args.push(book_root.display().to_string());
    args.push(working_dir.display().to_string());
    args.push(descriptor.kind().as_str().to_owned());
    args.push(entry.display().to_string());

    let env = plugin_environment(
        platform,
        bundled,
        &settings.application_dir,
        &interpreter,
        base_env,
    );
    Ok(LaunchPlan {
        interpreter,
        args,
        env,
    })
}

/// Interpreter flags: unbuffered I/O always; bundled runs additionally
/// skip bytecode and (off Windows) ignore interpreter environment vars.
const fn interpreter_flags(platform: Platform, bundled: bool) -> &'static str {
    match (bundled, platform) {
        (false, _) => "-u",
        (true, Platform::Windows) => "-Bu",
        (true, Platform::Linux | Platform::MacOs) => "-EBu",
    }
}
