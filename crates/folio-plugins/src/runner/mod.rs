//! Run lifecycle supervision.
//!
//! [`PluginRunner`] drives one run end to end: snapshot, launch, output
//! collection, result parsing, the well-formedness gate, and finally change
//! application. Every stage can abort the run, and nothing touches the
//! book store until the applier commits.
//!
//! The child process is reached only through the [`PluginExecutor`] seam so
//! the whole lifecycle is testable with a scripted stand-in.
//!
//! Cancellation is cooperative first: the child gets a terminate request
//! and a bounded grace period, then a hard kill with a second bounded wait.
//! A cancelled run never applies changes, whatever the child managed to
//! print.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use folio_epub::{BookStore, ResourceKind};

use crate::applier::{Applier, ApplyOutcome};
use crate::descriptor::PluginDescriptor;
use crate::error::PluginError;
use crate::gatekeeper;
use crate::handshake::Handshake;
use crate::interact::Interaction;
use crate::launcher::{self, LaunchPlan};
use crate::process::{PluginProcess, ProcessEvent};
use crate::protocol::{self, Outcome, ValidationDiagnostic};
use crate::registry::PluginRegistry;
use crate::settings::Settings;
use crate::snapshot;
use crate::views::ViewManager;

/// Tracing target for run supervision.
const RUNNER_TARGET: &str = "folio_plugins::runner";

/// Grace period for each stage of cancellation escalation.
const CANCEL_WAIT: Duration = Duration::from_secs(2);

/// How often the event loop wakes to check the cancel flag.
const EVENT_POLL: Duration = Duration::from_millis(50);

/// Lifecycle position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run started yet.
    Idle,
    /// Snapshot written, launch plan built.
    Ready,
    /// Child process running, output being collected.
    Running,
    /// Child exited, output being decoded.
    ParsingResult,
    /// Candidate documents under the well-formedness gate.
    GateChecking,
    /// Accepted changes being applied to the store.
    Applying,
    /// Run finished and any changes were applied.
    Done,
    /// Run finished without applying changes.
    Failed,
    /// Run was cancelled by the user.
    Cancelled,
    /// The child terminated abnormally.
    Crashed,
    /// The child could not be started.
    StartError,
}

impl RunState {
    /// Returns the user-facing status line for this state.
    #[must_use]
    pub const fn status_line(self) -> &'static str {
        match self {
            Self::Idle | Self::Ready => "Status: ready",
            Self::Running | Self::ParsingResult | Self::GateChecking | Self::Applying => {
                "Status: running"
            }
            Self::Done => "Status: finished",
            Self::Failed | Self::Crashed | Self::StartError => "Status: failed",
            Self::Cancelled => "Status: cancelled",
        }
    }
}

/// A started child process as the runner sees it.
pub trait RunningPlugin {
    /// Returns the event channel; [`ProcessEvent::Exited`] arrives last.
    #[must_use]
    fn events(&self) -> &Receiver<ProcessEvent>;

    /// Requests cooperative termination.
    fn terminate(&self);

    /// Force-kills the child.
    fn kill(&self);

    /// Waits up to `timeout` for exit, returning whether it happened.
    #[must_use]
    fn wait_timeout(&self, timeout: Duration) -> bool;
}

/// Seam between the run lifecycle and real process execution.
pub trait PluginExecutor {
    /// Starts the planned child process.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::StartFailure`] when the process cannot be
    /// started.
    fn launch(&self, plan: &LaunchPlan) -> Result<Box<dyn RunningPlugin>, PluginError>;
}

impl RunningPlugin for PluginProcess {
    fn events(&self) -> &Receiver<ProcessEvent> {
        Self::events(self)
    }

    fn terminate(&self) {
        Self::terminate(self);
    }

    fn kill(&self) {
        Self::kill(self);
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        Self::wait_timeout(self, timeout)
    }
}

/// The default executor: spawns the plan as a real child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl PluginExecutor for ProcessExecutor {
    fn launch(&self, plan: &LaunchPlan) -> Result<Box<dyn RunningPlugin>, PluginError> {
        Ok(Box::new(PluginProcess::spawn(&mut plan.to_command())?))
    }
}

/// The final record of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    plugin: String,
    outcome: Outcome,
    state: RunState,
    messages: Vec<String>,
    diagnostics: Vec<ValidationDiagnostic>,
    console: String,
    applied: ApplyOutcome,
}

impl RunReport {
    fn new(plugin: &str, outcome: Outcome, state: RunState) -> Self {
        Self {
            plugin: plugin.to_owned(),
            outcome,
            state,
            messages: Vec::new(),
            diagnostics: Vec::new(),
            console: String::new(),
            applied: ApplyOutcome::Unchanged,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Returns the plugin name the run targeted.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Returns the authoritative outcome.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Returns the terminal lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Returns the user-facing status line.
    #[must_use]
    pub const fn status_line(&self) -> &'static str {
        self.state.status_line()
    }

    /// Returns the plugin's human-readable messages.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Returns the validation diagnostics, in report order.
    #[must_use]
    pub fn diagnostics(&self) -> &[ValidationDiagnostic] {
        &self.diagnostics
    }

    /// Returns everything the plugin wrote to its standard error.
    #[must_use]
    pub fn console(&self) -> &str {
        &self.console
    }

    /// Returns what application did to the book.
    #[must_use]
    pub const fn applied(&self) -> &ApplyOutcome {
        &self.applied
    }
}

/// Supervises one plugin run at a time.
pub struct PluginRunner<'a, E> {
    registry: &'a PluginRegistry,
    settings: &'a Settings,
    executor: E,
    cancel: Arc<AtomicBool>,
    state: RunState,
}

impl<'a, E: PluginExecutor> PluginRunner<'a, E> {
    /// Creates a runner over a registry and settings snapshot.
    #[must_use]
    pub fn new(registry: &'a PluginRegistry, settings: &'a Settings, executor: E) -> Self {
        Self {
            registry,
            settings,
            executor,
            cancel: Arc::new(AtomicBool::new(false)),
            state: RunState::Idle,
        }
    }

    /// Returns the flag another thread may set to cancel the running
    /// plugin. Only the running stage honours it.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Runs one plugin against the book end to end.
    ///
    /// # Errors
    ///
    /// Returns an error only for pre-flight failures: an unknown plugin,
    /// an unresolvable interpreter, a missing launcher script, or a failed
    /// snapshot. Everything after launch is reported through the returned
    /// [`RunReport`] instead.
    pub fn run(
        &mut self,
        plugin_name: &str,
        store: &mut BookStore,
        views: &mut dyn ViewManager,
        interaction: &dyn Interaction,
        book_path: &str,
        selected: Vec<String>,
    ) -> Result<RunReport, PluginError> {
        self.cancel.store(false, Ordering::SeqCst);
        let descriptor = self
            .registry
            .get(plugin_name)
            .ok_or_else(|| PluginError::NotFound {
                name: plugin_name.to_owned(),
            })?
            .clone();

        let working_dir = TempDir::new().map_err(PluginError::io)?;
        let handshake = Handshake::from_book(store, self.settings, book_path, selected);
        snapshot::export(store, &handshake, working_dir.path())?;

        let base_env: BTreeMap<String, String> = std::env::vars().collect();
        let plan = launcher::build_plan(
            &descriptor,
            self.registry,
            self.settings,
            store.root(),
            working_dir.path(),
            &base_env,
        )?;
        self.state = RunState::Ready;
        info!(
            target: RUNNER_TARGET,
            plugin = plugin_name,
            kind = descriptor.kind().as_str(),
            "starting plugin"
        );

        let child = match self.executor.launch(&plan) {
            Ok(child) => child,
            Err(err) => {
                warn!(target: RUNNER_TARGET, plugin = plugin_name, %err, "launch failed");
                self.state = RunState::StartError;
                return Ok(RunReport::new(plugin_name, Outcome::Error, RunState::StartError)
                    .with_message(err.to_string()));
            }
        };

        self.state = RunState::Running;
        let collected = self.collect_output(child.as_ref());
        let console = String::from_utf8_lossy(&collected.stderr).into_owned();
        if collected.cancelled {
            self.state = RunState::Cancelled;
            info!(target: RUNNER_TARGET, plugin = plugin_name, "run cancelled");
            let mut cancelled =
                RunReport::new(plugin_name, Outcome::Cancelled, RunState::Cancelled);
            cancelled.console = console;
            return Ok(cancelled);
        }
        if collected.crashed {
            self.state = RunState::Crashed;
            warn!(target: RUNNER_TARGET, plugin = plugin_name, "plugin crashed");
            let mut crashed = RunReport::new(plugin_name, Outcome::Crashed, RunState::Crashed)
                .with_message("the plugin terminated abnormally");
            crashed.console = console;
            return Ok(crashed);
        }

        let mut report = self.finish_run(
            &descriptor,
            &collected.stdout,
            store,
            views,
            interaction,
            working_dir.path(),
        )?;
        report.console = console;
        Ok(report)
    }

    fn finish_run(
        &mut self,
        descriptor: &PluginDescriptor,
        stdout: &[u8],
        store: &mut BookStore,
        views: &mut dyn ViewManager,
        interaction: &dyn Interaction,
        working_dir: &Path,
    ) -> Result<RunReport, PluginError> {
        let plugin_name = descriptor.name();
        let kind = descriptor.kind();
        self.state = RunState::ParsingResult;
        let tracked: BTreeSet<String> = store
            .hrefs_by_kind(ResourceKind::Html)
            .into_iter()
            .collect();
        let raw = String::from_utf8_lossy(stdout);
        let report = match protocol::parse_report(&raw, &tracked) {
            Ok(report) => report,
            Err(err) => {
                self.state = RunState::Failed;
                warn!(target: RUNNER_TARGET, plugin = plugin_name, %err, "unusable result document");
                return Ok(RunReport::new(plugin_name, Outcome::Failed, RunState::Failed)
                    .with_message(err.to_string()));
            }
        };

        // A report that never states its result is not trusted.
        let outcome = report.outcome.unwrap_or(Outcome::Failed);
        if outcome != Outcome::Success {
            self.state = RunState::Failed;
            let mut failed = RunReport::new(plugin_name, outcome, RunState::Failed);
            failed.messages = report.messages;
            failed.diagnostics = report.diagnostics;
            return Ok(failed);
        }

        self.state = RunState::GateChecking;
        if !gatekeeper::inspect(&report, working_dir, interaction)? {
            self.state = RunState::Failed;
            let mut rejected = RunReport::new(plugin_name, Outcome::Failed, RunState::Failed)
                .with_message("changes rejected: malformed documents");
            rejected.diagnostics = report.diagnostics;
            return Ok(rejected);
        }

        self.state = RunState::Applying;
        let applied = match Applier::new(store, views, interaction).apply(&report, kind, working_dir)
        {
            Ok(applied) => applied,
            Err(err) => {
                self.state = RunState::Failed;
                warn!(target: RUNNER_TARGET, plugin = plugin_name, %err, "application refused");
                let mut refused = RunReport::new(plugin_name, Outcome::Failed, RunState::Failed)
                    .with_message(err.to_string());
                refused.diagnostics = report.diagnostics;
                return Ok(refused);
            }
        };

        self.state = RunState::Done;
        info!(target: RUNNER_TARGET, plugin = plugin_name, "run finished");
        let mut done = RunReport::new(plugin_name, Outcome::Success, RunState::Done);
        done.messages = report.messages;
        done.diagnostics = report.diagnostics;
        done.applied = applied;
        Ok(done)
    }

    /// Drains the child's event channel, honouring the cancel flag.
    fn collect_output(&self, child: &dyn RunningPlugin) -> CollectedOutput {
        let mut collected = CollectedOutput::default();
        loop {
            if !collected.cancelled && self.cancel.load(Ordering::SeqCst) {
                collected.cancelled = true;
                if !self.escalate_cancellation(child) {
                    // A child that survived the kill may never deliver its
                    // terminal event; abandon it instead of waiting.
                    return collected;
                }
            }
            match child.events().recv_timeout(EVENT_POLL) {
                Ok(ProcessEvent::Stdout(chunk)) => collected.stdout.extend(chunk),
                Ok(ProcessEvent::Stderr(chunk)) => {
                    debug!(
                        target: RUNNER_TARGET,
                        "plugin stderr: {}",
                        String::from_utf8_lossy(&chunk).trim_end()
                    );
                    collected.stderr.extend(chunk);
                }
                Ok(ProcessEvent::Exited { code, crashed }) => {
                    debug!(target: RUNNER_TARGET, code, crashed, "plugin exited");
                    collected.crashed = crashed && !collected.cancelled;
                    return collected;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    collected.crashed = !collected.cancelled;
                    return collected;
                }
            }
        }
    }

    /// Terminate, wait, kill, wait. Bounded at every step. Returns whether
    /// the child was observed to exit.
    fn escalate_cancellation(&self, child: &dyn RunningPlugin) -> bool {
        info!(target: RUNNER_TARGET, "cancelling plugin");
        child.terminate();
        if child.wait_timeout(CANCEL_WAIT) {
            return true;
        }
        warn!(target: RUNNER_TARGET, "plugin ignored terminate, killing");
        child.kill();
        if child.wait_timeout(CANCEL_WAIT) {
            return true;
        }
        warn!(target: RUNNER_TARGET, "plugin did not die after kill, abandoning");
        false
    }
}

#[derive(Default)]
struct CollectedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    cancelled: bool,
    crashed: bool,
}
