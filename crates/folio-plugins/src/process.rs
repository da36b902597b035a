//! Child-process execution with asynchronous output events.
//!
//! [`PluginProcess`] spawns the interpreter with stdin closed and stdout and
//! stderr piped. Two reader threads forward output chunks over an mpsc
//! channel as [`ProcessEvent`]s; a monitor thread polls for exit and sends
//! the terminal [`ProcessEvent::Exited`] only after both readers have
//! drained, so the terminal event is always the last one observed for a
//! run. Nothing here blocks the coordinating thread: it consumes the event
//! channel at its own pace.
//!
//! Cancellation support is split into a cooperative [`PluginProcess::terminate`]
//! (SIGTERM on unix) and a forceful [`PluginProcess::kill`], with
//! [`PluginProcess::wait_timeout`] providing the bounded waits in between.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::PluginError;

/// Tracing target for plugin process operations.
const PROCESS_TARGET: &str = "folio_plugins::process";

/// Poll interval for the exit monitor.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read buffer size for the output forwarder threads.
const CHUNK_SIZE: usize = 4096;

/// An asynchronous notification from the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of standard output.
    Stdout(Vec<u8>),
    /// A chunk of standard error.
    Stderr(Vec<u8>),
    /// Terminal completion. Fires at most once, after all output chunks.
    Exited {
        /// Process exit code, `-1` when unavailable.
        code: i32,
        /// `true` when the process terminated abnormally.
        crashed: bool,
    },
}

/// A running plugin child process and its event channel.
#[derive(Debug)]
pub struct PluginProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    events: Receiver<ProcessEvent>,
    finished: Arc<(Mutex<bool>, Condvar)>,
}

impl PluginProcess {
    /// Spawns the configured command and starts the forwarder threads.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::StartFailure`] when the executable cannot be
    /// spawned or its pipes cannot be captured. This is distinct from a
    /// normal nonzero exit, which arrives as a [`ProcessEvent::Exited`].
    pub fn spawn(command: &mut Command) -> Result<Self, PluginError> {
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|err| PluginError::start_failure("could not spawn interpreter", Some(err)))?;
        let pid = child.id();
        debug!(target: PROCESS_TARGET, pid, "spawned plugin process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::start_failure("failed to capture stdout", None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PluginError::start_failure("failed to capture stderr", None))?;

        let (sender, events) = channel();
        let out_handle = spawn_forwarder(stdout, sender.clone(), ProcessEvent::Stdout);
        let err_handle = spawn_forwarder(stderr, sender.clone(), ProcessEvent::Stderr);

        let child = Arc::new(Mutex::new(child));
        let finished = Arc::new((Mutex::new(false), Condvar::new()));
        spawn_monitor(
            Arc::clone(&child),
            Arc::clone(&finished),
            sender,
            vec![out_handle, err_handle],
        );

        Ok(Self {
            child,
            pid,
            events,
            finished,
        })
    }

    /// Returns the child's process id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.pid
    }

    /// Returns the event channel.
    ///
    /// Events arrive in channel order; [`ProcessEvent::Exited`] is
    /// guaranteed last.
    #[must_use]
    pub const fn events(&self) -> &Receiver<ProcessEvent> {
        &self.events
    }

    /// Returns `true` while the child has not been observed to exit.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let (flag, _) = &*self.finished;
        !*lock_ignoring_poison(flag)
    }

    /// Asks the child to terminate cooperatively.
    ///
    /// On unix this delivers SIGTERM so the interpreter can unwind; on
    /// other platforms it falls back to a hard kill.
    pub fn terminate(&self) {
        debug!(target: PROCESS_TARGET, pid = self.pid, "terminate requested");
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            if let Err(err) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                warn!(target: PROCESS_TARGET, pid = self.pid, %err, "SIGTERM failed");
            }
        }
        #[cfg(not(unix))]
        self.kill();
    }

    /// Force-kills the child.
    pub fn kill(&self) {
        debug!(target: PROCESS_TARGET, pid = self.pid, "kill requested");
        let mut child = lock_ignoring_poison(&self.child);
        if let Err(err) = child.kill() {
            // Already exited is the common case here.
            debug!(target: PROCESS_TARGET, pid = self.pid, %err, "kill returned an error");
        }
    }

    /// Waits up to `timeout` for the child to exit.
    ///
    /// Returns `true` when the child exited within the bound.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, condvar) = &*self.finished;
        let mut done = lock_ignoring_poison(flag);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = condvar
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            done = guard;
        }
        true
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards one pipe to the event channel in fixed-size chunks.
fn spawn_forwarder<R>(
    mut pipe: R,
    sender: Sender<ProcessEvent>,
    wrap: fn(Vec<u8>) -> ProcessEvent,
) -> std::thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buffer = vec![0_u8; CHUNK_SIZE];
        loop {
            match pipe.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = buffer.iter().take(n).copied().collect();
                    if sender.send(wrap(chunk)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Polls for exit, then emits the terminal event after the readers drain.
fn spawn_monitor(
    child: Arc<Mutex<Child>>,
    finished: Arc<(Mutex<bool>, Condvar)>,
    sender: Sender<ProcessEvent>,
    readers: Vec<std::thread::JoinHandle<()>>,
) {
    std::thread::spawn(move || {
        let status = loop {
            let polled = lock_ignoring_poison(&child).try_wait();
            match polled {
                Ok(Some(status)) => break Some(status),
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    warn!(target: PROCESS_TARGET, %err, "wait on plugin process failed");
                    break None;
                }
            }
        };
        // Both pipes hit EOF once the child is gone; join before the
        // terminal event so it is always last.
        for handle in readers {
            drop(handle.join());
        }
        let (code, crashed) = status.map_or((-1, true), |s| (s.code().unwrap_or(-1), s.code().is_none()));
        debug!(target: PROCESS_TARGET, code, crashed, "plugin process exited");
        drop(sender.send(ProcessEvent::Exited { code, crashed }));
        let (flag, condvar) = &*finished;
        *lock_ignoring_poison(flag) = true;
        condvar.notify_all();
    });
}
