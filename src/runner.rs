use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::{ControlError, ExitError};
use crate::output::OutputReader;
use crate::restart::RestartPolicy;

/// How long `stop` waits between SIGTERM and SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Outcome of one attempt, published on the exit report queue exactly once
/// per attempt, in attempt order. `error: None` is a clean exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReport {
	pub attempt: u32,
	pub error: Option<ExitError>,
}

impl ExitReport {
	pub fn is_clean(&self) -> bool {
		self.error.is_none()
	}
}

/// Configuration for a [`Runner`].
#[derive(Default)]
pub struct RunnerOptions {
	/// Extra NAME=VALUE pairs set on the child, in order, on top of the
	/// inherited environment.
	pub envs: Vec<(String, String)>,
	/// Sink mode: redirect both stdout and stderr into this file instead of
	/// exposing pipe readers.
	pub output_sink: Option<std::fs::File>,
	/// Wrap the batch in a generated fail-fast shell script. Required when
	/// more than one command line is given.
	pub script_wrap: bool,
	pub restart: Option<RestartPolicy>,
}

/// The runnable-probe contract consumed by the scheduling layer. One
/// concrete implementation: [`Runner`].
#[async_trait]
pub trait ProbeProcess: Send + Sync {
	/// Spawn the probe and launch its watcher task. Non-blocking. The
	/// `shutdown` receiver is the parent lifecycle: flipping it to `true`
	/// suppresses automatic restarts the same way `stop` does.
	async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<(), ControlError>;

	/// Graceful teardown: cancel the lifecycle, SIGTERM the process group,
	/// escalate to SIGKILL after [`STOP_GRACE_PERIOD`], delete the script
	/// file. Safe to call more than once.
	async fn stop(&self) -> Result<(), ControlError>;

	/// Receive the next exit report. One report is published per attempt;
	/// callers read in a loop for as long as they want to observe restarts.
	async fn wait(&self) -> Option<ExitReport>;

	/// Lock-free read of the last recorded PID; 0 before the first spawn.
	fn pid(&self) -> u32;

	/// The probe's stdout. In pipe mode this transfers the current pipe to
	/// the caller; a restart installs a fresh one.
	async fn stdout_reader(&self) -> Option<OutputReader>;

	/// The probe's stderr. Same ownership rules as [`Self::stdout_reader`].
	async fn stderr_reader(&self) -> Option<OutputReader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	Running,
	Stopped,
}

struct State {
	phase: Phase,
	cancel: Option<watch::Sender<bool>>,
	done: Option<watch::Receiver<bool>>,
	stdout: Option<tokio::process::ChildStdout>,
	stderr: Option<tokio::process::ChildStderr>,
}

struct Shared {
	argv: Vec<String>,
	envs: Vec<(String, String)>,
	sink: Option<std::fs::File>,
	restart: Option<RestartPolicy>,

	pid: AtomicU32,
	state: RwLock<State>,
	report_tx: mpsc::Sender<ExitReport>,
	report_rx: Mutex<mpsc::Receiver<ExitReport>>,
	script: std::sync::Mutex<Option<NamedTempFile>>,
}

/// Supervises one external probe command (or script-wrapped batch): spawn,
/// stream output, detect exit, restart under a bounded policy, tear down.
/// At most one live OS process per runner at any instant.
pub struct Runner {
	shared: Arc<Shared>,
}

impl Runner {
	/// Validate the command batch and build a runner. The batch is not
	/// executed until [`ProbeProcess::start`].
	pub fn new(
		commands: &[Vec<String>],
		opts: RunnerOptions,
	) -> Result<Self, crate::error::BuildError> {
		let spec = CommandSpec::build(commands, opts.script_wrap)?;

		// Sized so a caller that drains the queue once per attempt never
		// blocks the watcher.
		let capacity = match &opts.restart {
			Some(policy) if policy.on_error && policy.limit > 0 => policy.limit as usize,
			_ => 1,
		};
		let (report_tx, report_rx) = mpsc::channel(capacity);

		Ok(Self {
			shared: Arc::new(Shared {
				argv: spec.argv,
				envs: opts.envs,
				sink: opts.output_sink,
				restart: opts.restart,
				pid: AtomicU32::new(0),
				state: RwLock::new(State {
					phase: Phase::Idle,
					cancel: None,
					done: None,
					stdout: None,
					stderr: None,
				}),
				report_tx,
				report_rx: Mutex::new(report_rx),
				script: std::sync::Mutex::new(spec.script),
			}),
		})
	}

	/// Path of the generated script file, while one exists. `None` in
	/// direct mode and after `stop` has deleted it.
	pub fn script_path(&self) -> Option<std::path::PathBuf> {
		self.shared
			.script
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.as_ref()
			.map(|script| script.path().to_path_buf())
	}
}

#[async_trait]
impl ProbeProcess for Runner {
	async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<(), ControlError> {
		let shared = Arc::clone(&self.shared);
		let mut state = shared.state.write().await;
		match state.phase {
			Phase::Running => return Err(ControlError::AlreadyStarted),
			Phase::Stopped => return Err(ControlError::Stopped),
			Phase::Idle => {}
		}

		let child = shared.spawn_attempt(&mut state)?;

		let (cancel_tx, cancel_rx) = watch::channel(false);
		let (done_tx, done_rx) = watch::channel(false);
		state.phase = Phase::Running;
		state.cancel = Some(cancel_tx);
		state.done = Some(done_rx);
		drop(state);

		let watcher = Arc::clone(&self.shared);
		tokio::spawn(async move {
			watcher.watch(child, cancel_rx, shutdown).await;
			let _ = done_tx.send(true);
		});

		Ok(())
	}

	async fn stop(&self) -> Result<(), ControlError> {
		let shared = &self.shared;
		let mut state = shared.state.write().await;
		match state.phase {
			Phase::Idle => return Err(ControlError::NotStarted),
			Phase::Stopped => return Ok(()),
			Phase::Running => {}
		}

		if let Some(cancel) = state.cancel.take() {
			let _ = cancel.send(true);
		}

		let pid = shared.pid.load(Ordering::SeqCst);
		let mut finished = pid == 0;
		if !finished {
			match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
				Ok(()) => {}
				Err(Errno::ESRCH) => finished = true,
				Err(err) => warn!(pid, error = %err, "failed to send SIGTERM to probe"),
			}
		}

		if !finished {
			if let Some(mut done) = state.done.take() {
				let graceful = tokio::time::timeout(STOP_GRACE_PERIOD, async {
					while !*done.borrow() {
						if done.changed().await.is_err() {
							break;
						}
					}
				})
				.await;

				if graceful.is_err() {
					debug!(pid, "probe did not exit within grace period, sending SIGKILL");
					match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
						Ok(()) | Err(Errno::ESRCH) => {}
						Err(err) => {
							warn!(pid, error = %err, "failed to send SIGKILL to probe")
						}
					}
				}
			}
		}

		state.phase = Phase::Stopped;
		state.done = None;
		state.stdout = None;
		state.stderr = None;
		drop(state);

		let script = shared
			.script
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.take();
		if let Some(script) = script {
			script.close().map_err(ControlError::ScriptCleanup)?;
		}

		Ok(())
	}

	async fn wait(&self) -> Option<ExitReport> {
		let mut rx = self.shared.report_rx.lock().await;
		rx.recv().await
	}

	fn pid(&self) -> u32 {
		self.shared.pid.load(Ordering::SeqCst)
	}

	async fn stdout_reader(&self) -> Option<OutputReader> {
		if let Some(sink) = &self.shared.sink {
			return sink
				.try_clone()
				.ok()
				.map(|file| OutputReader::Sink(tokio::fs::File::from_std(file)));
		}
		let mut state = self.shared.state.write().await;
		state.stdout.take().map(OutputReader::Stdout)
	}

	async fn stderr_reader(&self) -> Option<OutputReader> {
		if let Some(sink) = &self.shared.sink {
			return sink
				.try_clone()
				.ok()
				.map(|file| OutputReader::Sink(tokio::fs::File::from_std(file)));
		}
		let mut state = self.shared.state.write().await;
		state.stderr.take().map(OutputReader::Stderr)
	}
}

impl Shared {
	/// Spawn one attempt from the resolved argv. In sink mode both output
	/// streams go to the sink file; otherwise fresh pipes are retained on
	/// the handle. The PID is recorded once the OS accepts the spawn.
	fn spawn_attempt(&self, state: &mut State) -> Result<Child, ControlError> {
		debug!(command = ?self.argv, "starting probe");

		let mut cmd = Command::new(&self.argv[0]);
		cmd.args(&self.argv[1..]);
		for (name, value) in &self.envs {
			cmd.env(name, value);
		}
		// own process group, so stop can signal the whole tree
		cmd.process_group(0);

		match &self.sink {
			Some(sink) => {
				let stdout = sink.try_clone().map_err(|err| self.spawn_error(err))?;
				let stderr = sink.try_clone().map_err(|err| self.spawn_error(err))?;
				cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
			}
			None => {
				cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
			}
		}

		let mut child = cmd.spawn().map_err(|err| self.spawn_error(err))?;
		state.stdout = child.stdout.take();
		state.stderr = child.stderr.take();
		self.pid.store(child.id().unwrap_or(0), Ordering::SeqCst);

		Ok(child)
	}

	fn spawn_error(&self, source: std::io::Error) -> ControlError {
		ControlError::Spawn {
			command: self.argv[0].clone(),
			source,
		}
	}

	/// Watcher loop: one iteration per attempt. Blocks on process exit,
	/// publishes the report, then either stops or restarts under the policy,
	/// racing the restart interval against cancellation.
	async fn watch(
		self: Arc<Self>,
		mut child: Child,
		mut cancel: watch::Receiver<bool>,
		mut shutdown: watch::Receiver<bool>,
	) {
		let mut attempts: u32 = 0;
		loop {
			let status = child.wait().await;
			attempts += 1;

			let error = match status {
				Ok(status) if status.success() => None,
				Ok(status) => Some(self.classify(status, &cancel, &shutdown)),
				Err(err) => {
					warn!(error = %err, "failed to wait for probe");
					Some(ExitError::Wait(err.to_string()))
				}
			};

			let report = ExitReport {
				attempt: attempts,
				error: error.clone(),
			};
			if self.report_tx.send(report).await.is_err() {
				return;
			}

			let Some(error) = error else {
				debug!(attempts, "probe exited cleanly");
				return;
			};

			match &self.restart {
				Some(policy) if policy.should_restart(Some(&error), attempts) => {}
				Some(_) => {
					warn!(error = %error, attempts, "probe exited with error, not restarting");
					return;
				}
				None => {
					warn!(error = %error, "probe exited with error");
					return;
				}
			}

			let interval = self.restart.as_ref().map(|p| p.interval).unwrap_or_default();
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = flagged(&mut cancel) => return,
				_ = flagged(&mut shutdown) => return,
			}

			{
				let mut state = self.state.write().await;
				// stop may have raced us to the lock
				if *cancel.borrow() || *shutdown.borrow() {
					return;
				}
				child = match self.spawn_attempt(&mut state) {
					Ok(next) => next,
					Err(err) => {
						warn!(error = %err, "failed to restart probe");
						return;
					}
				};
			}
			debug!(
				pid = self.pid.load(Ordering::SeqCst),
				attempts, "probe restarted"
			);
		}
	}

	/// Distinguish signal-death during an intentional shutdown from an
	/// unexpected external kill. Affects only the log level, never control
	/// flow.
	fn classify(
		&self,
		status: std::process::ExitStatus,
		cancel: &watch::Receiver<bool>,
		shutdown: &watch::Receiver<bool>,
	) -> ExitError {
		use std::os::unix::process::ExitStatusExt;
		match status.code() {
			Some(code) => {
				warn!(command = ?self.argv, code, "probe exited with non-zero status");
				ExitError::NonZero(code)
			}
			None => {
				let signal = status.signal().unwrap_or(0);
				if *cancel.borrow() || *shutdown.borrow() {
					debug!(command = ?self.argv, signal, "probe terminated during shutdown");
				} else {
					warn!(command = ?self.argv, signal, "probe terminated for unknown reasons");
				}
				ExitError::Signaled(signal)
			}
		}
	}
}

/// Resolves once the watch value turns true. Pends forever if the sender is
/// dropped while the value is still false.
async fn flagged(rx: &mut watch::Receiver<bool>) {
	loop {
		if *rx.borrow() {
			return;
		}
		if rx.changed().await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}
