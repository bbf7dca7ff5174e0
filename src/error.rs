use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from runner construction. Fatal to the construction attempt;
/// nothing is retried.
#[derive(Debug, Error)]
pub enum BuildError {
	#[error("no commands provided")]
	NoCommands,
	/// More than one command line was given without script mode.
	#[error("cannot run multiple commands without script mode")]
	ScriptRequired,
	#[error("command not found: {0:?}")]
	CommandNotFound(String),
	/// Creating or writing the probe script failed.
	#[error("failed to write probe script: {0}")]
	Io(#[from] std::io::Error),
}

/// Errors from start/stop calls. State errors are caller bugs; the rest are
/// surfaced synchronously and never retried by the runner itself.
#[derive(Debug, Error)]
pub enum ControlError {
	#[error("probe already started")]
	AlreadyStarted,
	#[error("probe not started")]
	NotStarted,
	/// The runner was already torn down; create a new one instead.
	#[error("probe already stopped")]
	Stopped,
	#[error("failed to spawn {command:?}: {source}")]
	Spawn {
		command: String,
		source: std::io::Error,
	},
	#[error("failed to remove probe script: {0}")]
	ScriptCleanup(#[source] std::io::Error),
}

/// Abnormal termination of one attempt. Never returned from a call; always
/// delivered through the exit report queue, once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExitError {
	#[error("exited with status {0}")]
	NonZero(i32),
	/// Killed by a signal, so no exit code was produced.
	#[error("terminated by signal {0}")]
	Signaled(i32),
	#[error("failed to wait for probe: {0}")]
	Wait(String),
}
