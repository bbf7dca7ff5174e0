use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Restart policy consulted by the watcher after each exit.
///
/// Only abnormal exits are ever restarted; a clean exit is terminal no
/// matter what the policy says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
	/// Restart the probe when it exits with an error.
	pub on_error: bool,
	/// Maximum number of attempts. 0 means unlimited.
	pub limit: u32,
	/// Delay between an exit and the next spawn.
	pub interval: Duration,
}

impl RestartPolicy {
	/// Whether another attempt should follow, given the termination cause of
	/// the attempt that just finished and the number of completed attempts.
	pub fn should_restart(&self, error: Option<&ExitError>, attempts: u32) -> bool {
		self.on_error && error.is_some() && (self.limit == 0 || attempts < self.limit)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy(on_error: bool, limit: u32) -> RestartPolicy {
		RestartPolicy {
			on_error,
			limit,
			interval: Duration::from_millis(10),
		}
	}

	#[test]
	fn clean_exit_never_restarts() {
		assert!(!policy(true, 0).should_restart(None, 1));
	}

	#[test]
	fn disabled_policy_never_restarts() {
		let err = ExitError::NonZero(1);
		assert!(!policy(false, 0).should_restart(Some(&err), 1));
	}

	#[test]
	fn limit_caps_attempts() {
		let err = ExitError::NonZero(1);
		let p = policy(true, 3);
		assert!(p.should_restart(Some(&err), 1));
		assert!(p.should_restart(Some(&err), 2));
		assert!(!p.should_restart(Some(&err), 3));
	}

	#[test]
	fn zero_limit_is_unlimited() {
		let err = ExitError::Signaled(9);
		assert!(policy(true, 0).should_restart(Some(&err), 10_000));
	}
}
