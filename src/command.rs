use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::BuildError;

/// Fail-fast prelude written at the top of every generated script: abort on
/// any command error, on unset variables, and on pipeline failures.
const SCRIPT_HEADER: &str = "#!/bin/bash
set -o errexit
set -o nounset
set -o pipefail

";

/// A validated command batch normalized into a single executable invocation.
///
/// Single-command batches run directly. Script-wrapped batches are written
/// into a generated temp script, one command line per line, and the invocation
/// becomes `bash <script>`. The script file stays owned here until the runner
/// tears it down.
pub struct CommandSpec {
	pub argv: Vec<String>,
	pub script: Option<NamedTempFile>,
}

impl CommandSpec {
	pub fn build(commands: &[Vec<String>], script_wrap: bool) -> Result<Self, BuildError> {
		if commands.is_empty() {
			return Err(BuildError::NoCommands);
		}
		if commands.len() > 1 && !script_wrap {
			return Err(BuildError::ScriptRequired);
		}
		for command in commands {
			let leading = command
				.first()
				.and_then(|arg| arg.split_whitespace().next())
				.ok_or(BuildError::NoCommands)?;
			if resolve_executable(leading).is_none() {
				return Err(BuildError::CommandNotFound(leading.to_string()));
			}
		}

		if !script_wrap {
			return Ok(Self {
				argv: commands[0].clone(),
				script: None,
			});
		}

		let mut script = tempfile::Builder::new()
			.prefix("proberun-")
			.suffix(".bash")
			.tempfile()?;
		script.write_all(SCRIPT_HEADER.as_bytes())?;
		for command in commands {
			script.write_all(command.join(" ").as_bytes())?;
			script.write_all(b"\n")?;
		}
		script.flush()?;

		let path = script.path().to_string_lossy().into_owned();
		Ok(Self {
			argv: vec!["bash".to_string(), path],
			script: Some(script),
		})
	}
}

/// `exec.LookPath`-style lookup: names containing a separator are checked
/// directly, everything else is searched on `$PATH`.
pub fn resolve_executable(name: &str) -> Option<PathBuf> {
	if name.contains('/') {
		let path = PathBuf::from(name);
		return is_executable(&path).then_some(path);
	}
	let paths = std::env::var_os("PATH")?;
	std::env::split_paths(&paths)
		.map(|dir| dir.join(name))
		.find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;
	path.metadata()
		.map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_batch_rejected() {
		assert!(matches!(
			CommandSpec::build(&[], false),
			Err(BuildError::NoCommands)
		));
	}

	#[test]
	fn multiple_commands_require_script_wrap() {
		let batch = vec![vec!["echo".to_string()], vec!["echo".to_string()]];
		assert!(matches!(
			CommandSpec::build(&batch, false),
			Err(BuildError::ScriptRequired)
		));
	}

	#[test]
	fn unknown_command_rejected() {
		let batch = vec![vec!["proberun-no-such-binary".to_string()]];
		match CommandSpec::build(&batch, false) {
			Err(BuildError::CommandNotFound(name)) => {
				assert_eq!(name, "proberun-no-such-binary")
			}
			other => panic!("expected CommandNotFound, got {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn leading_token_of_compound_command_is_resolved() {
		// only "echo" has to resolve, the rest is shell syntax
		let batch = vec![vec!["echo hello && proberun-no-such-binary".to_string()]];
		assert!(CommandSpec::build(&batch, true).is_ok());
	}

	#[test]
	fn single_command_runs_directly() {
		let batch = vec![vec!["echo".to_string(), "hello".to_string()]];
		let spec = CommandSpec::build(&batch, false).unwrap();
		assert_eq!(spec.argv, vec!["echo", "hello"]);
		assert!(spec.script.is_none());
	}

	#[test]
	fn script_wrap_writes_header_and_commands() {
		let batch = vec![
			vec!["echo".to_string(), "a".to_string()],
			vec!["echo b".to_string()],
		];
		let spec = CommandSpec::build(&batch, true).unwrap();
		assert_eq!(spec.argv[0], "bash");

		let script = spec.script.as_ref().unwrap();
		let contents = std::fs::read_to_string(script.path()).unwrap();
		assert!(contents.starts_with("#!/bin/bash"));
		assert!(contents.contains("set -o errexit"));
		assert!(contents.contains("set -o nounset"));
		assert!(contents.contains("set -o pipefail"));
		assert!(contents.ends_with("echo a\necho b\n"));
	}

	#[test]
	fn resolve_finds_sh() {
		assert!(resolve_executable("sh").is_some());
		assert!(resolve_executable("/bin/sh").is_some());
		assert!(resolve_executable("proberun-no-such-binary").is_none());
	}
}
