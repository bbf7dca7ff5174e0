//! # proberun
//!
//! Probe process supervision for host diagnostics daemons.
//!
//! Spawn an external diagnostic command (or a script-wrapped batch of them),
//! stream its output, observe each exit, restart it under a bounded policy,
//! and tear it down gracefully. The scheduling layer that decides *when* to
//! run a probe, and the parsers that interpret its output, live elsewhere —
//! this crate only manages the process lifecycle and hands back raw output
//! and termination results.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use proberun::{ProbeProcess, Runner, RunnerOptions};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = Runner::new(
//! 	&[vec!["nvidia-smi".into(), "--query".into()]],
//! 	RunnerOptions::default(),
//! )?;
//!
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! runner.start(shutdown_rx).await?;
//!
//! let report = runner.wait().await.expect("report queue closed");
//! if let Some(err) = &report.error {
//! 	eprintln!("probe failed: {err}");
//! }
//!
//! runner.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod output;
pub mod registry;
pub mod restart;
pub mod runner;

pub use error::{BuildError, ControlError, ExitError};
pub use output::OutputReader;
pub use registry::Registry;
pub use restart::RestartPolicy;
pub use runner::{ExitReport, ProbeProcess, Runner, RunnerOptions, STOP_GRACE_PERIOD};
