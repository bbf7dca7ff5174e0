use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::runner::ProbeProcess;

/// Explicit registry of live probe processes, one per logical probe.
///
/// Owned by the scheduling layer and passed by reference to consumers; there
/// is no process-wide shared instance. Replacing a probe means registering a
/// new runner under the same name and stopping the one handed back.
#[derive(Default)]
pub struct Registry {
	entries: RwLock<HashMap<String, Arc<dyn ProbeProcess>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a probe under `name`, returning the previous holder of that
	/// name, if any. The caller is responsible for stopping it.
	pub async fn register(
		&self,
		name: &str,
		probe: Arc<dyn ProbeProcess>,
	) -> Option<Arc<dyn ProbeProcess>> {
		let mut entries = self.entries.write().await;
		entries.insert(name.to_string(), probe)
	}

	pub async fn get(&self, name: &str) -> Option<Arc<dyn ProbeProcess>> {
		let entries = self.entries.read().await;
		entries.get(name).cloned()
	}

	/// Remove and return the probe registered under `name`. The caller is
	/// responsible for stopping it.
	pub async fn deregister(&self, name: &str) -> Option<Arc<dyn ProbeProcess>> {
		let mut entries = self.entries.write().await;
		entries.remove(name)
	}

	pub async fn names(&self) -> Vec<String> {
		let entries = self.entries.read().await;
		let mut names: Vec<String> = entries.keys().cloned().collect();
		names.sort();
		names
	}
}
