use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// A resolved application, ready to be supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
	pub id: String,
	pub program: String,
	pub args: Vec<String>,
	pub dir: Option<PathBuf>,
	/// Seconds between respawns; 0 selects exponential backoff.
	pub min_wait: u64,
	pub color: String,
	pub stdout_idle: u64,
	pub stderr_idle: u64,
	pub manual: bool,
	pub next: Option<String>,
}

impl Application {
	pub fn min_wait(&self) -> Duration {
		Duration::from_secs(self.min_wait)
	}

	pub fn stdout_idle(&self) -> Option<Duration> {
		idle(self.stdout_idle)
	}

	pub fn stderr_idle(&self) -> Option<Duration> {
		idle(self.stderr_idle)
	}
}

fn idle(secs: u64) -> Option<Duration> {
	(secs > 0).then(|| Duration::from_secs(secs))
}

/// Applications in configuration order, indexed by id.
///
/// Built once before orchestration starts and only read afterwards.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct AppSet {
	apps: Vec<Application>,
	#[serde(skip)]
	index: HashMap<String, usize>,
}

impl AppSet {
	pub fn new(apps: Vec<Application>) -> Result<Self, ConfigError> {
		let mut index = HashMap::with_capacity(apps.len());
		for (i, app) in apps.iter().enumerate() {
			if index.insert(app.id.clone(), i).is_some() {
				return Err(ConfigError::DuplicateId(app.id.clone()));
			}
		}
		Ok(Self { apps, index })
	}

	pub fn len(&self) -> usize {
		self.apps.len()
	}

	pub fn is_empty(&self) -> bool {
		self.apps.is_empty()
	}

	pub fn get(&self, id: &str) -> Option<&Application> {
		self.position(id).map(|i| &self.apps[i])
	}

	pub fn position(&self, id: &str) -> Option<usize> {
		self.index.get(id).copied()
	}

	pub fn at(&self, index: usize) -> &Application {
		&self.apps[index]
	}

	pub fn iter(&self) -> impl Iterator<Item = &Application> {
		self.apps.iter()
	}
}

/// Application ids picked on the command line, in order of first mention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Selection {
	ids: Vec<String>,
}

impl Selection {
	/// Keeps the names that match an application; the rest are warned about.
	pub fn resolve<S: AsRef<str>>(apps: &AppSet, names: &[S]) -> Self {
		let mut ids: Vec<String> = Vec::new();
		for name in names {
			let name = name.as_ref();
			if apps.get(name).is_none() {
				tracing::warn!("invalid application name {:?}", name);
				continue;
			}
			if !ids.iter().any(|id| id == name) {
				ids.push(name.to_string());
			}
		}
		Self { ids }
	}

	pub fn contains(&self, id: &str) -> bool {
		self.ids.iter().any(|s| s == id)
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.ids.iter().map(|s| s.as_str())
	}
}

#[cfg(test)]
pub(crate) fn test_app(id: &str) -> Application {
	Application {
		id: id.to_string(),
		program: "true".into(),
		args: vec![],
		dir: None,
		min_wait: 0,
		color: "off".into(),
		stdout_idle: 0,
		stderr_idle: 0,
		manual: false,
		next: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicate_ids_are_rejected() {
		let err = AppSet::new(vec![test_app("a"), test_app("b"), test_app("a")]).unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateId(id) if id == "a"));
	}

	#[test]
	fn lookup_by_id_and_position() {
		let set = AppSet::new(vec![test_app("a"), test_app("b")]).unwrap();
		assert_eq!(set.len(), 2);
		assert_eq!(set.position("b"), Some(1));
		assert_eq!(set.get("a").map(|a| a.id.as_str()), Some("a"));
		assert!(set.get("c").is_none());
	}

	#[test]
	fn selection_drops_unknown_and_duplicates() {
		let set = AppSet::new(vec![test_app("a"), test_app("b")]).unwrap();
		let sel = Selection::resolve(&set, &["b", "nope", "a", "b"]);
		assert_eq!(sel.iter().collect::<Vec<_>>(), vec!["b", "a"]);
		assert!(sel.contains("a"));
		assert!(!sel.contains("nope"));
	}

	#[test]
	fn zero_idle_means_disabled() {
		let mut app = test_app("a");
		assert_eq!(app.stdout_idle(), None);
		app.stderr_idle = 3;
		assert_eq!(app.stderr_idle(), Some(Duration::from_secs(3)));
	}
}
