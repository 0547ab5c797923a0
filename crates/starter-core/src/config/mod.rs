pub mod expand;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::app::{AppSet, Application, Selection};
use crate::color::{self, Palette};
use crate::error::ConfigError;
use crate::orchestrator::Mode;
pub use expand::Environment;

pub const DEFAULT_PATH: &str = "starter.conf";

/// The configuration file as written.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
	#[serde(default = "default_attempts")]
	pub respawns: u32,
	#[serde(default = "default_attempts")]
	pub interrupts: u32,
	#[serde(default = "default_attempts")]
	pub max_spawns: u32,
	#[serde(default)]
	pub debug: bool,
	#[serde(default = "default_true")]
	pub colors: bool,
	#[serde(default)]
	pub workflow: bool,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	#[serde(default)]
	pub patterns: BTreeMap<String, String>,
	#[serde(default, rename = "application")]
	pub applications: Vec<ApplicationDef>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			respawns: default_attempts(),
			interrupts: default_attempts(),
			max_spawns: default_attempts(),
			debug: false,
			colors: true,
			workflow: false,
			env: BTreeMap::new(),
			patterns: BTreeMap::new(),
			applications: Vec::new(),
		}
	}
}

fn default_attempts() -> u32 {
	10
}
fn default_true() -> bool {
	true
}

/// One `[[application]]` entry before expansion.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationDef {
	pub id: Option<String>,
	pub program: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	pub dir: Option<String>,
	#[serde(default)]
	pub min_wait: u64,
	#[serde(default)]
	pub color: String,
	#[serde(default)]
	pub stdout_idle: u64,
	#[serde(default)]
	pub stderr_idle: u64,
	#[serde(default)]
	pub manual: bool,
	pub next: Option<String>,
	pub count: Option<u32>,
}

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub respawns: Option<u32>,
	pub interrupts: Option<u32>,
	pub max_spawns: Option<u32>,
	pub debug: bool,
	pub colors: Option<bool>,
	pub workflow: bool,
}

/// Global knobs after overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
	pub respawns: u32,
	pub interrupts: u32,
	pub max_spawns: u32,
	pub debug: bool,
	pub colors: bool,
	pub workflow: bool,
}

impl Settings {
	pub fn mode(&self) -> Mode {
		if self.workflow {
			Mode::Workflow
		} else {
			Mode::FanOut
		}
	}
}

impl Config {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(content)
	}

	pub fn apply(&mut self, overrides: &Overrides) {
		if let Some(n) = overrides.respawns {
			self.respawns = n;
		}
		if let Some(n) = overrides.interrupts {
			self.interrupts = n;
		}
		if let Some(n) = overrides.max_spawns {
			self.max_spawns = n;
		}
		if let Some(colors) = overrides.colors {
			self.colors = colors;
		}
		self.debug |= overrides.debug;
		self.workflow |= overrides.workflow;
	}

	pub fn settings(&self) -> Settings {
		Settings {
			respawns: self.respawns,
			interrupts: self.interrupts,
			max_spawns: self.max_spawns,
			debug: self.debug,
			colors: self.colors,
			workflow: self.workflow,
		}
	}

	/// Expands templates and environment placeholders, resolves colors and the
	/// command-line selection.
	pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Resolved, ConfigError> {
		let env = Environment::from_table(&self.env);
		let mut apps = Vec::with_capacity(self.applications.len());

		for (index, def) in self.applications.iter().enumerate() {
			let id = match def.id.as_deref().map(str::trim) {
				Some(id) if !id.is_empty() => id.to_string(),
				_ => format!("app-{}", index),
			};
			let ids = match def.count {
				None => vec![id],
				Some(0) => return Err(ConfigError::ZeroCount(id)),
				Some(n) => (0..n).map(|i| instance_id(&id, i)).collect(),
			};
			for id in ids {
				apps.push(concrete(def, index, id, &env)?);
			}
		}

		if apps.is_empty() {
			return Err(ConfigError::NoApplications);
		}

		let apps = AppSet::new(apps)?;
		let palette = Palette::new(&apps, &self.patterns)?;
		let selection = Selection::resolve(&apps, names);

		Ok(Resolved {
			settings: self.settings(),
			apps,
			selection,
			palette,
			patterns: self.patterns.clone(),
			env,
		})
	}
}

fn instance_id(id: &str, n: u32) -> String {
	if id.contains("{n}") {
		id.replace("{n}", &n.to_string())
	} else {
		format!("{}-{}", id, n)
	}
}

/// Builds one instance of `def`. Every instance of a template gets the same
/// fields apart from its id, so `auto` is picked by definition `index`.
fn concrete(
	def: &ApplicationDef,
	index: usize,
	id: String,
	env: &Environment,
) -> Result<Application, ConfigError> {
	let program = match def.program.as_deref().map(|p| env.expand(p)) {
		Some(p) if !p.trim().is_empty() => p,
		_ => return Err(ConfigError::MissingProgram(id)),
	};
	let dir = def
		.dir
		.as_deref()
		.map(|d| env.expand(d))
		.filter(|d| !d.is_empty())
		.map(PathBuf::from);
	let next = def
		.next
		.as_deref()
		.map(str::trim)
		.filter(|n| !n.is_empty())
		.map(str::to_string);
	let color = match env.expand(&def.color) {
		c if c.trim().is_empty() => color::OFF.to_string(),
		c if c == color::AUTO => color::auto_color(index).to_string(),
		c => c,
	};

	Ok(Application {
		id,
		program,
		args: def.args.iter().map(|a| env.expand(a)).collect(),
		dir,
		min_wait: def.min_wait,
		color,
		stdout_idle: def.stdout_idle,
		stderr_idle: def.stderr_idle,
		manual: def.manual,
		next,
	})
}

/// Everything the orchestrator needs, validated.
#[derive(Debug, Clone)]
pub struct Resolved {
	pub settings: Settings,
	pub apps: AppSet,
	pub selection: Selection,
	pub palette: Palette,
	pub patterns: BTreeMap<String, String>,
	pub env: Environment,
}

impl Resolved {
	/// JSON view used by `--print-conf`.
	pub fn describe(&self) -> serde_json::Value {
		let env: BTreeMap<&str, &str> = self
			.env
			.vars()
			.iter()
			.map(|(k, v)| (k.as_str(), v.as_str()))
			.collect();
		serde_json::json!({
			"settings": self.settings,
			"env": env,
			"patterns": self.patterns,
			"applications": self.apps,
			"selection": self.selection,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
respawns = 3
max-spawns = 2
workflow = true

[env]
STARTER_TEST_PORT = "8123"

[patterns]
red = "ERROR"

[[application]]
id = "web"
program = "python3"
args = ["-m", "http.server", "${STARTER_TEST_PORT}"]
color = "green"
next = "check"

[[application]]
id = "check"
program = "curl"
args = ["localhost:$STARTER_TEST_PORT"]
manual = true
"#;

	#[test]
	fn defaults_apply_to_missing_keys() {
		let config = Config::parse("").unwrap();
		assert_eq!(config.respawns, 10);
		assert_eq!(config.interrupts, 10);
		assert_eq!(config.max_spawns, 10);
		assert!(config.colors);
		assert!(!config.debug);
		assert!(!config.workflow);
		assert!(config.applications.is_empty());
	}

	#[test]
	fn parses_kebab_case_file() {
		let config = Config::parse(SAMPLE).unwrap();
		assert_eq!(config.respawns, 3);
		assert_eq!(config.max_spawns, 2);
		assert!(config.workflow);
		assert_eq!(config.applications.len(), 2);
		assert!(config.applications[1].manual);

		let resolved = config.resolve::<&str>(&[]).unwrap();
		assert_eq!(resolved.settings.mode(), Mode::Workflow);
		let web = resolved.apps.get("web").unwrap();
		assert_eq!(web.args, vec!["-m", "http.server", "8123"]);
		assert_eq!(web.next.as_deref(), Some("check"));
		assert_eq!(resolved.apps.get("check").unwrap().args, vec!["localhost:8123"]);
		assert_eq!(resolved.env.vars(), &[("STARTER_TEST_PORT".to_string(), "8123".to_string())]);
	}

	#[test]
	fn overrides_win_over_file() {
		let mut config = Config::parse(SAMPLE).unwrap();
		config.apply(&Overrides {
			respawns: Some(7),
			colors: Some(false),
			debug: true,
			..Default::default()
		});
		let settings = config.settings();
		assert_eq!(settings.respawns, 7);
		assert_eq!(settings.max_spawns, 2);
		assert!(!settings.colors);
		assert!(settings.debug);
		assert!(settings.workflow);
	}

	#[test]
	fn template_expands_into_identical_copies() {
		let config = Config::parse(
			r#"
[[application]]
id = "worker"
program = "sleep"
args = ["1"]
color = "cyan"
count = 3
"#,
		)
		.unwrap();
		let resolved = config.resolve::<&str>(&[]).unwrap();
		let ids: Vec<_> = resolved.apps.iter().map(|a| a.id.as_str()).collect();
		assert_eq!(ids, vec!["worker-0", "worker-1", "worker-2"]);
		let mut first = resolved.apps.at(0).clone();
		first.id.clear();
		for app in resolved.apps.iter() {
			let mut normalized = app.clone();
			normalized.id.clear();
			assert_eq!(normalized, first);
		}
	}

	#[test]
	fn template_copies_share_auto_color() {
		let config = Config::parse(
			r#"
[[application]]
id = "first"
program = "true"
color = "auto"

[[application]]
id = "worker"
program = "true"
color = "auto"
count = 3
"#,
		)
		.unwrap();
		let resolved = config.resolve::<&str>(&[]).unwrap();
		let colors: Vec<_> = resolved.apps.iter().map(|a| a.color.as_str()).collect();
		let shared = color::auto_color(1);
		assert_eq!(colors, vec![color::auto_color(0), shared, shared, shared]);
	}

	#[test]
	fn template_placeholder_is_substituted() {
		let config = Config::parse(
			r#"
[[application]]
id = "shard{n}-db"
program = "true"
count = 2
"#,
		)
		.unwrap();
		let resolved = config.resolve::<&str>(&[]).unwrap();
		let ids: Vec<_> = resolved.apps.iter().map(|a| a.id.as_str()).collect();
		assert_eq!(ids, vec!["shard0-db", "shard1-db"]);
	}

	#[test]
	fn zero_count_is_rejected() {
		let config = Config::parse("[[application]]\nid = \"w\"\nprogram = \"true\"\ncount = 0\n").unwrap();
		assert!(matches!(config.resolve::<&str>(&[]), Err(ConfigError::ZeroCount(id)) if id == "w"));
	}

	#[test]
	fn missing_ids_are_generated_from_position() {
		let config = Config::parse("[[application]]\nprogram = \"a\"\n\n[[application]]\nprogram = \"b\"\n").unwrap();
		let resolved = config.resolve::<&str>(&[]).unwrap();
		let ids: Vec<_> = resolved.apps.iter().map(|a| a.id.as_str()).collect();
		assert_eq!(ids, vec!["app-0", "app-1"]);
	}

	#[test]
	fn resolution_errors() {
		assert!(matches!(
			Config::parse("").unwrap().resolve::<&str>(&[]),
			Err(ConfigError::NoApplications)
		));
		assert!(matches!(
			Config::parse("[[application]]\nid = \"x\"\n").unwrap().resolve::<&str>(&[]),
			Err(ConfigError::MissingProgram(id)) if id == "x"
		));
		assert!(matches!(
			Config::parse("[[application]]\nid = \"x\"\nprogram = \"a\"\n[[application]]\nid = \"x\"\nprogram = \"b\"\n")
				.unwrap()
				.resolve::<&str>(&[]),
			Err(ConfigError::DuplicateId(id)) if id == "x"
		));
		assert!(matches!(
			Config::parse("[[application]]\nid = \"x\"\nprogram = \"a\"\ncolor = \"mauve\"\n")
				.unwrap()
				.resolve::<&str>(&[]),
			Err(ConfigError::InvalidColor { .. })
		));
	}

	#[test]
	fn colors_are_resolved() {
		let config = Config::parse(
			"[[application]]\nid = \"a\"\nprogram = \"x\"\ncolor = \"auto\"\n\n[[application]]\nid = \"b\"\nprogram = \"x\"\ncolor = \"auto\"\n\n[[application]]\nid = \"c\"\nprogram = \"x\"\n",
		)
		.unwrap();
		let resolved = config.resolve::<&str>(&[]).unwrap();
		assert_eq!(resolved.apps.get("a").unwrap().color, color::auto_color(0));
		assert_eq!(resolved.apps.get("b").unwrap().color, color::auto_color(1));
		assert_eq!(resolved.apps.get("c").unwrap().color, color::OFF);
	}

	#[test]
	fn unreadable_file_is_reported_with_path() {
		let path = std::env::temp_dir().join("starter-config-does-not-exist.conf");
		let err = Config::load(&path).unwrap_err();
		assert!(matches!(err, ConfigError::Read { .. }));
		assert!(err.to_string().contains("starter-config-does-not-exist.conf"));
	}

	#[test]
	fn describe_lists_applications_and_selection() {
		let config = Config::parse(SAMPLE).unwrap();
		let resolved = config.resolve(&["check", "bogus"]).unwrap();
		let json = resolved.describe();
		assert_eq!(json["settings"]["respawns"], 3);
		assert_eq!(json["applications"][0]["id"], "web");
		assert_eq!(json["selection"], serde_json::json!(["check"]));
		assert_eq!(json["patterns"]["red"], "ERROR");
		assert_eq!(json["env"]["STARTER_TEST_PORT"], "8123");
	}
}
