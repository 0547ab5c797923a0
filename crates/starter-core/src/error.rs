use std::path::PathBuf;
use starter_supervise::RunError;
use thiserror::Error;

/// Problems found while loading or resolving the configuration.
///
/// All of them abort the run before any process is started.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("no applications to run")]
	NoApplications,

	#[error("duplicate application id {0:?}")]
	DuplicateId(String),

	#[error("{0}: no program")]
	MissingProgram(String),

	#[error("{0}: count must be at least 1")]
	ZeroCount(String),

	#[error("{id}: invalid color {token:?}")]
	InvalidColor { id: String, token: String },

	#[error("invalid pattern for color {color:?}: {source}")]
	InvalidPattern {
		color: String,
		#[source]
		source: regex::Error,
	},
}

/// Reasons a workflow chain stopped before reaching its last step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
	#[error("{id}: step terminated with error {error}: stop workflow")]
	StepFailed { id: String, error: RunError },

	#[error("{id}: invalid next application {next:?}")]
	UnknownNext { id: String, next: String },
}
