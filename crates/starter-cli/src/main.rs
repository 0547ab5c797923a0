use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use starter_core::config::DEFAULT_PATH;
use starter_core::{Config, Orchestrator, Overrides, StdoutSink};
use tokio::sync::watch;

/// Start the applications listed in a configuration file and follow their output.
#[derive(Debug, Parser)]
#[command(name = "starter", version)]
struct Cli {
	/// Configuration file
	#[arg(long, value_name = "FILE", default_value = DEFAULT_PATH)]
	conf: PathBuf,

	/// Print the resolved configuration as JSON and exit
	#[arg(long)]
	print_conf: bool,

	/// Log supervisor events
	#[arg(long)]
	debug: bool,

	/// Colorize log lines
	#[arg(long, value_name = "BOOL")]
	colors: Option<bool>,

	/// Run applications as a chain along their `next` links
	#[arg(long)]
	workflow: bool,

	/// Spawn attempts before giving up
	#[arg(long, value_name = "N")]
	respawns: Option<u32>,

	/// Interrupts sent before a process is killed
	#[arg(long, value_name = "N")]
	interrupts: Option<u32>,

	/// Total spawns per application
	#[arg(long, value_name = "N")]
	max_spawns: Option<u32>,

	/// Applications to select: manual ones to include, or workflow entry points
	apps: Vec<String>,
}

impl Cli {
	fn overrides(&self) -> Overrides {
		Overrides {
			respawns: self.respawns,
			interrupts: self.interrupts,
			max_spawns: self.max_spawns,
			debug: self.debug,
			colors: self.colors,
			workflow: self.workflow,
		}
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let mut config = match Config::load(&cli.conf) {
		Ok(config) => config,
		Err(e) => return fail(e),
	};
	config.apply(&cli.overrides());
	init_tracing(config.debug);

	let resolved = match config.resolve(cli.apps.as_slice()) {
		Ok(resolved) => resolved,
		Err(e) => return fail(e),
	};

	if cli.print_conf {
		return match serde_json::to_string_pretty(&resolved.describe()) {
			Ok(json) => {
				println!("{}", json);
				ExitCode::SUCCESS
			}
			Err(e) => fail(e),
		};
	}

	let (shutdown, stop_rx) = watch::channel(false);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_err() {
			return;
		}
		tracing::info!("interrupted, stopping applications (again to exit now)");
		let _ = shutdown.send(true);
		if tokio::signal::ctrl_c().await.is_ok() {
			std::process::exit(130);
		}
	});

	match Orchestrator::new(resolved, Arc::new(StdoutSink))
		.with_shutdown(stop_rx)
		.run()
		.await
	{
		Ok(summary) => {
			for step in &summary.steps {
				tracing::debug!("{}: {:?}", step.id, step.outcome);
			}
			ExitCode::SUCCESS
		}
		Err(e) => fail(e),
	}
}

fn init_tracing(debug: bool) {
	let level = if debug {
		tracing::Level::DEBUG
	} else {
		tracing::Level::INFO
	};
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(level)
		.init();
}

fn fail(e: impl std::fmt::Display) -> ExitCode {
	eprintln!("error: {}", e);
	ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn cli_definition_is_valid() {
		Cli::command().debug_assert();
	}

	#[test]
	fn flags_become_overrides() {
		let cli = Cli::parse_from([
			"starter",
			"--conf",
			"other.conf",
			"--colors",
			"false",
			"--max-spawns",
			"2",
			"--workflow",
			"build",
			"test",
		]);
		assert_eq!(cli.conf, PathBuf::from("other.conf"));
		assert_eq!(cli.apps, vec!["build", "test"]);
		let o = cli.overrides();
		assert_eq!(o.colors, Some(false));
		assert_eq!(o.max_spawns, Some(2));
		assert_eq!(o.respawns, None);
		assert!(o.workflow);
		assert!(!o.debug);
	}

	#[test]
	fn defaults_to_local_configuration() {
		let cli = Cli::parse_from(["starter"]);
		assert_eq!(cli.conf, PathBuf::from("starter.conf"));
		assert!(cli.apps.is_empty());
		assert!(!cli.print_conf);
	}
}
