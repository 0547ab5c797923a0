use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use starter_supervise::{supervise, Options, Process, RunError, Stream};

use crate::app::{AppSet, Application, Selection};
use crate::backoff::BackoffPolicy;
use crate::config::{Environment, Resolved, Settings};
use crate::error::{ChainError, ConfigError};
use crate::outstanding::{Outstanding, Slot};
use crate::router::{LineSink, LogRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	/// Every eligible application runs on its own; `next` is ignored.
	FanOut,
	/// Applications run one after another along their `next` links.
	Workflow,
}

/// Indices of the applications started first.
pub fn startup_set(apps: &AppSet, selection: &Selection, mode: Mode) -> Vec<usize> {
	match mode {
		Mode::FanOut => apps
			.iter()
			.enumerate()
			.filter(|(_, app)| !app.manual || selection.contains(&app.id))
			.map(|(i, _)| i)
			.collect(),
		Mode::Workflow if selection.is_empty() => {
			if apps.is_empty() {
				Vec::new()
			} else {
				vec![0]
			}
		}
		Mode::Workflow => selection.iter().filter_map(|id| apps.position(id)).collect(),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	Chain(usize),
	Done,
}

/// What follows a finished workflow step.
pub fn transition(
	apps: &AppSet,
	app: &Application,
	last_error: Option<&RunError>,
) -> Result<Transition, ChainError> {
	let Some(next) = app.next.as_deref() else {
		return Ok(Transition::Done);
	};
	if let Some(error) = last_error {
		return Err(ChainError::StepFailed {
			id: app.id.clone(),
			error: error.clone(),
		});
	}
	apps.position(next)
		.map(Transition::Chain)
		.ok_or_else(|| ChainError::UnknownNext {
			id: app.id.clone(),
			next: next.to_string(),
		})
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
	StartFailed(String),
	Completed,
	Failed(RunError),
	/// Ended by a shutdown request.
	Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
	pub id: String,
	pub outcome: StepOutcome,
}

/// Every step in start order, plus the reasons chains ended early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub steps: Vec<StepRecord>,
	pub chain_errors: Vec<ChainError>,
}

impl RunSummary {
	pub fn started(&self) -> usize {
		self.steps
			.iter()
			.filter(|s| !matches!(s.outcome, StepOutcome::StartFailed(_)))
			.count()
	}

	pub fn outcomes(&self, id: &str) -> Vec<&StepOutcome> {
		self.steps
			.iter()
			.filter(|s| s.id == id)
			.map(|s| &s.outcome)
			.collect()
	}
}

pub struct Orchestrator {
	resolved: Resolved,
	sink: Arc<dyn LineSink>,
	shutdown: watch::Receiver<bool>,
	_idle_shutdown: Option<watch::Sender<bool>>,
}

impl Orchestrator {
	pub fn new(resolved: Resolved, sink: Arc<dyn LineSink>) -> Self {
		let (tx, rx) = watch::channel(false);
		Self {
			resolved,
			sink,
			shutdown: rx,
			_idle_shutdown: Some(tx),
		}
	}

	/// Once `true` is sent, running applications are stopped and no chain
	/// advances.
	pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
		self.shutdown = shutdown;
		self._idle_shutdown = None;
		self
	}

	/// Runs until every started application and chain has finished.
	pub async fn run(self) -> Result<RunSummary, ConfigError> {
		let Resolved {
			settings,
			apps,
			selection,
			palette,
			env,
			..
		} = self.resolved;
		if apps.is_empty() {
			return Err(ConfigError::NoApplications);
		}

		let mode = settings.mode();
		let entries = startup_set(&apps, &selection, mode);
		tracing::debug!("starting {} of {} applications ({:?})", entries.len(), apps.len(), mode);

		let shared = Arc::new(Shared {
			router: LogRouter::new(Arc::new(palette), settings.colors, self.sink),
			apps,
			settings,
			mode,
			env,
			work: Outstanding::new(),
			shutdown: self.shutdown,
			steps: Mutex::new(Vec::new()),
			chain_errors: Mutex::new(Vec::new()),
		});

		for index in entries {
			if let Some(step) = shared.start(index) {
				let slot = shared.work.acquire();
				tokio::spawn(Arc::clone(&shared).drive(index, step, slot));
			}
		}

		shared.work.wait_idle().await;
		Ok(shared.summary())
	}
}

struct Step {
	process: Process,
	record: usize,
}

struct Shared {
	apps: AppSet,
	settings: Settings,
	mode: Mode,
	env: Environment,
	router: LogRouter,
	work: Outstanding,
	shutdown: watch::Receiver<bool>,
	steps: Mutex<Vec<(String, Option<StepOutcome>)>>,
	chain_errors: Mutex<Vec<ChainError>>,
}

impl Shared {
	fn options(&self, app: &Application) -> Options {
		Options {
			args: app.args.clone(),
			dir: app.dir.clone(),
			env: self.env.vars().to_vec(),
			id: app.id.clone(),
			spawn_attempts: self.settings.respawns,
			attempts_before_terminate: self.settings.interrupts,
			stop_on_success: self.mode == Mode::Workflow,
			max_spawns: self.settings.max_spawns,
			stdout_idle: app.stdout_idle(),
			stderr_idle: app.stderr_idle(),
			delay_between_spawns: BackoffPolicy::from_min_wait(app.min_wait()).into_delay_fn(),
			..Options::default()
		}
	}

	fn start(&self, index: usize) -> Option<Step> {
		let app = self.apps.at(index);
		match supervise(&app.program, self.options(app)) {
			Ok(process) => {
				tracing::debug!("{}: started {}", app.id, app.program);
				let record = self.record(&app.id, None);
				Some(Step { process, record })
			}
			Err(e) => {
				tracing::error!("{}: failed to start: {}", app.id, e);
				self.record(&app.id, Some(StepOutcome::StartFailed(e.to_string())));
				None
			}
		}
	}

	/// Follows one chain from `index` until it ends. The slot is swapped for
	/// the successor's before it is released.
	async fn drive(self: Arc<Self>, mut index: usize, mut step: Step, mut slot: Slot) {
		loop {
			let app = self.apps.at(index);
			let last_error = self.read(&mut step.process).await;
			let stopped = self.shutdown_requested();
			self.finish(step.record, outcome(last_error.as_ref(), stopped));

			if self.mode != Mode::Workflow || stopped {
				break;
			}
			match transition(&self.apps, app, last_error.as_ref()) {
				Ok(Transition::Done) => break,
				Ok(Transition::Chain(next)) => {
					tracing::debug!("{}: chaining to {}", app.id, self.apps.at(next).id);
					let Some(successor) = self.start(next) else {
						break;
					};
					slot = self.work.acquire_replacing(slot);
					step = successor;
					index = next;
				}
				Err(e) => {
					match &e {
						ChainError::StepFailed { error, .. } => self.router.note(
							&app.id,
							&format!("step terminated with error {}: stop workflow", error),
						),
						ChainError::UnknownNext { .. } => tracing::error!("{}", e),
					}
					self.chain_error(e);
					break;
				}
			}
		}
		drop(slot);
	}

	/// Routes everything the process prints until supervision is over.
	async fn read(&self, process: &mut Process) -> Option<RunError> {
		let id = process.id.clone();
		let mut shutdown = self.shutdown.clone();
		let mut watching = true;
		let mut stdout_open = true;
		let mut stderr_open = true;
		let mut events_open = true;

		if *shutdown.borrow_and_update() {
			process.stop();
			watching = false;
		}

		loop {
			tokio::select! {
				line = process.stdout.recv(), if stdout_open => match line {
					Some(line) => self.router.output(&id, Stream::Stdout, &line),
					None => stdout_open = false,
				},
				line = process.stderr.recv(), if stderr_open => match line {
					Some(line) => self.router.output(&id, Stream::Stderr, &line),
					None => stderr_open = false,
				},
				event = process.events.recv(), if events_open => match event {
					Some(event) if self.settings.debug => self.router.event(&id, &event),
					Some(_) => {}
					None => events_open = false,
				},
				changed = shutdown.changed(), if watching => {
					if changed.is_err() {
						watching = false;
					} else if *shutdown.borrow() {
						tracing::info!("{}: stopping", id);
						process.stop();
						watching = false;
					}
				}
				_ = &mut process.done => break,
			}
		}

		while let Ok(line) = process.stdout.try_recv() {
			self.router.output(&id, Stream::Stdout, &line);
		}
		while let Ok(line) = process.stderr.try_recv() {
			self.router.output(&id, Stream::Stderr, &line);
		}
		while let Ok(event) = process.events.try_recv() {
			if self.settings.debug {
				self.router.event(&id, &event);
			}
		}

		self.router.note(&id, "DONE");
		process.last_error()
	}

	fn shutdown_requested(&self) -> bool {
		*self.shutdown.borrow()
	}

	fn record(&self, id: &str, outcome: Option<StepOutcome>) -> usize {
		let mut steps = match self.steps.lock() {
			Ok(steps) => steps,
			Err(poisoned) => poisoned.into_inner(),
		};
		steps.push((id.to_string(), outcome));
		steps.len() - 1
	}

	fn finish(&self, record: usize, outcome: StepOutcome) {
		let mut steps = match self.steps.lock() {
			Ok(steps) => steps,
			Err(poisoned) => poisoned.into_inner(),
		};
		if let Some(entry) = steps.get_mut(record) {
			entry.1 = Some(outcome);
		}
	}

	fn chain_error(&self, error: ChainError) {
		match self.chain_errors.lock() {
			Ok(mut errors) => errors.push(error),
			Err(poisoned) => poisoned.into_inner().push(error),
		}
	}

	fn summary(&self) -> RunSummary {
		let steps = match self.steps.lock() {
			Ok(steps) => steps.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		};
		let chain_errors = match self.chain_errors.lock() {
			Ok(errors) => errors.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		};
		RunSummary {
			steps: steps
				.into_iter()
				.map(|(id, outcome)| StepRecord {
					id,
					outcome: outcome.unwrap_or(StepOutcome::Stopped),
				})
				.collect(),
			chain_errors,
		}
	}
}

fn outcome(last_error: Option<&RunError>, stopped: bool) -> StepOutcome {
	match last_error {
		None => StepOutcome::Completed,
		Some(_) if stopped => StepOutcome::Stopped,
		Some(e) => StepOutcome::Failed(e.clone()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::app::test_app;

	fn app(id: &str, manual: bool, next: Option<&str>) -> Application {
		Application {
			manual,
			next: next.map(str::to_string),
			..test_app(id)
		}
	}

	fn set() -> AppSet {
		AppSet::new(vec![
			app("a", false, Some("b")),
			app("b", true, Some("c")),
			app("c", false, None),
			app("d", true, Some("ghost")),
		])
		.unwrap()
	}

	#[test]
	fn fan_out_skips_unselected_manual() {
		let apps = set();
		assert_eq!(startup_set(&apps, &Selection::default(), Mode::FanOut), vec![0, 2]);
		let sel = Selection::resolve(&apps, &["d"]);
		assert_eq!(startup_set(&apps, &sel, Mode::FanOut), vec![0, 2, 3]);
	}

	#[test]
	fn workflow_starts_from_selection_or_first() {
		let apps = set();
		assert_eq!(startup_set(&apps, &Selection::default(), Mode::Workflow), vec![0]);
		let sel = Selection::resolve(&apps, &["c", "b"]);
		assert_eq!(startup_set(&apps, &sel, Mode::Workflow), vec![2, 1]);
		let empty = AppSet::default();
		assert!(startup_set(&empty, &Selection::default(), Mode::Workflow).is_empty());
	}

	#[test]
	fn transitions() {
		let apps = set();
		assert_eq!(transition(&apps, apps.at(0), None), Ok(Transition::Chain(1)));
		assert_eq!(transition(&apps, apps.at(2), None), Ok(Transition::Done));
		assert_eq!(
			transition(&apps, apps.at(2), Some(&RunError::Exit(1))),
			Ok(Transition::Done)
		);
		assert_eq!(
			transition(&apps, apps.at(1), Some(&RunError::Exit(2))),
			Err(ChainError::StepFailed {
				id: "b".into(),
				error: RunError::Exit(2),
			})
		);
		assert_eq!(
			transition(&apps, apps.at(3), None),
			Err(ChainError::UnknownNext {
				id: "d".into(),
				next: "ghost".into(),
			})
		);
	}

	#[test]
	fn outcome_of_a_step() {
		assert_eq!(outcome(None, false), StepOutcome::Completed);
		assert_eq!(outcome(None, true), StepOutcome::Completed);
		assert_eq!(outcome(Some(&RunError::Exit(3)), false), StepOutcome::Failed(RunError::Exit(3)));
		assert_eq!(outcome(Some(&RunError::Signal(2)), true), StepOutcome::Stopped);
	}
}
