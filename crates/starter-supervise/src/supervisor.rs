use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::output::pipe_lines;
use crate::types::*;

const INTERRUPT_INTERVAL: Duration = Duration::from_millis(200);
const READER_GRACE: Duration = Duration::from_secs(1);
const GROUP_POLL: Duration = Duration::from_millis(100);

/// Handle to one supervised program.
///
/// Dropping the handle asks the supervisor to stop the program.
pub struct Process {
	pub id: String,
	pub stdout: mpsc::Receiver<String>,
	pub stderr: mpsc::Receiver<String>,
	pub events: mpsc::Receiver<Event>,
	/// Fires once supervision is over. Every output line is buffered by then.
	pub done: oneshot::Receiver<()>,
	last_error: Arc<Mutex<Option<RunError>>>,
	stop: watch::Sender<bool>,
}

impl Process {
	/// Error of the last run, `None` if it exited successfully.
	pub fn last_error(&self) -> Option<RunError> {
		match self.last_error.lock() {
			Ok(guard) => guard.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}

	/// Interrupts the process group, then kills it, and stops respawning.
	pub fn stop(&self) {
		let _ = self.stop.send(true);
	}
}

/// Spawns `program` and keeps it supervised according to `opts`.
///
/// Must be called from within a tokio runtime. Only the first spawn is
/// reported here; later failures end up in [`Process::last_error`].
pub fn supervise(program: &str, opts: Options) -> Result<Process, SuperviseError> {
	if program.is_empty() {
		return Err(SuperviseError::EmptyProgram);
	}

	let child = spawn_child(program, &opts).map_err(|source| SuperviseError::Spawn {
		program: program.to_string(),
		source,
	})?;

	let (stdout_tx, stdout) = mpsc::channel(LINE_BUFFER);
	let (stderr_tx, stderr) = mpsc::channel(LINE_BUFFER);
	let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
	let (done_tx, done) = oneshot::channel();
	let (stop, stop_rx) = watch::channel(false);
	let last_error = Arc::new(Mutex::new(None));

	let runner = Runner {
		program: program.to_string(),
		opts,
		stdout: stdout_tx,
		stderr: stderr_tx,
		events: events_tx,
		last_error: Arc::clone(&last_error),
		stop: stop_rx,
	};

	let id = runner.opts.id.clone();
	tokio::spawn(runner.run(child, done_tx));

	Ok(Process {
		id,
		stdout,
		stderr,
		events,
		done,
		last_error,
		stop,
	})
}

struct Runner {
	program: String,
	opts: Options,
	stdout: mpsc::Sender<String>,
	stderr: mpsc::Sender<String>,
	events: mpsc::Sender<Event>,
	last_error: Arc<Mutex<Option<RunError>>>,
	stop: watch::Receiver<bool>,
}

struct RunOutcome {
	result: Result<(), RunError>,
	stopped: bool,
}

impl Runner {
	async fn run(mut self, first: Child, done: oneshot::Sender<()>) {
		let max_spawns = self.opts.max_spawns.max(1);
		let spawn_attempts = self.opts.spawn_attempts.max(1);
		let mut spawns: u32 = 1;
		let mut failures: u32 = 0;
		let mut delay = self.opts.initial_delay;
		let mut child = first;

		'supervise: loop {
			let outcome = self.watch_child(child).await;
			let failed = outcome.result.is_err();
			match &outcome.result {
				Ok(()) => self.emit(EventCode::Exit, "exited successfully".into()),
				Err(e) => self.emit(EventCode::Exit, format!("exited: {}", e)),
			}
			self.set_last_error(outcome.result.err());

			if outcome.stopped || self.stop_requested() {
				break;
			}
			if failed {
				failures += 1;
			} else {
				failures = 0;
				delay = self.opts.initial_delay;
				if self.opts.stop_on_success {
					break;
				}
			}
			if spawns >= max_spawns {
				self.emit(EventCode::GiveUp, format!("max spawns ({}) reached", max_spawns));
				break;
			}
			if failures >= spawn_attempts {
				self.emit(EventCode::GiveUp, format!("{} failed attempts", failures));
				break;
			}

			let mut wait = failed;
			child = loop {
				if wait {
					delay = (self.opts.delay_between_spawns)(delay);
					if self.sleep_unless_stopped(delay).await {
						break 'supervise;
					}
				}
				self.emit(EventCode::Respawn, format!("respawn {}/{}", spawns + 1, max_spawns));
				match spawn_child(&self.program, &self.opts) {
					Ok(c) => break c,
					Err(e) => {
						failures += 1;
						self.emit(EventCode::SpawnFailed, format!("spawn failed: {}", e));
						self.set_last_error(Some(RunError::Spawn(e.to_string())));
						if failures >= spawn_attempts {
							self.emit(EventCode::GiveUp, format!("{} failed attempts", failures));
							break 'supervise;
						}
						wait = true;
					}
				}
			};
			spawns += 1;
		}

		self.emit(EventCode::Done, "supervision finished".into());
		let _ = done.send(());
	}

	async fn watch_child(&mut self, mut child: Child) -> RunOutcome {
		let pid = child.id();
		self.emit(
			EventCode::Start,
			format!("started pid {}", pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())),
		);

		let (idle_tx, mut idle_rx) = mpsc::channel(2);
		let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
		if let Some(out) = child.stdout.take() {
			readers.push(tokio::spawn(pipe_lines(
				out,
				Stream::Stdout,
				self.stdout.clone(),
				self.opts.stdout_idle,
				idle_tx.clone(),
			)));
		}
		if let Some(err) = child.stderr.take() {
			readers.push(tokio::spawn(pipe_lines(
				err,
				Stream::Stderr,
				self.stderr.clone(),
				self.opts.stderr_idle,
				idle_tx.clone(),
			)));
		}
		drop(idle_tx);

		let mut idle: Option<RunError> = None;
		let mut stopped = self.stop_requested();
		let mut terminator: Option<JoinHandle<()>> = None;
		if stopped {
			terminator = pid.map(|p| self.spawn_terminator(p));
		}

		let status = loop {
			tokio::select! {
				status = child.wait() => break status,
				Some((stream, after)) = idle_rx.recv(), if idle.is_none() && terminator.is_none() => {
					self.emit(EventCode::idle(stream), format!("no {} output for {:?}, stopping", stream, after));
					idle = Some(RunError::Idle(stream, after));
					terminator = pid.map(|p| self.spawn_terminator(p));
				}
				_ = self.stop.changed(), if !stopped => {
					stopped = true;
					if terminator.is_none() {
						terminator = pid.map(|p| self.spawn_terminator(p));
					}
				}
			}
		};

		if let Some(t) = terminator {
			t.abort();
		}
		self.drain_readers(pid, readers, stopped || idle.is_some()).await;

		let result = match idle {
			Some(e) => Err(e),
			None => status_result(status),
		};
		RunOutcome { result, stopped }
	}

	/// Waits until both pipes reach EOF. Background jobs left in the child's
	/// process group keep their output flowing until they exit, unless the run
	/// was stopped, in which case they are killed.
	async fn drain_readers(&mut self, pid: Option<u32>, readers: Vec<JoinHandle<()>>, mut stopped: bool) {
		let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
		let finished = async move {
			for reader in readers {
				let _ = reader.await;
			}
		};
		tokio::pin!(finished);

		if stopped {
			self.kill_leftovers(pid);
		}
		let mut poll = tokio::time::interval(GROUP_POLL);
		loop {
			tokio::select! {
				_ = &mut finished => return,
				_ = self.stop.changed(), if !stopped => {
					stopped = true;
					self.kill_leftovers(pid);
				}
				_ = poll.tick() => {
					if pid.is_some_and(group_alive) {
						continue;
					}
					// the pipes outlived the process group
					if tokio::time::timeout(READER_GRACE, &mut finished).await.is_ok() {
						return;
					}
					self.emit(
						EventCode::OutputDropped,
						"output still open after the process group exited, dropping it".into(),
					);
					for abort in &aborts {
						abort.abort();
					}
					return;
				}
			}
		}
	}

	fn kill_leftovers(&self, pid: Option<u32>) {
		let Some(pid) = pid else {
			return;
		};
		if killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
			self.emit(EventCode::Kill, "killing leftover processes".into());
		}
	}

	fn spawn_terminator(&self, pid: u32) -> JoinHandle<()> {
		tokio::spawn(terminate(
			pid,
			self.opts.attempts_before_terminate,
			self.opts.id.clone(),
			self.events.clone(),
		))
	}

	/// Returns true when a stop request cut the sleep short.
	async fn sleep_unless_stopped(&mut self, delay: Duration) -> bool {
		if self.stop_requested() {
			return true;
		}
		tokio::select! {
			_ = tokio::time::sleep(delay) => self.stop_requested(),
			_ = self.stop.changed() => true,
		}
	}

	fn stop_requested(&self) -> bool {
		self.stop.has_changed().is_err() || *self.stop.borrow()
	}

	fn set_last_error(&self, err: Option<RunError>) {
		match self.last_error.lock() {
			Ok(mut guard) => *guard = err,
			Err(poisoned) => *poisoned.into_inner() = err,
		}
	}

	fn emit(&self, code: EventCode, message: String) {
		send_event(&self.events, &self.opts.id, code, message);
	}
}

fn send_event(events: &mpsc::Sender<Event>, id: &str, code: EventCode, message: String) {
	let event = Event {
		code,
		message: format!("{}: {}", id, message),
	};
	if events.try_send(event).is_err() {
		tracing::trace!(id, %code, "event dropped");
	}
}

fn status_result(status: std::io::Result<ExitStatus>) -> Result<(), RunError> {
	match status {
		Ok(s) if s.success() => Ok(()),
		Ok(s) => match (s.code(), s.signal()) {
			(Some(code), _) => Err(RunError::Exit(code)),
			(None, Some(sig)) => Err(RunError::Signal(sig)),
			(None, None) => Err(RunError::Exit(-1)),
		},
		Err(e) => Err(RunError::Wait(e.to_string())),
	}
}

fn spawn_child(program: &str, opts: &Options) -> std::io::Result<Child> {
	let mut cmd = Command::new(program);
	cmd.args(&opts.args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0);

	if let Some(dir) = opts.dir.as_ref().filter(|d| !d.as_os_str().is_empty()) {
		cmd.current_dir(dir);
	}
	for (key, val) in &opts.env {
		cmd.env(key, val);
	}

	cmd.spawn()
}

fn group_alive(pid: u32) -> bool {
	killpg(Pid::from_raw(pid as i32), None).is_ok()
}

async fn terminate(pid: u32, interrupts: u32, id: String, events: mpsc::Sender<Event>) {
	let pgid = Pid::from_raw(pid as i32);
	for attempt in 1..=interrupts {
		send_event(&events, &id, EventCode::Interrupt, format!("interrupt {}/{}", attempt, interrupts));
		if killpg(pgid, Signal::SIGINT).is_err() {
			return;
		}
		tokio::time::sleep(INTERRUPT_INTERVAL).await;
	}
	send_event(&events, &id, EventCode::Kill, "killing process group".into());
	let _ = killpg(pgid, Signal::SIGKILL);
}
