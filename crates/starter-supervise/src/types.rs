use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Computes the sleep before the next spawn from the previous one.
pub type DelayFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

pub const EVENT_BUFFER: usize = 1000;
pub const LINE_BUFFER: usize = 256;

#[derive(Clone)]
pub struct Options {
	pub args: Vec<String>,
	pub dir: Option<PathBuf>,
	/// Extra environment variables, applied on top of the inherited environment.
	pub env: Vec<(String, String)>,
	/// Label added to every event message.
	pub id: String,
	/// Consecutive failed attempts before giving up.
	pub spawn_attempts: u32,
	/// Interrupts sent by `stop()` before the process group is killed.
	pub attempts_before_terminate: u32,
	/// Stop supervising once a run exits successfully.
	pub stop_on_success: bool,
	/// Total number of spawns over the lifetime of the handle.
	pub max_spawns: u32,
	pub stdout_idle: Option<Duration>,
	pub stderr_idle: Option<Duration>,
	/// Delay handed to the first `delay_between_spawns` call.
	pub initial_delay: Duration,
	pub delay_between_spawns: DelayFn,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			args: Vec::new(),
			dir: None,
			env: Vec::new(),
			id: "NOID".into(),
			spawn_attempts: 10,
			attempts_before_terminate: 10,
			stop_on_success: false,
			max_spawns: 1,
			stdout_idle: None,
			stderr_idle: None,
			initial_delay: Duration::from_millis(500),
			delay_between_spawns: Arc::new(|current: Duration| current.saturating_mul(2)),
		}
	}
}

impl fmt::Debug for Options {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Options")
			.field("args", &self.args)
			.field("dir", &self.dir)
			.field("env", &self.env)
			.field("id", &self.id)
			.field("spawn_attempts", &self.spawn_attempts)
			.field("attempts_before_terminate", &self.attempts_before_terminate)
			.field("stop_on_success", &self.stop_on_success)
			.field("max_spawns", &self.max_spawns)
			.field("stdout_idle", &self.stdout_idle)
			.field("stderr_idle", &self.stderr_idle)
			.field("initial_delay", &self.initial_delay)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
	Stdout,
	Stderr,
}

impl Stream {
	pub fn as_str(&self) -> &'static str {
		match self {
			Stream::Stdout => "stdout",
			Stream::Stderr => "stderr",
		}
	}
}

impl fmt::Display for Stream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
	Start,
	Exit,
	SpawnFailed,
	Respawn,
	StdoutIdle,
	StderrIdle,
	Interrupt,
	Kill,
	/// Output pipes stayed open after the process group was gone.
	OutputDropped,
	GiveUp,
	Done,
}

impl EventCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventCode::Start => "start",
			EventCode::Exit => "exit",
			EventCode::SpawnFailed => "spawn_failed",
			EventCode::Respawn => "respawn",
			EventCode::StdoutIdle => "stdout_idle",
			EventCode::StderrIdle => "stderr_idle",
			EventCode::Interrupt => "interrupt",
			EventCode::Kill => "kill",
			EventCode::OutputDropped => "output_dropped",
			EventCode::GiveUp => "give_up",
			EventCode::Done => "done",
		}
	}

	pub(crate) fn idle(stream: Stream) -> Self {
		match stream {
			Stream::Stdout => EventCode::StdoutIdle,
			Stream::Stderr => EventCode::StderrIdle,
		}
	}
}

impl fmt::Display for EventCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Lifecycle notification. The message already carries the process label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
	pub code: EventCode,
	pub message: String,
}

/// Why a run did not end successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
	#[error("exit status {0}")]
	Exit(i32),
	#[error("terminated by signal {0}")]
	Signal(i32),
	#[error("no {0} output for {1:?}")]
	Idle(Stream, Duration),
	#[error("spawn failed: {0}")]
	Spawn(String),
	#[error("wait failed: {0}")]
	Wait(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SuperviseError {
	#[error("no program given")]
	EmptyProgram,
	#[error("failed to start {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},
}
