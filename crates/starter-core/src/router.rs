use std::io::Write;
use std::sync::{Arc, Mutex};

use starter_supervise::{Event, Stream};

use crate::color::{self, Palette};

/// Destination for rendered lines. Each call writes one whole line.
pub trait LineSink: Send + Sync {
	fn write_line(&self, line: &str);
}

/// Writes to stdout, holding the lock for the duration of one line.
pub struct StdoutSink;

impl LineSink for StdoutSink {
	fn write_line(&self, line: &str) {
		if let Err(e) = write_line_to(&mut std::io::stdout().lock(), line) {
			tracing::debug!("stdout write failed: {}", e);
		}
	}
}

fn write_line_to<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
	writeln!(out, "{}", line)?;
	out.flush()
}

/// Keeps every line in memory.
#[derive(Default)]
pub struct MemorySink {
	lines: Mutex<Vec<String>>,
}

impl MemorySink {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn lines(&self) -> Vec<String> {
		match self.lines.lock() {
			Ok(lines) => lines.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}
}

impl LineSink for MemorySink {
	fn write_line(&self, line: &str) {
		match self.lines.lock() {
			Ok(mut lines) => lines.push(line.to_string()),
			Err(poisoned) => poisoned.into_inner().push(line.to_string()),
		}
	}
}

/// Formats and colors lines from supervised applications.
pub struct LogRouter {
	palette: Arc<Palette>,
	colorize: bool,
	sink: Arc<dyn LineSink>,
}

impl LogRouter {
	pub fn new(palette: Arc<Palette>, colorize: bool, sink: Arc<dyn LineSink>) -> Self {
		Self {
			palette,
			colorize,
			sink,
		}
	}

	/// One output line of `id`, already stripped of its terminator.
	pub fn output(&self, id: &str, stream: Stream, line: &str) {
		self.sink.write_line(&self.render(&timestamp(), id, stream, line));
	}

	/// A line about `id` itself, in its declared color.
	pub fn note(&self, id: &str, message: &str) {
		let text = format!("{} {}: {}", timestamp(), id, message);
		self.sink.write_line(&self.paint(self.palette.declared(id), &text));
	}

	pub fn event(&self, id: &str, event: &Event) {
		let text = format!("{} {} {}", timestamp(), event.code, event.message);
		self.sink.write_line(&self.paint(self.palette.declared(id), &text));
	}

	pub(crate) fn render(&self, ts: &str, id: &str, stream: Stream, line: &str) -> String {
		let tag = match stream {
			Stream::Stdout => "O ",
			Stream::Stderr => "E",
		};
		let text = format!("{} {}:{} {}", ts, id, tag, line);
		self.paint(self.palette.style_for(id, line), &text)
	}

	fn paint(&self, style: Option<&owo_colors::Style>, text: &str) -> String {
		if self.colorize {
			color::paint(style, text)
		} else {
			text.to_string()
		}
	}
}

fn timestamp() -> String {
	chrono::Local::now().format("%Y/%m/%d %H:%M:%S").to_string()
}
