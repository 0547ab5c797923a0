use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::types::Stream;

/// Reads `reader` line by line into `lines` until EOF.
///
/// With an idle threshold, `idle` is notified once if no complete line shows
/// up within it; the timer restarts with every line. Lines keep being read
/// after the receiver is gone so the child never blocks on a full pipe.
pub(crate) async fn pipe_lines<R: AsyncRead + Unpin>(
	reader: R,
	stream: Stream,
	lines: mpsc::Sender<String>,
	mut idle_after: Option<Duration>,
	idle: mpsc::Sender<(Stream, Duration)>,
) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	let mut forwarding = true;

	loop {
		// read_until keeps partial data in `buf` when the timeout cancels it
		let read = match idle_after {
			Some(after) => match tokio::time::timeout(after, reader.read_until(b'\n', &mut buf)).await {
				Ok(r) => r,
				Err(_) => {
					let _ = idle.try_send((stream, after));
					idle_after = None;
					continue;
				}
			},
			None => reader.read_until(b'\n', &mut buf).await,
		};

		match read {
			Ok(0) | Err(_) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf)
					.trim_end_matches(&['\r', '\n'][..])
					.to_string();
				buf.clear();
				if forwarding && lines.send(line).await.is_err() {
					forwarding = false;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn splits_and_strips_terminators() {
		let input: &[u8] = b"one\r\ntwo\n\nthree";
		let (tx, mut rx) = mpsc::channel(16);
		let (idle_tx, _idle_rx) = mpsc::channel(1);
		pipe_lines(input, Stream::Stdout, tx, None, idle_tx).await;

		let mut got = Vec::new();
		while let Ok(line) = rx.try_recv() {
			got.push(line);
		}
		assert_eq!(got, vec!["one", "two", "", "three"]);
	}

	#[tokio::test]
	async fn invalid_utf8_is_replaced() {
		let input: &[u8] = b"ok \xff\n";
		let (tx, mut rx) = mpsc::channel(4);
		let (idle_tx, _idle_rx) = mpsc::channel(1);
		pipe_lines(input, Stream::Stderr, tx, None, idle_tx).await;
		assert_eq!(rx.try_recv().unwrap(), "ok \u{fffd}");
	}

	#[tokio::test]
	async fn keeps_draining_after_receiver_drops() {
		let input: &[u8] = b"a\nb\nc\n";
		let (tx, rx) = mpsc::channel(1);
		drop(rx);
		let (idle_tx, _idle_rx) = mpsc::channel(1);
		// must return instead of blocking on the closed channel
		pipe_lines(input, Stream::Stdout, tx, None, idle_tx).await;
	}

	#[tokio::test]
	async fn reports_idle_stream_once() {
		let (mut writer, reader) = tokio::io::duplex(64);
		let (tx, _rx) = mpsc::channel(4);
		let (idle_tx, mut idle_rx) = mpsc::channel(4);
		let task = tokio::spawn(pipe_lines(
			reader,
			Stream::Stderr,
			tx,
			Some(Duration::from_millis(50)),
			idle_tx,
		));

		let (stream, after) = idle_rx.recv().await.unwrap();
		assert_eq!(stream, Stream::Stderr);
		assert_eq!(after, Duration::from_millis(50));

		use tokio::io::AsyncWriteExt;
		writer.shutdown().await.unwrap();
		drop(writer);
		task.await.unwrap();
		assert!(idle_rx.try_recv().is_err());
	}
}
