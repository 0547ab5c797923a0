//! # starter-supervise
//!
//! Supervise a single child process from a tokio runtime.
//!
//! [`supervise`] spawns the program, streams its output line by line, and
//! respawns it according to [`Options`]: consecutive failed attempts, a total
//! spawn limit, an optional stop after the first successful run, and a
//! caller-supplied delay function between spawns. Idle output streams stop the
//! current run. [`Process::stop`] interrupts the process group a few times
//! before killing it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use starter_supervise::{supervise, Options};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut p = supervise("echo", Options {
//!     args: vec!["hello".into()],
//!     id: "greeter".into(),
//!     stop_on_success: true,
//!     ..Options::default()
//! })
//! .unwrap();
//!
//! loop {
//!     tokio::select! {
//!         Some(line) = p.stdout.recv() => println!("{}", line),
//!         _ = &mut p.done => break,
//!     }
//! }
//! # }
//! ```

mod output;
pub mod supervisor;
pub mod types;

pub use supervisor::{supervise, Process};
pub use types::*;
