//! Runs a set of configured applications side by side, or one after another as
//! a workflow, and multiplexes their output into one colored log.

pub mod app;
pub mod backoff;
pub mod color;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outstanding;
pub mod router;

pub use app::{AppSet, Application, Selection};
pub use config::{Config, Overrides, Resolved, Settings};
pub use error::{ChainError, ConfigError};
pub use orchestrator::{Mode, Orchestrator, RunSummary, StepOutcome, StepRecord};
pub use router::{LineSink, LogRouter, MemorySink, StdoutSink};
pub use starter_supervise::RunError;
