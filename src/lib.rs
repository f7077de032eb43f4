mod args;
mod config;
mod execute;
mod filter;
mod golden;
mod registry;
mod regression;

pub use args::Args;
pub use filter::{LineFilter, Lines};
pub use golden::unified_diff;
pub use registry::{Registry, TestCase};
pub use regression::{RunError, Runner, State, TestExitCode, TestReport};
