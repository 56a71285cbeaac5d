//! Stateful remote execution engine: a shell-like session over stateless
//! `kubectl exec` calls.

pub mod autocomplete;
pub mod classify;
pub mod cli;
pub mod clipboard;
pub mod compose;
pub mod copy;
pub mod dispatcher;
pub mod history;
pub mod invocation;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod picker;
pub mod policy;
pub mod repl;
pub mod runner;
pub mod session;
pub mod settings;
pub mod teardown;

pub use cli::Cli;
pub use dispatcher::{Effect, Event, ExitReason, KeyInput, ShellState};
pub use invocation::{run_shell, run_shell_with_cli};
pub use runner::Services;
pub use session::{DebugExecutionMode, Session, Target};
