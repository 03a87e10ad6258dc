//! A live-reloading console for Forge scripts.
//!
//! [`interact`] runs a script, then serves an interactive prompt over the
//! script's top-level bindings. Saving the script aborts whatever the prompt
//! was waiting for, re-runs the file and starts a new prompt over the fresh
//! bindings.
//!
//! ```no_run
//! use std::path::Path;
//! use forge_reload::{interact_stdio, InteractOptions};
//!
//! # async fn demo() -> Result<(), forge_reload::ReloadError> {
//! let local = tokio::task::LocalSet::new();
//! let code = local
//!     .run_until(interact_stdio(Path::new("app.forge"), &InteractOptions::default()))
//!     .await?;
//! std::process::exit(code);
//! # }
//! ```

pub mod ast;
pub mod builtins;
pub mod console;
pub mod driver;
pub mod env;
pub mod error;
pub mod eval;
pub mod logging;
pub mod parser;
pub mod reader;
pub mod runner;
pub mod value;
pub mod watcher;

/// Stack for the thread that evaluates Forge code. Evaluation recurses on
/// the native stack, and [`eval::MAX_CALL_DEPTH`] nested calls must fit.
pub const STACK_SIZE: usize = 64 * 1024 * 1024;

pub use console::{Console, ConsoleExit};
pub use driver::{interact, interact_stdio, InteractOptions};
pub use env::Namespace;
pub use error::{EvalError, ReloadError};
pub use reader::{LineReader, ReadError, ReadEvent};
pub use runner::{run_script, RunFailure, RunOutcome};
pub use value::Value;
pub use watcher::{ChangeQueue, ChangeSource, ChangeWatcher};
