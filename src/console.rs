//! The interactive read-eval loop bound to one namespace.
//!
//! A console starts in the prompt state and cycles between reading and
//! evaluating until the reader reports a file change ([`ConsoleExit::Aborted`])
//! or the input ends ([`ConsoleExit::Done`]). It is never resumed afterwards;
//! the driver builds a new one for the next cycle.

use std::io::Write;
use std::path::Path;

use tokio::io::AsyncBufRead;
use tracing::{debug, trace};

use crate::builtins;
use crate::env::{Env, Namespace};
use crate::error::{EvalError, EvalResult, ReloadError};
use crate::eval;
use crate::parser;
use crate::reader::{LineReader, ReadError, ReadEvent};
use crate::runner;
use crate::value::Value;
use crate::watcher::ChangeSource;

pub const PROMPT: &str = ">>> ";
pub const CONTINUATION_PROMPT: &str = "... ";

/// How a console's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The watched file changed while waiting for input.
    Aborted,
    /// Input ended, or `exit(code)` was evaluated. Carries the exit code.
    Done(i32),
}

enum State {
    WaitingPrompt,
    Evaluating(String),
}

pub struct Console<'a, C, R> {
    env: Env,
    path: &'a Path,
    reader: &'a mut LineReader<C, R>,
    pending_block: Vec<String>,
}

impl<'a, C, R> Console<'a, C, R>
where
    C: ChangeSource,
    R: AsyncBufRead + Unpin,
{
    pub fn new(namespace: Namespace, path: &'a Path, reader: &'a mut LineReader<C, R>) -> Self {
        let mut env = Env::with_namespace(namespace);
        builtins::install(&mut env);
        Self {
            env,
            path,
            reader,
            pending_block: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        self.env.namespace()
    }

    pub fn into_namespace(self) -> Namespace {
        self.env.into_namespace()
    }

    /// Run the prompt loop until it is aborted or done.
    pub async fn interact<W: Write>(&mut self, out: &mut W) -> Result<ConsoleExit, ReloadError> {
        let mut state = State::WaitingPrompt;
        loop {
            state = match state {
                State::WaitingPrompt => {
                    let prompt = if self.pending_block.is_empty() {
                        PROMPT
                    } else {
                        CONTINUATION_PROMPT
                    };
                    match self.reader.read_line(prompt, out).await {
                        Ok(ReadEvent::Line(line)) => match self.push_line(line) {
                            Some(source) => State::Evaluating(source),
                            None => State::WaitingPrompt,
                        },
                        Ok(ReadEvent::Abort) => {
                            debug!(path = %self.path.display(), "console aborted");
                            return Ok(ConsoleExit::Aborted);
                        }
                        Err(ReadError::EndOfInput) => {
                            debug!("console reached end of input");
                            return Ok(ConsoleExit::Done(0));
                        }
                        Err(ReadError::Interrupted) => {
                            writeln!(out)?;
                            debug!("console interrupted");
                            return Ok(ConsoleExit::Done(0));
                        }
                        Err(ReadError::Io(e)) => return Err(e.into()),
                    }
                }
                State::Evaluating(source) => {
                    trace!(%source, "evaluating");
                    match self.eval_source(&source).await {
                        Ok(Some(value)) => writeln!(out, "{}", value.repr())?,
                        Ok(None) => {}
                        Err(EvalError::Exit(code)) => return Ok(ConsoleExit::Done(code)),
                        Err(EvalError::Fault(msg)) => writeln!(out, "Error: {}", msg)?,
                    }
                    State::WaitingPrompt
                }
            };
        }
    }

    /// Collect a line; returns complete source once a statement (or block) is finished.
    fn push_line(&mut self, line: String) -> Option<String> {
        if self.pending_block.is_empty() {
            if parser::opens_block(&line) {
                self.pending_block.push(line);
                return None;
            }
            return Some(line);
        }
        if line.trim().is_empty() {
            let source = self.pending_block.join("\n");
            self.pending_block.clear();
            return Some(source);
        }
        self.pending_block.push(line);
        None
    }

    /// Evaluate source against this console's namespace. `Some` carries a
    /// non-null result worth echoing.
    ///
    /// Runs as a local task, so the console must live inside a
    /// [`tokio::task::LocalSet`]. A panic leaves the namespace as it was
    /// before the line and is reported as a fault.
    pub async fn eval_source(&mut self, source: &str) -> EvalResult<Option<Value>> {
        let lines: Vec<String> = source.lines().map(|s| s.trim_end().to_string()).collect();
        let stmts = parser::parse(&lines).map_err(|e| EvalError::Fault(format!("SyntaxError: {}", e)))?;
        let mut env = self.env.clone();
        let (env, result) = runner::isolate(async move {
            let result = eval::eval_interactive(&stmts, &mut env).await;
            (env, result)
        })
        .await
        .map_err(EvalError::Fault)?;
        self.env = env;
        Ok(result?.filter(|v| *v != Value::Null))
    }
}
