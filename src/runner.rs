use std::any::Any;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::builtins;
use crate::env::{Env, Namespace};
use crate::error::EvalError;
use crate::eval;
use crate::parser;

#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// The script called `exit(code)`.
    RequestedExit(i32),
    /// Anything else: unreadable file, syntax error, runtime fault, engine panic.
    Uncaught(String),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunFailure::RequestedExit(code) => write!(f, "script requested exit with code {}", code),
            RunFailure::Uncaught(description) => write!(f, "{}", description),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Bindings(Namespace),
    Failed(RunFailure),
}

impl RunOutcome {
    /// The bindings, or an empty namespace when the run failed.
    pub fn into_namespace(self) -> Namespace {
        match self {
            RunOutcome::Bindings(ns) => ns,
            RunOutcome::Failed(_) => Namespace::new(),
        }
    }
}

/// Run the script at `path` in a fresh namespace.
///
/// Must be called from inside a [`tokio::task::LocalSet`]: the script runs as
/// a local task so a panic in the engine comes back as a failure.
pub async fn run_script(path: &Path) -> RunOutcome {
    let outcome = isolate(execute(path.to_path_buf()))
        .await
        .unwrap_or_else(|reason| RunOutcome::Failed(RunFailure::Uncaught(reason)));
    match &outcome {
        RunOutcome::Bindings(ns) => debug!(path = %path.display(), bindings = ns.len(), "script ran"),
        RunOutcome::Failed(failure) => debug!(path = %path.display(), %failure, "script failed"),
    }
    outcome
}

/// Run Forge source text in a fresh namespace.
pub async fn run_source(source: &str) -> RunOutcome {
    let lines: Vec<String> = source.lines().map(|s| s.trim_end().to_string()).collect();
    let stmts = match parser::parse(&lines) {
        Ok(stmts) => stmts,
        Err(e) => return RunOutcome::Failed(RunFailure::Uncaught(format!("SyntaxError: {}", e))),
    };
    let mut env = Env::new();
    builtins::install(&mut env);
    match eval::eval_block(&stmts, &mut env).await {
        Ok(_) => RunOutcome::Bindings(env.into_namespace()),
        Err(EvalError::Exit(code)) => RunOutcome::Failed(RunFailure::RequestedExit(code)),
        Err(EvalError::Fault(msg)) => RunOutcome::Failed(RunFailure::Uncaught(msg)),
    }
}

async fn execute(path: PathBuf) -> RunOutcome {
    match tokio::fs::read_to_string(&path).await {
        Ok(source) => run_source(&source).await,
        Err(e) => RunOutcome::Failed(RunFailure::Uncaught(format!("cannot read {}: {}", path.display(), e))),
    }
}

/// Drive `fut` as its own local task so a panic is caught at the task
/// boundary and comes back as `Err` with a description.
pub async fn isolate<F, T>(fut: F) -> Result<T, String>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    match tokio::task::spawn_local(fut).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => Err(format!("interpreter panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tokio::task::LocalSet;

    use super::*;
    use crate::value::Value;

    #[tokio::test]
    async fn bindings_come_back_in_definition_order() {
        let src = "\
b = 2
a = b + 1
function f():
    return 1
class C:
    z = 1
b = 5";
        match run_source(src).await {
            RunOutcome::Bindings(ns) => {
                assert_eq!(ns.names().collect::<Vec<_>>(), vec!["b", "a", "f", "C"]);
                assert_eq!(ns.get("a"), Some(&Value::Number(3.0)));
                assert_eq!(ns.get("b"), Some(&Value::Number(5.0)));
            }
            other => panic!("expected bindings, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_script_gives_equal_namespaces() {
        let src = "x = 1\nname = \"forge\"\nitems = [1, 2]";
        assert_eq!(run_source(src).await, run_source(src).await);
    }

    #[tokio::test]
    async fn exit_is_classified() {
        assert_eq!(
            run_source("x = 1\nexit(3)\ny = 2").await,
            RunOutcome::Failed(RunFailure::RequestedExit(3))
        );
    }

    #[tokio::test]
    async fn faults_are_classified() {
        match run_source("x = 1\ny = x / 0").await {
            RunOutcome::Failed(RunFailure::Uncaught(msg)) => assert_eq!(msg, "Division by zero"),
            other => panic!("expected failure, got {:?}", other),
        }
        match run_source("x = (").await {
            RunOutcome::Failed(RunFailure::Uncaught(msg)) => assert!(msg.starts_with("SyntaxError")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_run_yields_empty_namespace() {
        assert!(run_source("oops(").await.into_namespace().is_empty());
    }

    #[tokio::test]
    async fn scripts_run_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "greeting = upper(\"hi\")").unwrap();
        let outcome = LocalSet::new().run_until(run_script(file.path())).await;
        let ns = outcome.into_namespace();
        assert_eq!(ns.get("greeting"), Some(&Value::String("HI".into())));
    }

    #[tokio::test]
    async fn unreadable_script_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = LocalSet::new()
            .run_until(run_script(&dir.path().join("missing.forge")))
            .await;
        assert!(matches!(outcome, RunOutcome::Failed(RunFailure::Uncaught(msg)) if msg.contains("cannot read")));
    }

    async fn explode() -> RunOutcome {
        panic!("engine bug")
    }

    #[tokio::test]
    async fn panics_do_not_escape() {
        let outcome = LocalSet::new().run_until(isolate(explode())).await;
        assert_eq!(outcome, Err("interpreter panicked: engine bug".to_string()));
    }

    /// Run `src` on a thread whose stack is as large as the binary's.
    fn failure_on_large_stack(src: &'static str) -> Option<RunFailure> {
        std::thread::Builder::new()
            .stack_size(crate::STACK_SIZE)
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                match runtime.block_on(run_source(src)) {
                    RunOutcome::Failed(failure) => Some(failure),
                    RunOutcome::Bindings(_) => None,
                }
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn runaway_recursion_is_an_uncaught_failure() {
        let failure = failure_on_large_stack("function f(n):\n    return f(n + 1)\nf(0)");
        assert_eq!(
            failure,
            Some(RunFailure::Uncaught("maximum recursion depth exceeded".into()))
        );
    }

    #[test]
    fn recursion_below_the_limit_still_works() {
        let src = "function down(n):\n    if n == 0:\n        return 0\n    return down(n - 1)\nx = down(200)";
        assert_eq!(failure_on_large_stack(src), None);
    }
}
