//! The reload loop: one watcher for the whole session, a fresh console per
//! version of the script.

use std::io::Write;
use std::path::Path;

use crossterm::style::Stylize;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, info};

use crate::console::{Console, ConsoleExit};
use crate::env::Namespace;
use crate::error::ReloadError;
use crate::reader::LineReader;
use crate::runner::{run_script, RunOutcome};
use crate::watcher::ChangeWatcher;

/// Text printed around the session.
#[derive(Debug, Clone, Default)]
pub struct InteractOptions {
    /// Printed once at startup. `None` prints the default banner, `Some("")` nothing.
    pub banner: Option<String>,
    /// Printed after the session ends. `None` prints a blank line, `Some("")` nothing.
    pub exit_message: Option<String>,
}

pub fn default_banner() -> String {
    format!("Forge {} on {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
}

/// Run the reload session on the process's stdin and stdout.
pub async fn interact_stdio(path: &Path, options: &InteractOptions) -> Result<i32, ReloadError> {
    let input = BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();
    interact(path, input, &mut out, options).await
}

/// Watch `path`, run it, and serve a console over its bindings until input
/// ends. Every change to the file aborts the console, re-runs the script and
/// starts a new console.
///
/// Returns the session's exit code: 0 at end of input, or the code passed to
/// `exit` at the prompt. Must be called from inside a
/// [`tokio::task::LocalSet`].
pub async fn interact<R, W>(
    path: &Path,
    input: R,
    out: &mut W,
    options: &InteractOptions,
) -> Result<i32, ReloadError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let watcher = ChangeWatcher::open(path)?;

    let banner = options.banner.clone().unwrap_or_else(default_banner);
    if !banner.is_empty() {
        writeln!(out, "{}", banner)?;
    }

    let mut reader = LineReader::new(watcher, input);
    let mut cycle = 0usize;
    let code = loop {
        let namespace = load(path, out).await?;
        debug!(cycle, bindings = namespace.len(), "starting console");
        let mut console = Console::new(namespace, path, &mut reader);
        match console.interact(out).await? {
            ConsoleExit::Aborted => {
                writeln!(out)?;
                writeln!(out, "{}", "Reloading...".yellow())?;
                cycle += 1;
            }
            ConsoleExit::Done(code) => break code,
        }
    };

    reader.into_changes().close();
    match options.exit_message.as_deref() {
        None => writeln!(out)?,
        Some("") => {}
        Some(message) => writeln!(out, "{}", message)?,
    }
    out.flush()?;
    info!(code, reloads = cycle, "session finished");
    Ok(code)
}

/// Run the script; a failure is reported once and leaves an empty namespace.
async fn load<W: Write>(path: &Path, out: &mut W) -> Result<Namespace, ReloadError> {
    match run_script(path).await {
        RunOutcome::Bindings(namespace) => Ok(namespace),
        RunOutcome::Failed(failure) => {
            let line = format!("Error running {}: {}", path.display(), failure);
            writeln!(out, "{}", line.as_str().red())?;
            Ok(Namespace::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::LocalSet;

    use super::*;

    fn quiet() -> InteractOptions {
        InteractOptions {
            banner: Some(String::new()),
            exit_message: Some(String::new()),
        }
    }

    async fn session(script: &str, input: &'static [u8], options: InteractOptions) -> (i32, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.forge");
        std::fs::write(&path, script).unwrap();
        let mut out = Vec::new();
        let code = LocalSet::new()
            .run_until(interact(&path, input, &mut out, &options))
            .await
            .unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn console_sees_the_script_bindings() {
        let (code, out) = session("x = 1\n", b"x + 1\n", quiet()).await;
        assert_eq!(code, 0);
        assert_eq!(out, ">>> 2\n>>> ");
    }

    #[tokio::test]
    async fn failed_run_is_reported_once_and_console_starts_empty() {
        let (code, out) = session("x = 1\nexit(3)\n", b"x\n", quiet()).await;
        assert_eq!(code, 0);
        assert_eq!(out.matches("script requested exit with code 3").count(), 1);
        assert!(out.contains("Error running"), "{}", out);
        assert!(out.contains("Error: Variable 'x' not defined"), "{}", out);
    }

    #[tokio::test]
    async fn exit_typed_at_the_prompt_sets_the_code() {
        let (code, _) = session("", b"exit(5)\n", quiet()).await;
        assert_eq!(code, 5);
    }

    #[tokio::test]
    async fn banner_and_exit_message_defaults() {
        let (_, out) = session("", b"", InteractOptions::default()).await;
        assert_eq!(out, format!("{}\n>>> \n", default_banner()));

        let options = InteractOptions {
            banner: Some("hello".into()),
            exit_message: Some("bye".into()),
        };
        let (_, out) = session("", b"", options).await;
        assert_eq!(out, "hello\n>>> bye\n");
    }

    #[tokio::test]
    async fn missing_script_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.forge");
        let mut out = Vec::new();
        let result = LocalSet::new()
            .run_until(interact(&path, &b"x\n"[..], &mut out, &InteractOptions::default()))
            .await;
        assert!(matches!(result, Err(ReloadError::WatchSetupFailed { .. })));
        assert!(out.is_empty());
    }
}
