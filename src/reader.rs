use std::io::{self, Write};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

use crate::watcher::ChangeSource;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadEvent {
    /// One input line, terminator stripped.
    Line(String),
    /// The watched file changed while waiting; nothing was read.
    Abort,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("end of input")]
    EndOfInput,
    /// Ctrl-C arrived while waiting at the prompt.
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads console lines while listening for changes to the watched file.
pub struct LineReader<C, R> {
    changes: C,
    input: Lines<R>,
}

impl<C, R> LineReader<C, R>
where
    C: ChangeSource,
    R: AsyncBufRead + Unpin,
{
    pub fn new(changes: C, input: R) -> Self {
        Self {
            changes,
            input: input.lines(),
        }
    }

    /// Print `prompt`, then wait for whichever comes first: a line of input,
    /// a change notification or Ctrl-C. A change wins a tie and leaves the
    /// input untouched.
    pub async fn read_line<W: Write>(&mut self, prompt: &str, out: &mut W) -> Result<ReadEvent, ReadError> {
        write!(out, "{}", prompt)?;
        out.flush()?;

        tokio::select! {
            biased;

            _ = self.changes.readiness() => {
                let drained = self.changes.drain();
                debug!(drained, "input wait aborted by file change");
                Ok(ReadEvent::Abort)
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                debug!("input wait interrupted");
                Err(ReadError::Interrupted)
            }
            line = self.input.next_line() => match line? {
                Some(line) => Ok(ReadEvent::Line(line)),
                None => Err(ReadError::EndOfInput),
            },
        }
    }

    pub fn changes_mut(&mut self) -> &mut C {
        &mut self.changes
    }

    pub fn into_changes(self) -> C {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use notify::event::{EventKind, ModifyKind};
    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;
    use crate::watcher::ChangeQueue;

    const MODIFY: EventKind = EventKind::Modify(ModifyKind::Any);

    #[tokio::test]
    async fn returns_lines_then_end_of_input() {
        let (_tx, queue) = ChangeQueue::channel();
        let mut reader = LineReader::new(queue, &b"first\r\nsecond\nlast"[..]);
        let mut out = Vec::new();

        assert_eq!(reader.read_line(">>> ", &mut out).await.unwrap(), ReadEvent::Line("first".into()));
        assert_eq!(reader.read_line(">>> ", &mut out).await.unwrap(), ReadEvent::Line("second".into()));
        assert_eq!(reader.read_line(">>> ", &mut out).await.unwrap(), ReadEvent::Line("last".into()));
        assert!(matches!(reader.read_line(">>> ", &mut out).await, Err(ReadError::EndOfInput)));
        assert_eq!(String::from_utf8(out).unwrap(), ">>> >>> >>> >>> ");
    }

    #[tokio::test]
    async fn change_wins_over_ready_input_without_consuming_it() {
        let (tx, queue) = ChangeQueue::channel();
        let mut reader = LineReader::new(queue, &b"x + 1\n"[..]);
        let mut out = Vec::new();
        for _ in 0..3 {
            tx.send(MODIFY).unwrap();
        }

        assert_eq!(reader.read_line(">>> ", &mut out).await.unwrap(), ReadEvent::Abort);
        assert_eq!(reader.changes_mut().drain(), 0);
        assert_eq!(reader.read_line(">>> ", &mut out).await.unwrap(), ReadEvent::Line("x + 1".into()));
    }

    #[tokio::test]
    async fn change_aborts_a_blocked_read() {
        let (tx, queue) = ChangeQueue::channel();
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(queue, BufReader::new(server));
        let mut out = Vec::new();

        // half a line is typed, then the file is saved
        client.write_all(b"partial").await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(MODIFY).unwrap();
        });

        let event = tokio::time::timeout(Duration::from_secs(2), reader.read_line(">>> ", &mut out))
            .await
            .expect("read should be aborted")
            .unwrap();
        assert_eq!(event, ReadEvent::Abort);
    }
}
