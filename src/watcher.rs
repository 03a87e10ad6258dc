//! Change notification for the watched script.
//!
//! A [`ChangeWatcher`] registers a non-recursive `notify` watch on exactly one
//! path and forwards modification events into a [`ChangeQueue`]. The queue is
//! what the line reader waits on: [`ChangeSource::readiness`] resolves once an
//! event is pending, and [`ChangeSource::drain`] discards everything queued so
//! that a burst of saves produces a single reload.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::error::ReloadError;
use crate::eval::BoxFuture;

/// A source of "the file changed" notifications.
pub trait ChangeSource {
    /// Resolves once at least one change is pending. Cancel-safe.
    fn readiness(&mut self) -> BoxFuture<'_, ()>;

    /// Discard every pending change without blocking; returns how many were dropped.
    fn drain(&mut self) -> usize;
}

/// Pending change events, fed from any thread through an unbounded channel.
pub struct ChangeQueue {
    rx: UnboundedReceiver<EventKind>,
    pending: usize,
}

impl ChangeQueue {
    pub fn channel() -> (UnboundedSender<EventKind>, Self) {
        let (tx, rx) = unbounded_channel();
        (tx, Self { rx, pending: 0 })
    }
}

impl ChangeSource for ChangeQueue {
    fn readiness(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            while self.pending == 0 {
                match self.rx.recv().await {
                    Some(_) => self.pending += 1,
                    // every sender is gone, so nothing can become ready again
                    None => std::future::pending::<()>().await,
                }
            }
        })
    }

    fn drain(&mut self) -> usize {
        let mut drained = std::mem::take(&mut self.pending);
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

fn is_modification(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(m) if !matches!(m, ModifyKind::Metadata(_)))
}

/// Watch handle for the target script. At most one is open per session.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    path: PathBuf,
    queue: ChangeQueue,
}

impl ChangeWatcher {
    pub fn open(path: &Path) -> Result<Self, ReloadError> {
        let setup_failed = |source: notify::Error| ReloadError::WatchSetupFailed {
            path: path.to_path_buf(),
            source,
        };
        let (tx, queue) = ChangeQueue::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) if is_modification(&event.kind) => {
                    let _ = tx.send(event.kind);
                }
                Ok(_) => {}
                Err(e) => warn!("file watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(setup_failed)?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(setup_failed)?;

        info!(path = %path.display(), "watching script");
        Ok(Self {
            watcher,
            path: path.to_path_buf(),
            queue,
        })
    }

    /// Release the OS watch. Dropping the handle has the same effect.
    pub fn close(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.path) {
            debug!("unwatch {}: {}", self.path.display(), e);
        }
        info!(path = %self.path.display(), "stopped watching script");
    }
}

impl ChangeSource for ChangeWatcher {
    fn readiness(&mut self) -> BoxFuture<'_, ()> {
        self.queue.readiness()
    }

    fn drain(&mut self) -> usize {
        let drained = self.queue.drain();
        debug!(drained, "drained change events");
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;

    fn modify() -> EventKind {
        EventKind::Modify(ModifyKind::Any)
    }

    #[tokio::test]
    async fn drain_coalesces_every_pending_event() {
        let (tx, mut queue) = ChangeQueue::channel();
        for _ in 0..5 {
            tx.send(modify()).unwrap();
        }
        timeout(Duration::from_secs(1), queue.readiness()).await.unwrap();
        assert_eq!(queue.drain(), 5);
        assert_eq!(queue.drain(), 0);
        assert!(timeout(Duration::from_millis(50), queue.readiness()).await.is_err());
    }

    #[tokio::test]
    async fn readiness_does_not_lose_the_event_it_saw() {
        let (tx, mut queue) = ChangeQueue::channel();
        tx.send(modify()).unwrap();
        queue.readiness().await;
        queue.readiness().await;
        assert_eq!(queue.drain(), 1);
    }

    #[test]
    fn metadata_and_access_events_are_ignored() {
        use notify::event::{AccessKind, DataChange, MetadataKind};
        assert!(is_modification(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_modification(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))));
        assert!(!is_modification(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn missing_path_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.forge");
        match ChangeWatcher::open(&missing) {
            Err(ReloadError::WatchSetupFailed { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected setup failure, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn writes_to_the_file_become_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.forge");
        std::fs::write(&path, "x = 1\n").unwrap();

        let mut watcher = ChangeWatcher::open(&path).unwrap();
        std::fs::write(&path, "x = 2\n").unwrap();
        std::fs::write(&path, "x = 3\n").unwrap();
        sleep(Duration::from_millis(300)).await;

        timeout(Duration::from_secs(5), watcher.readiness())
            .await
            .expect("change should be observed");
        assert!(watcher.drain() >= 1);
        assert_eq!(watcher.drain(), 0);
        watcher.close();
    }
}
