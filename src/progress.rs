use crate::error::{AdbError, AdbResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of a file transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Expected size in bytes; 0 when unknown.
    pub total: u64,
    /// Bytes copied so far. Never decreases.
    pub completed: u64,
    /// Set once the transfer has ended, successfully or not. No further
    /// updates follow.
    pub finished: bool,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            finished: false,
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}

/// Producer side of a transfer, held by the copy loop.
///
/// Publishing replaces the latest value and never waits for observers;
/// intermediate ticks an observer misses are coalesced.
#[derive(Debug, Clone)]
pub struct Reporter {
    progress: Arc<watch::Sender<TransferProgress>>,
    copied: Arc<watch::Sender<bool>>,
}

impl Reporter {
    /// Record `n` more bytes copied.
    pub fn advance(&self, n: usize) {
        self.progress.send_modify(|p| p.completed += n as u64);
    }

    /// Signal that the byte-copy loop is over. The operation may still be
    /// waiting for the server's acknowledgment.
    pub fn copy_finished(&self) {
        self.copied.send_replace(true);
    }

    fn finish(&self) {
        self.progress.send_modify(|p| p.finished = true);
        self.copied.send_replace(true);
    }
}

/// Marks the progress finished when dropped, so a cancelled copy loop
/// freezes its snapshot too.
struct FinishOnDrop(Reporter);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Handle to a file transfer running in the background.
///
/// Three signals can be awaited independently: every progress update
/// (`subscribe` + `changed`), the end of the copy loop (`copy_finished`) and
/// the end of the whole operation (`wait`).
#[derive(Debug)]
pub struct Transfer {
    progress: watch::Receiver<TransferProgress>,
    copied: watch::Receiver<bool>,
    task: JoinHandle<AdbResult<u64>>,
}

impl Transfer {
    /// Spawn `body` on the runtime. It receives the reporter and returns the
    /// number of bytes transferred.
    pub fn spawn<F, Fut>(total: u64, body: F) -> Self
    where
        F: FnOnce(Reporter) -> Fut + Send + 'static,
        Fut: Future<Output = AdbResult<u64>> + Send + 'static,
    {
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::new(total));
        let (copied_tx, copied_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let reporter = Reporter {
                progress: Arc::new(progress_tx),
                copied: Arc::new(copied_tx),
            };
            let _finish = FinishOnDrop(reporter.clone());
            body(reporter).await
        });
        Self {
            progress: progress_rx,
            copied: copied_rx,
            task,
        }
    }

    /// The latest snapshot. Never blocks the transfer.
    pub fn progress(&self) -> TransferProgress {
        *self.progress.borrow()
    }

    /// A receiver that is notified after each chunk.
    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.progress.clone()
    }

    /// Wait until the byte-copy loop has ended.
    pub async fn copy_finished(&mut self) {
        // An error means the task is gone, which also ends the copy.
        let _ = self.copied.wait_for(|copied| *copied).await;
    }

    /// Cancel the transfer; its connection is dropped and closed.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the whole operation, including the server's acknowledgment.
    pub async fn wait(self) -> AdbResult<u64> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AdbError::network("transfer cancelled")),
            Err(e) => Err(AdbError::assertion(format!("transfer task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::sync::oneshot;

    #[test]
    fn test_fraction() {
        let mut p = TransferProgress::new(200);
        assert_eq!(p.fraction(), 0.0);
        p.completed = 50;
        assert_eq!(p.fraction(), 0.25);
        p.completed = 300;
        assert_eq!(p.fraction(), 1.0);

        let mut empty = TransferProgress::new(0);
        assert_eq!(empty.fraction(), 0.0);
        empty.finished = true;
        assert_eq!(empty.fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_progress_is_observable_while_running() {
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let mut transfer = Transfer::spawn(10, move |reporter| async move {
            reporter.advance(4);
            let _ = go_rx.await;
            reporter.advance(6);
            reporter.copy_finished();
            Ok(10)
        });

        let mut rx = transfer.subscribe();
        rx.wait_for(|p| p.completed >= 4).await.unwrap();
        assert!(!transfer.progress().finished);

        go_tx.send(()).unwrap();
        transfer.copy_finished().await;
        assert_eq!(transfer.wait().await.unwrap(), 10);
        let last = *rx.borrow();
        assert_eq!(last.completed, 10);
        assert!(last.finished);
    }

    #[tokio::test]
    async fn test_failure_still_finishes_progress() {
        let mut transfer = Transfer::spawn(10, |reporter| async move {
            reporter.advance(3);
            Err(AdbError::network("connection closed by peer"))
        });
        transfer.copy_finished().await;
        let rx = transfer.subscribe();
        let err = transfer.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        let last = *rx.borrow();
        assert_eq!(last.completed, 3);
        assert!(last.finished);
    }

    #[tokio::test]
    async fn test_abort_cancels() {
        let transfer = Transfer::spawn(10, |_reporter| async move {
            std::future::pending::<()>().await;
            Ok(0)
        });
        transfer.abort();
        let err = transfer.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_abort_finishes_progress() {
        let mut transfer = Transfer::spawn(10, |reporter| async move {
            reporter.advance(3);
            std::future::pending::<()>().await;
            Ok(3)
        });
        let mut rx = transfer.subscribe();
        rx.wait_for(|p| p.completed == 3).await.unwrap();
        assert!(!transfer.progress().finished);

        transfer.abort();
        transfer.copy_finished().await;
        let err = transfer.wait().await.unwrap_err();
        assert_eq!(err.message(), "transfer cancelled");

        let last = *rx.borrow();
        assert_eq!(last.completed, 3);
        assert!(last.finished);
    }
}
