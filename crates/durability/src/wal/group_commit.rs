//! Group commit (§4.6): concurrent committers deposit a flush request
//! and block; a single flusher thread drains up to `max_group_size`
//! requests (or whatever arrived within `max_wait`), flushes once, and
//! wakes every waiter. One `fsync` regardless of committer count.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sharpcore_core::{Error, Result};
use tracing::warn;

/// Tuning knobs for the group commit flusher.
#[derive(Debug, Clone, Copy)]
pub struct GroupCommitConfig {
    pub max_group_size: usize,
    pub max_wait: Duration,
}

impl Default for GroupCommitConfig {
    fn default() -> Self {
        GroupCommitConfig {
            max_group_size: 64,
            max_wait: Duration::from_micros(800),
        }
    }
}

type Ack = Sender<Result<()>>;

/// Handle committers use to enqueue a flush request and block for its
/// result.
pub struct GroupCommitter {
    request_tx: Sender<Ack>,
}

impl GroupCommitter {
    /// Start the background flusher. `flush` is called at most once
    /// per batch and should perform the actual `fsync`-equivalent
    /// durability step (e.g. `FileStorageProvider::flush_pending`).
    pub fn start<F>(config: GroupCommitConfig, flush: F) -> (Arc<Self>, JoinHandle<()>)
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Ack>();

        let handle = thread::spawn(move || {
            run_flusher(request_rx, config, flush);
        });

        (Arc::new(GroupCommitter { request_tx }), handle)
    }

    /// Deposit a commit request and block until this group (or a
    /// later one covering it) has been flushed.
    pub fn commit(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.request_tx
            .send(ack_tx)
            .map_err(|_| Error::NotReady("group commit flusher has shut down".into()))?;
        ack_rx
            .recv()
            .map_err(|_| Error::NotReady("group commit flusher dropped the request".into()))?
    }
}

fn run_flusher<F>(request_rx: Receiver<Ack>, config: GroupCommitConfig, flush: F)
where
    F: Fn() -> Result<()>,
{
    loop {
        let first = match request_rx.recv() {
            Ok(ack) => ack,
            Err(_) => return, // every GroupCommitter handle dropped
        };
        let mut acks = vec![first];
        let deadline = std::time::Instant::now() + config.max_wait;

        while acks.len() < config.max_group_size {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match request_rx.recv_timeout(remaining) {
                Ok(ack) => acks.push(ack),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let result = flush();
        if let Err(err) = &result {
            warn!(?err, "group commit flush failed");
        }
        for ack in acks {
            let _ = ack.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn concurrent_commits_share_one_flush() {
        let flush_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flush_count);
        let config = GroupCommitConfig {
            max_group_size: 8,
            max_wait: Duration::from_millis(20),
        };
        let (committer, _handle) = GroupCommitter::start(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut threads = Vec::new();
        for _ in 0..8 {
            let committer = Arc::clone(&committer);
            threads.push(thread::spawn(move || committer.commit().unwrap()));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert!(flush_count.load(Ordering::SeqCst) < 8);
    }

    #[test]
    fn single_commit_still_flushes() {
        let config = GroupCommitConfig::default();
        let (committer, _handle) = GroupCommitter::start(config, || Ok(()));
        assert!(committer.commit().is_ok());
    }
}
