//! Per-feed async driver
//!
//! The manager is a single logical actor. When snapshots, deltas and
//! checksums arrive from several transports (REST snapshot fetcher,
//! WebSocket stream, ...) this driver serialises them: one tokio task
//! owns the manager and drains a bounded command channel.
//!
//! Resync requests and fatal errors leave the task on an unbounded notice
//! channel so the driver never blocks on a slow consumer. Queries are
//! answered over `oneshot` channels.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use feed_types::errors::ReconcileError;
use feed_types::ids::FeedKey;

use crate::apply::DeltaTarget;
use crate::delta::Delta;
use crate::manager::ReconciliationManager;
use crate::snapshot::Snapshot;
use crate::state::ResyncRequest;
use crate::stats::ReconcileStats;

/// Commands accepted by a feed driver.
#[derive(Debug)]
pub enum FeedCommand<T> {
    Snapshot { data: T, sequence_id: Option<u64> },
    Delta(Delta),
    Checksum { expected: String },
    Resync,
    Reset,
    Stats { response: oneshot::Sender<ReconcileStats> },
    CurrentSnapshot { response: oneshot::Sender<Option<Snapshot<T>>> },
    Shutdown,
}

/// Outbound notifications from a feed driver.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedNotice {
    Resync(ResyncRequest),
    Fatal(ReconcileError),
}

/// Cloneable sender side of a running driver.
#[derive(Debug)]
pub struct FeedHandle<T> {
    key: FeedKey,
    commands: mpsc::Sender<FeedCommand<T>>,
}

impl<T> Clone for FeedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl<T> FeedHandle<T> {
    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    fn closed(&self) -> ReconcileError {
        ReconcileError::DriverClosed {
            feed: self.key.to_string(),
        }
    }

    async fn send(&self, command: FeedCommand<T>) -> Result<(), ReconcileError> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    pub async fn snapshot(&self, data: T, sequence_id: Option<u64>) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Snapshot { data, sequence_id }).await
    }

    pub async fn delta(&self, delta: Delta) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Delta(delta)).await
    }

    pub async fn checksum(&self, expected: impl Into<String>) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Checksum {
            expected: expected.into(),
        })
        .await
    }

    pub async fn resync(&self) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Resync).await
    }

    pub async fn reset(&self) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Reset).await
    }

    pub async fn stats(&self) -> Result<ReconcileStats, ReconcileError> {
        let (response, rx) = oneshot::channel();
        self.send(FeedCommand::Stats { response }).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn current_snapshot(&self) -> Result<Option<Snapshot<T>>, ReconcileError> {
        let (response, rx) = oneshot::channel();
        self.send(FeedCommand::CurrentSnapshot { response }).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Stop the driver after the commands already queued.
    pub async fn shutdown(&self) -> Result<(), ReconcileError> {
        self.send(FeedCommand::Shutdown).await
    }
}

/// Spawn a driver task owning `manager`.
///
/// Any resync sink already installed on the manager is replaced by the
/// notice channel. The task ends on `Shutdown` or when every handle is
/// dropped, and yields the final statistics.
pub fn spawn_feed<T>(
    manager: ReconciliationManager<T>,
    capacity: usize,
) -> (FeedHandle<T>, mpsc::UnboundedReceiver<FeedNotice>, JoinHandle<ReconcileStats>)
where
    T: DeltaTarget + Send + 'static,
{
    let key = manager.key().clone();
    let (commands, mut inbox) = mpsc::channel(capacity.max(1));
    let (notices, notice_rx) = mpsc::unbounded_channel();

    let resync_notices = notices.clone();
    let mut manager = manager.with_resync_sink(move |request: &ResyncRequest| {
        let _ = resync_notices.send(FeedNotice::Resync(request.clone()));
    });

    info!(feed = %key, capacity = capacity, "Feed driver started");

    let task = tokio::spawn(async move {
        while let Some(command) = inbox.recv().await {
            let result = match command {
                FeedCommand::Snapshot { data, sequence_id } => {
                    manager.handle_snapshot(data, sequence_id);
                    Ok(())
                }
                FeedCommand::Delta(delta) => manager.handle_delta(delta).map(|_| ()),
                FeedCommand::Checksum { expected } => {
                    manager.validate_checksum(&expected).map(|_| ())
                }
                FeedCommand::Resync => {
                    manager.request_resync();
                    Ok(())
                }
                FeedCommand::Reset => {
                    manager.reset();
                    Ok(())
                }
                FeedCommand::Stats { response } => {
                    let _ = response.send(manager.stats());
                    Ok(())
                }
                FeedCommand::CurrentSnapshot { response } => {
                    let _ = response.send(manager.snapshot());
                    Ok(())
                }
                FeedCommand::Shutdown => break,
            };

            if let Err(e) = result {
                let _ = notices.send(FeedNotice::Fatal(e));
            }
        }

        let stats = manager.stats();
        debug!(feed = %manager.key(), stats = ?stats, "Feed driver stopped");
        stats
    });

    (FeedHandle { key, commands }, notice_rx, task)
}
