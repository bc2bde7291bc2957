//! Sync scheduling - manual and periodic modes.
//!
//! The scheduler owns a request queue. Callers send a request together with
//! a oneshot channel and await the outcome; the handle runs one request at a
//! time on a background task.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use notesync_common::{Error, ImageRef, NoteBundle, Result};

use crate::reconciler::SyncOutcome;

/// How full passes are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// Only on explicit request.
    #[default]
    Manual,
    /// On request and at a fixed interval.
    Periodic { interval: Duration },
}

impl SchedulerMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            SchedulerMode::Manual => None,
            SchedulerMode::Periodic { interval } => Some(*interval),
        }
    }
}

/// Work the scheduler can run.
#[derive(Debug, Clone)]
pub enum SyncRequest {
    /// Full reconciliation pass.
    Full,
    /// Force-push the given bundles.
    Upload(Vec<NoteBundle>),
    /// Delete the given images remotely.
    RemoveImages(Vec<ImageRef>),
    /// Stop the scheduler.
    Shutdown,
}

type Reply = oneshot::Sender<Result<SyncOutcome>>;

/// Front side of the scheduler: submit requests, change mode, shut down.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: Arc<watch::Sender<SchedulerMode>>,
    request_tx: mpsc::Sender<(SyncRequest, Reply)>,
}

impl SyncScheduler {
    /// Create a scheduler and the handle that runs it.
    pub fn new(mode: SchedulerMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let (mode_tx, mode_rx) = watch::channel(mode);

        let scheduler = Self {
            mode: Arc::new(mode_tx),
            request_tx,
        };
        let handle = SyncSchedulerHandle {
            mode: mode_rx,
            request_rx,
        };
        (scheduler, handle)
    }

    /// Request a full pass and wait for its outcome.
    pub async fn request_sync(&self) -> Result<SyncOutcome> {
        self.submit(SyncRequest::Full).await
    }

    pub async fn request_upload(&self, bundles: Vec<NoteBundle>) -> Result<SyncOutcome> {
        self.submit(SyncRequest::Upload(bundles)).await
    }

    pub async fn request_remove_images(&self, images: Vec<ImageRef>) -> Result<SyncOutcome> {
        self.submit(SyncRequest::RemoveImages(images)).await
    }

    async fn submit(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::Cancelled("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Cancelled("Scheduler dropped the request".to_string()))?
    }

    /// Change the mode; a new interval starts counting immediately.
    pub fn set_mode(&self, mode: SchedulerMode) {
        self.mode.send_replace(mode);
    }

    pub fn mode(&self) -> SchedulerMode {
        *self.mode.borrow()
    }

    /// Ask the loop to stop after the request it is running.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Back side of the scheduler, consumed by [`SyncSchedulerHandle::run`].
pub struct SyncSchedulerHandle {
    mode: watch::Receiver<SchedulerMode>,
    request_rx: mpsc::Receiver<(SyncRequest, Reply)>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler until shutdown or until every sender is dropped.
    ///
    /// Full requests that are already queued when a full pass starts are
    /// answered with that pass's outcome instead of running again.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncOutcome>> + Send,
    {
        let mut ticker = Self::ticker(*self.mode.borrow_and_update());
        let mut pending: Option<(SyncRequest, Reply)> = None;

        info!("Sync scheduler started ({:?})", *self.mode.borrow());

        loop {
            let next = match pending.take() {
                Some(item) => Some(item),
                None => {
                    tokio::select! {
                        received = self.request_rx.recv() => match received {
                            Some(item) => Some(item),
                            None => break,
                        },
                        Ok(()) = self.mode.changed() => {
                            let mode = *self.mode.borrow_and_update();
                            debug!("Scheduler mode changed to {:?}", mode);
                            ticker = Self::ticker(mode);
                            continue;
                        }
                        _ = Self::tick(&mut ticker) => None,
                    }
                }
            };

            match next {
                Some((SyncRequest::Shutdown, _)) => {
                    info!("Sync scheduler shutting down");
                    break;
                }
                Some((SyncRequest::Full, reply)) => {
                    let mut replies = vec![reply];
                    while let Ok(item) = self.request_rx.try_recv() {
                        match item {
                            (SyncRequest::Full, reply) => replies.push(reply),
                            other => {
                                pending = Some(other);
                                break;
                            }
                        }
                    }
                    if replies.len() > 1 {
                        debug!("Coalesced {} full sync requests", replies.len());
                    }
                    let result = sync_fn(SyncRequest::Full).await;
                    for reply in replies {
                        let _ = reply.send(clone_result(&result));
                    }
                }
                Some((request, reply)) => {
                    debug!("Processing sync request: {:?}", request);
                    let _ = reply.send(sync_fn(request).await);
                }
                None => {
                    debug!("Triggering periodic sync");
                    match sync_fn(SyncRequest::Full).await {
                        Ok(outcome) => info!(
                            "Periodic sync finished: {} (up {}, down {}, deleted {}, failed {})",
                            outcome.status,
                            outcome.uploaded,
                            outcome.downloaded,
                            outcome.remote_deleted,
                            outcome.failures.len()
                        ),
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }
        }
    }

    fn ticker(mode: SchedulerMode) -> Option<Interval> {
        mode.interval().filter(|d| !d.is_zero()).map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            ticker.reset();
            ticker
        })
    }

    async fn tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

fn clone_result(result: &Result<SyncOutcome>) -> Result<SyncOutcome> {
    match result {
        Ok(outcome) => Ok(outcome.clone()),
        Err(Error::Cancelled(msg)) => Err(Error::Cancelled(msg.clone())),
        Err(e) => Err(Error::Storage(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn spawn_counting(
        handle: SyncSchedulerHandle,
        delay: Duration,
    ) -> (Arc<AtomicU32>, tokio::task::JoinHandle<()>) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let task = tokio::spawn(async move {
            handle
                .run(move |_request| {
                    let count = count_clone.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        Ok(SyncOutcome::empty())
                    }
                })
                .await;
        });
        (count, task)
    }

    #[test]
    fn test_mode_change() {
        let (scheduler, _handle) = SyncScheduler::new(SchedulerMode::Manual);
        scheduler.set_mode(SchedulerMode::Periodic {
            interval: Duration::from_secs(60),
        });
        assert!(matches!(scheduler.mode(), SchedulerMode::Periodic { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_to_periodic_at_runtime() {
        let (scheduler, handle) = SyncScheduler::new(SchedulerMode::Manual);
        let (count, task) = spawn_counting(handle, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.set_mode(SchedulerMode::Periodic {
            interval: Duration::from_secs(10),
        });
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_request() {
        let (scheduler, handle) = SyncScheduler::new(SchedulerMode::Manual);
        let (count, task) = spawn_counting(handle, Duration::ZERO);

        let outcome = scheduler.request_sync().await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_full_requests_coalesce() {
        let (scheduler, handle) = SyncScheduler::new(SchedulerMode::Manual);
        let (count, task) = spawn_counting(handle, Duration::from_millis(50));

        let first = scheduler.clone();
        let first = tokio::spawn(async move { first.request_sync().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Both arrive while the first pass is running.
        let (a, b) = tokio::join!(scheduler.request_sync(), scheduler.request_sync());
        assert!(a.is_ok() && b.is_ok());
        assert!(first.await.unwrap().is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_mode_triggers_passes() {
        let (scheduler, handle) = SyncScheduler::new(SchedulerMode::Periodic {
            interval: Duration::from_secs(60),
        });
        let (count, task) = spawn_counting(handle, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_shutdown_fails() {
        let (scheduler, handle) = SyncScheduler::new(SchedulerMode::Manual);
        let (_count, task) = spawn_counting(handle, Duration::ZERO);
        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(matches!(
            scheduler.request_sync().await,
            Err(Error::Cancelled(_))
        ));
    }
}
