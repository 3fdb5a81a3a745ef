//! Tracking of long-running metadata jobs.
//!
//! Every identify/match/reset operation runs as a background Tokio task
//! registered with the [`MetadataJobTracker`]. The tracker hands the task an
//! event sender, broadcasts the task's lifecycle to any number of observers,
//! and retains terminal state for a bounded window so a subscriber that
//! attaches after completion still observes the terminal events.
//!
//! Observers are deliberately decoupled from execution: dropping an event
//! stream never cancels the underlying task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use shiori_common::{MediaServerSeriesId, MetadataJobId};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Broadcast capacity per job. Events beyond this are dropped for slow
/// observers (they see a gap, never a stall).
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of one job. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One event in a job's ordered lifecycle feed.
///
/// `Completion` is always the last event of a job and is idempotent to
/// re-observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MetadataJobEvent {
    Started,
    /// A provider accepted the match for the series being processed.
    SeriesMatched { provider: String },
    /// Metadata writes for one series have begun.
    PostProcessingStarted { series_id: MediaServerSeriesId },
    /// A failure was recorded; the job still runs to completion.
    PostProcessingError { reason: String },
    Completion,
}

/// Handle given to a running task for publishing progress events.
#[derive(Clone)]
pub struct JobEventSender {
    tx: broadcast::Sender<MetadataJobEvent>,
}

impl JobEventSender {
    /// Publish an event. Lack of observers is not an error.
    pub fn send(&self, event: MetadataJobEvent) {
        let _ = self.tx.send(event);
    }

    /// A sender whose events go nowhere, for callers running outside a
    /// tracked job (one-shot CLI invocations).
    pub fn discard() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }
}

struct JobEntry {
    description: String,
    status: RwLock<JobStatus>,
    tx: broadcast::Sender<MetadataJobEvent>,
    /// Terminal event tail, stored before broadcast so a subscriber can
    /// never fall between "sent" and "recorded".
    terminal: RwLock<Option<Vec<MetadataJobEvent>>>,
}

/// Registry of in-flight and recently finished metadata jobs.
///
/// The registry is the only shared mutable structure of the pipeline;
/// insert/lookup/expiry never block event producers.
pub struct MetadataJobTracker {
    jobs: DashMap<MetadataJobId, Arc<JobEntry>>,
    retention: Duration,
}

impl MetadataJobTracker {
    /// `retention` is how long terminal job state stays queryable.
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            retention,
        })
    }

    /// Schedule `task` on the runtime immediately and return its job id.
    ///
    /// The task receives a [`JobEventSender`] for progress events. `Started`
    /// is emitted before the task body runs; any error or panic becomes a
    /// `PostProcessingError` followed by `Completion`, so the job always
    /// reaches a terminal state.
    pub fn submit<F, Fut>(self: &Arc<Self>, description: impl Into<String>, task: F) -> MetadataJobId
    where
        F: FnOnce(JobEventSender) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job_id = MetadataJobId::new();
        let description = description.into();
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let entry = Arc::new(JobEntry {
            description: description.clone(),
            status: RwLock::new(JobStatus::Pending),
            tx: tx.clone(),
            terminal: RwLock::new(None),
        });
        self.jobs.insert(job_id, entry.clone());

        info!(job_id = %job_id, description = %description, "Submitting metadata job");

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            *entry.status.write() = JobStatus::Running;
            let _ = tx.send(MetadataJobEvent::Started);

            let sender = JobEventSender { tx: tx.clone() };
            let result = std::panic::AssertUnwindSafe(task(sender))
                .catch_unwind()
                .await;

            let (status, tail) = match result {
                Ok(Ok(())) => (JobStatus::Completed, vec![MetadataJobEvent::Completion]),
                Ok(Err(e)) => {
                    warn!(job_id = %job_id, error = %e, "Metadata job failed");
                    (
                        JobStatus::Failed,
                        vec![
                            MetadataJobEvent::PostProcessingError {
                                reason: format!("{e:#}"),
                            },
                            MetadataJobEvent::Completion,
                        ],
                    )
                }
                Err(_) => {
                    warn!(job_id = %job_id, "Metadata job panicked");
                    (
                        JobStatus::Failed,
                        vec![
                            MetadataJobEvent::PostProcessingError {
                                reason: "internal error".to_string(),
                            },
                            MetadataJobEvent::Completion,
                        ],
                    )
                }
            };

            // Record the terminal tail before broadcasting it.
            *entry.terminal.write() = Some(tail.clone());
            *entry.status.write() = status;
            for event in tail {
                let _ = tx.send(event);
            }

            info!(
                job_id = %job_id,
                description = %entry.description,
                status = ?status,
                "Metadata job finished"
            );

            tokio::time::sleep(tracker.retention).await;
            tracker.jobs.remove(&job_id);
        });

        job_id
    }

    /// Current status of a job, or `None` when unknown or expired.
    pub fn status(&self, job_id: &MetadataJobId) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|entry| *entry.status.read())
    }

    /// Subscribe to a job's event feed.
    ///
    /// Returns `None` for unknown (including expired) job ids. A live
    /// subscriber receives events from subscription time forward and the
    /// stream ends after `Completion`; a subscriber attaching after the job
    /// finished receives the terminal tail (error, if any, then
    /// `Completion`).
    pub fn get_metadata_job_events(
        &self,
        job_id: &MetadataJobId,
    ) -> Option<BoxStream<'static, MetadataJobEvent>> {
        let entry = self.jobs.get(job_id)?.clone();
        let rx = entry.tx.subscribe();

        // Terminal check must come after subscribing: either the tail was
        // already recorded (replay it) or it will arrive on the channel.
        if let Some(tail) = entry.terminal.read().clone() {
            return Some(futures::stream::iter(tail).boxed());
        }

        let stream = futures::stream::unfold((rx, false), |(mut rx, done)| async move {
            if done {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = matches!(event, MetadataJobEvent::Completion);
                        return Some((event, (rx, terminal)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Job event observer lagged; skipping");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Some(stream.boxed())
    }
}
