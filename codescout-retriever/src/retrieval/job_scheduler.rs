//! Single-slot background execution for indexing runs.
//!
//! At most one indexing job executes at a time: submissions go through a
//! capacity-1 channel consumed by one dedicated worker task. Each job owns
//! a row in the `jobs` table; progress streams into that row and callers
//! poll it by id. There is no cancellation and no timeout. A failing job is
//! recorded as failed with its error message and never takes the worker
//! down.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::indexing_engine::{FileSelection, IndexProgress, IndexingEngine};
use super::snapshot_index::{JobRecord, SnapshotIndex};

struct JobRequest {
    job_id: i64,
    engine: Arc<IndexingEngine>,
    selection: FileSelection,
}

/// Owns the worker task and the job table lifecycle.
pub struct JobScheduler {
    snapshot: SnapshotIndex,
    sender: mpsc::Sender<JobRequest>,
}

impl JobScheduler {
    /// Spawn the worker loop. The scheduler is cheap to clone the handle
    /// parts of; one instance per process is the intended shape.
    pub fn new(snapshot: SnapshotIndex) -> Self {
        let (sender, receiver) = mpsc::channel::<JobRequest>(1);
        tokio::spawn(worker_loop(snapshot.clone(), receiver));
        Self { snapshot, sender }
    }

    /// Queue an indexing run and return its job id for polling. Blocks
    /// only while the single queue slot is occupied.
    pub async fn submit(
        &self,
        engine: Arc<IndexingEngine>,
        selection: FileSelection,
    ) -> Result<i64> {
        let job_id = self.snapshot.create_job(engine.workspace_id()).await?;
        info!("Queued indexing job {job_id}");
        self.sender
            .send(JobRequest {
                job_id,
                engine,
                selection,
            })
            .await
            .map_err(|_| anyhow::anyhow!("job worker has shut down"))?;
        Ok(job_id)
    }

    /// Poll a job's current state, progress, and outcome.
    pub async fn status(&self, job_id: i64) -> Result<Option<JobRecord>> {
        self.snapshot.get_job(job_id).await
    }
}

async fn worker_loop(snapshot: SnapshotIndex, mut receiver: mpsc::Receiver<JobRequest>) {
    while let Some(request) = receiver.recv().await {
        let job_id = request.job_id;
        if let Err(err) = run_job(&snapshot, request).await {
            // Failures are terminal for the job, never for the loop.
            error!("Indexing job {job_id} failed: {err:#}");
            if let Err(db_err) = snapshot.fail_job(job_id, &format!("{err:#}")).await {
                error!("Could not record failure for job {job_id}: {db_err:#}");
            }
        }
    }
}

async fn run_job(snapshot: &SnapshotIndex, request: JobRequest) -> Result<()> {
    let JobRequest {
        job_id,
        engine,
        selection,
    } = request;
    snapshot.set_job_running(job_id).await?;
    info!("Indexing job {job_id} running");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<IndexProgress>();
    let progress_writer = {
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let _ = snapshot
                    .update_job_progress(
                        job_id,
                        progress.fraction,
                        progress.processed as i64,
                        progress.total as i64,
                        &progress.message,
                    )
                    .await;
            }
        })
    };

    let callback = Box::new(move |progress: IndexProgress| {
        let _ = progress_tx.send(progress);
    });
    let outcome = engine.run(selection, Some(callback)).await;
    // Callback dropped with the run; drain the remaining updates.
    let _ = progress_writer.await;

    let summary = outcome?;
    snapshot
        .finish_job(job_id, &serde_json::to_string(&summary)?)
        .await?;
    info!(
        "Indexing job {job_id} finished: {}/{} files changed",
        summary.files_changed, summary.files_total
    );
    Ok(())
}
