use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, RevoiceError};
use crate::job::{Candidate, Job};
use crate::lock::{LockCoordinator, LockOutcome, LockRecord};
use crate::pipeline::{PipelineReport, StagePipeline};

/// How a single job ended. Only `Failed` is an error; everything else is a
/// normal answer the batch moves past.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(PipelineReport),
    AlreadyDone,
    Busy { holder: Option<LockRecord> },
    MissingVideo,
    Interrupted,
    Failed(RevoiceError),
}

/// Tally of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub completed: usize,
    pub already_done: usize,
    pub busy: usize,
    pub missing_video: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub interrupted: bool,
}

impl BatchSummary {
    fn record(&mut self, subtitle: PathBuf, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::AlreadyDone => self.already_done += 1,
            JobOutcome::Busy { .. } => self.busy += 1,
            JobOutcome::MissingVideo => self.missing_video += 1,
            JobOutcome::Interrupted => self.interrupted = true,
            JobOutcome::Failed(e) => self.failed.push((subtitle, e.to_string())),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct JobRunner {
    coordinator: LockCoordinator,
    pipeline: StagePipeline,
}

impl JobRunner {
    pub fn new(coordinator: LockCoordinator, pipeline: StagePipeline) -> Self {
        Self {
            coordinator,
            pipeline,
        }
    }

    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// Run `job` if no live worker holds it. The lock is released on every
    /// exit path; dropping this future mid-run releases it through the handle.
    pub async fn run(&self, job: &Job) -> JobOutcome {
        let output = job.final_output();
        if output.is_file() {
            info!("Skipping {}: {} already exists", job.stem, output.display());
            return JobOutcome::AlreadyDone;
        }

        match self.run_locked(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to run {}: {}", job.stem, e);
                JobOutcome::Failed(e)
            }
        }
    }

    async fn run_locked(&self, job: &Job) -> Result<JobOutcome> {
        self.coordinator.recover_if_stale(&job.work_dir)?;

        let handle = match self.coordinator.acquire(&job.work_dir)? {
            LockOutcome::Acquired(handle) => handle,
            LockOutcome::Busy { holder } => {
                info!(
                    "Skipping {}: locked by {}",
                    job.stem,
                    holder.as_ref().map(|h| h.worker_id.as_str()).unwrap_or("unknown worker")
                );
                return Ok(JobOutcome::Busy { holder });
            }
        };

        info!("Processing {} as {}", job.subtitle.display(), self.coordinator.worker_id());
        let result = self.pipeline.run(job).await;

        if let Err(e) = handle.release().await {
            warn!("Could not release lock for {}: {}", job.stem, e);
        }

        Ok(match result {
            Ok(report) => {
                info!("Finished {} -> {}", job.stem, job.final_output().display());
                JobOutcome::Completed(report)
            }
            Err(e) => JobOutcome::Failed(e),
        })
    }

    pub async fn run_candidate(&self, candidate: &Candidate) -> JobOutcome {
        match candidate {
            Candidate::Ready(job) => self.run(job).await,
            Candidate::MissingVideo { subtitle } => {
                warn!("No video found for {}", subtitle.display());
                JobOutcome::MissingVideo
            }
        }
    }

    /// Run candidates one after another. A failing job never stops the batch;
    /// cancelling `cancel` abandons the current job and stops.
    pub async fn run_batch(&self, candidates: &[Candidate], cancel: &CancellationToken) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for (i, candidate) in candidates.iter().enumerate() {
            let subtitle = match candidate {
                Candidate::Ready(job) => job.subtitle.clone(),
                Candidate::MissingVideo { subtitle } => subtitle.clone(),
            };
            info!("[{}/{}] {}", i + 1, candidates.len(), subtitle.display());

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => JobOutcome::Interrupted,
                outcome = self.run_candidate(candidate) => outcome,
            };
            summary.record(subtitle, &outcome);

            if summary.interrupted {
                warn!("Interrupted; {} job(s) not started", candidates.len() - i - 1);
                break;
            }
        }

        info!(
            "Batch done: {} completed, {} already done, {} busy, {} missing video, {} failed",
            summary.completed,
            summary.already_done,
            summary.busy,
            summary.missing_video,
            summary.failed.len()
        );
        summary
    }
}
