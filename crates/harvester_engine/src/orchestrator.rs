//! Runs many site harvests in fixed-size job batches and writes their output.
//!
//! A failed job never stops its siblings. Every job gets a JSON/CSV pair, an
//! empty one when its harvest was fatal, and successful jobs are merged into an
//! optional combined pair.

use engine_logging::{engine_error, engine_info, engine_warn};
use futures_util::future::join_all;
use harvester_core::{merge_records, HarvestResult, HarvestSummary, MergeOrder, Target};
use tokio_util::sync::CancellationToken;

use crate::discover::PaginationDiscoverer;
use crate::export::{ExportError, OutputPaths, OutputSink};
use crate::extract::RecordExtractor;
use crate::fetch::Fetcher;
use crate::filename::file_base_name;
use crate::progress::{NoopProgressSink, ProgressSink};
use crate::scheduler::BatchScheduler;
use crate::HarvestError;

/// Jobs harvested concurrently when the caller does not say otherwise.
pub const DEFAULT_JOB_BATCH: usize = 5;

static NOOP_SINK: NoopProgressSink = NoopProgressSink;

/// One site: what to fetch, how to find its pages, how to read its records.
pub struct HarvestJob {
    pub target: Target,
    pub discoverer: Box<dyn PaginationDiscoverer>,
    pub extractor: Box<dyn RecordExtractor>,
    /// Replaces the orchestrator's fetcher for this job, e.g. a readiness poller.
    pub fetcher: Option<Box<dyn Fetcher>>,
}

impl HarvestJob {
    pub fn new(
        target: Target,
        discoverer: Box<dyn PaginationDiscoverer>,
        extractor: Box<dyn RecordExtractor>,
    ) -> Self {
        Self {
            target,
            discoverer,
            extractor,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedOutput {
    pub base_name: String,
    pub order: MergeOrder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub base_name: String,
    pub summary: HarvestSummary,
    /// Set when the harvest itself was fatal.
    pub error: Option<String>,
    pub outputs: Option<OutputPaths>,
    pub output_error: Option<String>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.output_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
    pub combined: Option<OutputPaths>,
    pub records_with_email: usize,
    pub records_without_email: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }
}

pub struct Orchestrator<'a> {
    fetcher: &'a dyn Fetcher,
    output: &'a dyn OutputSink,
    progress: &'a dyn ProgressSink,
    cancel: CancellationToken,
    job_batch: usize,
    combined: Option<CombinedOutput>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, output: &'a dyn OutputSink) -> Self {
        Self {
            fetcher,
            output,
            progress: &NOOP_SINK,
            cancel: CancellationToken::new(),
            job_batch: DEFAULT_JOB_BATCH,
            combined: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_job_batch(mut self, size: usize) -> Self {
        self.job_batch = size.max(1);
        self
    }

    pub fn with_combined_output(mut self, combined: CombinedOutput) -> Self {
        self.combined = Some(combined);
        self
    }

    /// Harvests every job and writes per-job files, then the combined pair.
    ///
    /// Only a failure to write the combined pair, or a combined base name
    /// that would overwrite a job's files, is returned as an error.
    pub async fn run(&self, jobs: &[HarvestJob]) -> Result<RunReport, ExportError> {
        if let Some(combined) = &self.combined {
            if jobs
                .iter()
                .any(|job| file_base_name(&job.target.name) == combined.base_name)
            {
                return Err(ExportError::NameClash(combined.base_name.clone()));
            }
        }

        let mut report = RunReport::default();
        let mut harvested: Vec<HarvestResult> = Vec::new();
        let batches = jobs.len().div_ceil(self.job_batch);

        for (number, batch) in jobs.chunks(self.job_batch).enumerate() {
            let number = number + 1;
            engine_info!(
                "job batch {}/{}: {} sites",
                number,
                batches,
                batch.len()
            );
            let outcomes = join_all(batch.iter().map(|job| self.harvest(job))).await;

            let mut ok = 0;
            for (job, outcome) in batch.iter().zip(outcomes) {
                let (job_report, result) = self.settle_job(job, outcome);
                if job_report.succeeded() {
                    ok += 1;
                }
                if let Some(result) = result {
                    harvested.push(result);
                }
                report.jobs.push(job_report);
            }
            engine_info!(
                "job batch {}/{} done: {} succeeded, {} failed",
                number,
                batches,
                ok,
                batch.len() - ok
            );
        }

        let order = self
            .combined
            .as_ref()
            .map(|c| c.order)
            .unwrap_or_default();
        let merged = merge_records(&harvested, order);
        report.records_with_email = merged.iter().filter(|r| r.has_email()).count();
        report.records_without_email = merged.len() - report.records_with_email;

        if let Some(combined) = &self.combined {
            let paths = self.output.write_combined(&merged, &combined.base_name)?;
            engine_info!(
                "combined output {}: {} records ({} with email, {} without)",
                paths.json.display(),
                merged.len(),
                report.records_with_email,
                report.records_without_email
            );
            report.combined = Some(paths);
        }
        Ok(report)
    }

    async fn harvest(&self, job: &HarvestJob) -> Result<HarvestResult, HarvestError> {
        let fetcher: &dyn Fetcher = match job.fetcher.as_deref() {
            Some(own) => own,
            None => self.fetcher,
        };
        BatchScheduler::new(fetcher)
            .with_progress(self.progress)
            .with_cancellation(self.cancel.clone())
            .run(&job.target, job.discoverer.as_ref(), job.extractor.as_ref())
            .await
    }

    /// Writes a job's files. Returns the result for merging only when the
    /// harvest succeeded.
    fn settle_job(
        &self,
        job: &HarvestJob,
        outcome: Result<HarvestResult, HarvestError>,
    ) -> (JobReport, Option<HarvestResult>) {
        let name = job.target.name.clone();
        let base_name = file_base_name(&name);
        let (result, error) = match outcome {
            Ok(result) => (result, None),
            Err(err) => {
                engine_error!("[{}] harvest failed: {}", name, err);
                let message = err.to_string();
                let result =
                    HarvestResult::failed(name.clone(), message.clone(), err.attempted_first_page());
                (result, Some(message))
            }
        };

        let (outputs, output_error) = match self.output.write(&result, &base_name) {
            Ok(paths) => (Some(paths), None),
            Err(err) => {
                engine_warn!("[{}] writing output failed: {}", name, err);
                (None, Some(err.to_string()))
            }
        };

        let job_report = JobReport {
            name,
            base_name,
            summary: result.summary.clone(),
            error: error.clone(),
            outputs,
            output_error,
        };
        (job_report, error.is_none().then_some(result))
    }
}
