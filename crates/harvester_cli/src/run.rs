use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use engine_logging::{engine_info, engine_warn};
use harvester_core::MergeOrder;
use harvester_engine::{
    file_base_name, CombinedOutput, FileOutputSink, HarvestJob, LogProgressSink, Orchestrator,
    ReadinessFetcher, ReqwestFetcher, RunReport,
};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, HarvestConfig, SiteConfig};

/// Builds one job per configured site, all sharing `fetcher`'s client.
pub fn build_jobs(
    config: &HarvestConfig,
    fetcher: &ReqwestFetcher,
) -> Result<Vec<HarvestJob>, ConfigError> {
    config
        .sites
        .iter()
        .map(|site| build_job(site, fetcher))
        .collect()
}

fn build_job(site: &SiteConfig, fetcher: &ReqwestFetcher) -> Result<HarvestJob, ConfigError> {
    let job = HarvestJob::new(
        site.target()?,
        site.discoverer()?,
        Box::new(site.extractor()?),
    );
    let Some(ready) = &site.ready else {
        return Ok(job);
    };
    let poller = ReadinessFetcher::new(
        fetcher.clone(),
        &ready.selector,
        ready.max_polls,
        ready.poll_interval(),
    )
    .map_err(|source| ConfigError::Selector {
        site: site.name.clone(),
        source,
    })?;
    Ok(job.with_fetcher(Box::new(poller)))
}

fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Harvests every site in `config` until done or `cancel` fires.
pub async fn harvest(config: &HarvestConfig, cancel: CancellationToken) -> anyhow::Result<RunReport> {
    let fetcher =
        ReqwestFetcher::new(config.fetch.settings()).context("building the HTTP client")?;
    let jobs = build_jobs(config, &fetcher)?;

    let mut sink = FileOutputSink::new(&config.output_dir).with_csv_fields(config.csv_fields.clone());
    if config.manifest {
        sink = sink.with_manifest(Arc::new(utc_now));
    }
    let progress = LogProgressSink;

    let mut orchestrator = Orchestrator::new(&fetcher, &sink)
        .with_progress(&progress)
        .with_cancellation(cancel)
        .with_job_batch(config.job_batch);
    if let Some(combined) = &config.combined {
        orchestrator = orchestrator.with_combined_output(CombinedOutput {
            base_name: file_base_name(&combined.base_name),
            order: if combined.email_first {
                MergeOrder::EmailFirst
            } else {
                MergeOrder::JobOrder
            },
        });
    }

    engine_info!(
        "harvesting {} sites into {}",
        jobs.len(),
        config.output_dir.display()
    );
    let report = orchestrator
        .run(&jobs)
        .await
        .context("writing the combined output")?;
    if report.failed() > 0 {
        engine_warn!("{} of {} sites failed", report.failed(), report.jobs.len());
    }
    Ok(report)
}

/// Plain-text run summary for the terminal.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for job in &report.jobs {
        let status = match (&job.error, &job.output_error) {
            (Some(err), _) => format!("FAILED: {err}"),
            (None, Some(err)) => format!("output failed: {err}"),
            (None, None) => format!(
                "{} records from {} pages",
                job.summary.records_retained,
                job.summary.pages_succeeded()
            ),
        };
        let _ = writeln!(out, "{:<40} {}", job.name, status);
        if let Some(paths) = &job.outputs {
            let _ = writeln!(out, "    {}", paths.json.display());
        }
        for warning in &job.summary.warnings {
            let _ = writeln!(out, "    warning: {warning}");
        }
    }
    if let Some(paths) = &report.combined {
        let _ = writeln!(out, "combined: {}", paths.json.display());
    }
    let _ = writeln!(
        out,
        "{} succeeded, {} failed; {} records with email, {} without",
        report.succeeded(),
        report.failed(),
        report.records_with_email,
        report.records_without_email
    );
    out
}

/// One line per site for `list`.
pub fn render_sites(config: &HarvestConfig) -> Result<String, ConfigError> {
    let mut out = String::new();
    for site in &config.sites {
        let target = site.target()?;
        site.extractor()?;
        site.discoverer()?;
        let _ = writeln!(
            out,
            "{} ({})\n    {}  pagination: {:?}  concurrency: {}",
            site.name,
            file_base_name(&site.name),
            target.base_url(),
            site.pagination,
            target.concurrency
        );
    }
    Ok(out)
}
