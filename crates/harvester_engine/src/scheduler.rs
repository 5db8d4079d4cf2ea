//! The batch scheduler: fetch page 1, discover pagination, then fetch the
//! remaining pages in bounded concurrent batches.
//!
//! Outcomes are keyed by page index, so completion order within a batch never
//! shows up in the result. Only page 1 failing is fatal; every other page
//! failure is folded into the summary.

use std::collections::BTreeMap;
use std::time::Instant;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use harvester_core::{
    aggregate, BatchPlanner, HarvestResult, HarvestWarning, PageOutcome, PageStatus,
    PaginationMode, RawRecord, Target,
};
use tokio_util::sync::CancellationToken;

use crate::discover::PaginationDiscoverer;
use crate::extract::RecordExtractor;
use crate::fetch::Fetcher;
use crate::progress::{NoopProgressSink, ProgressSink};
use crate::{FailureKind, HarvestError, HarvestEvent, PageFetchResult};

/// Ceiling on pages per harvest, in either count or sequential mode, when the
/// target sets no cap.
pub const PAGE_LIMIT: u32 = 500;

static NOOP_SINK: NoopProgressSink = NoopProgressSink;

pub struct BatchScheduler<'a> {
    fetcher: &'a dyn Fetcher,
    sink: &'a dyn ProgressSink,
    cancel: CancellationToken,
    page_limit: u32,
}

struct Settled {
    outcome: PageOutcome,
    end_of_pagination: bool,
}

#[derive(Default)]
struct Ledger {
    outcomes: BTreeMap<u32, PageOutcome>,
    warnings: Vec<HarvestWarning>,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self {
            fetcher,
            sink: &NOOP_SINK,
            cancel: CancellationToken::new(),
            page_limit: PAGE_LIMIT,
        }
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Checked before page 1 and before every later batch.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    pub async fn run(
        &self,
        target: &Target,
        discoverer: &dyn PaginationDiscoverer,
        extractor: &dyn RecordExtractor,
    ) -> Result<HarvestResult, HarvestError> {
        if self.cancel.is_cancelled() {
            return Err(HarvestError::Cancelled {
                target: target.name.clone(),
            });
        }

        let first = self.fetch_page(target, 1).await;
        let output = first.result.map_err(|source| HarvestError::FirstPageFetch {
            target: target.name.clone(),
            source,
        })?;
        let extraction =
            extractor
                .extract(&output.content)
                .map_err(|source| HarvestError::FirstPageExtract {
                    target: target.name.clone(),
                    source,
                })?;

        let mode = discoverer.discover(&output.content);
        engine_info!("[{}] pagination mode {}", target.name, mode);
        self.sink.emit(HarvestEvent::PaginationDiscovered {
            target: target.name.clone(),
            mode,
        });

        let first_outcome = PageOutcome::extracted(
            1,
            first.url,
            extraction.records,
            &target.primary_field,
            first.elapsed,
        );
        let previous = first_outcome.records.clone();
        let first_is_empty = first_outcome.status == PageStatus::Empty;

        let mut ledger = Ledger::default();
        self.record(target, &mut ledger, first_outcome);

        match mode {
            PaginationMode::Count { total_pages } => {
                let total = match target.max_pages {
                    Some(_) => target.capped_total(total_pages),
                    None => total_pages.min(self.page_limit),
                };
                if total < total_pages {
                    ledger.warnings.push(HarvestWarning::PageCapReached {
                        cap: total,
                        discovered: Some(total_pages),
                    });
                }
                self.run_batches(target, extractor, total, &mut ledger).await;
            }
            PaginationMode::Sequential => {
                if first_is_empty || extraction.end_of_pagination {
                    engine_debug!("[{}] page 1 ends the sequential walk", target.name);
                } else {
                    self.run_sequential(target, extractor, previous, &mut ledger)
                        .await;
                }
            }
            PaginationMode::Single => {}
        }

        let result = aggregate(
            &target.name,
            mode,
            ledger.outcomes.into_values(),
            target.dedupe.as_ref(),
            ledger.warnings,
        );
        if result.summary.pages_succeeded() == 0 {
            return Err(HarvestError::NoSuccessfulPages {
                target: target.name.clone(),
            });
        }

        for warning in &result.summary.warnings {
            engine_warn!("[{}] {}", target.name, warning);
        }
        self.sink.emit(HarvestEvent::Finished {
            target: target.name.clone(),
            records: result.summary.records_retained,
            pages_failed: result.summary.pages_failed,
        });
        Ok(result)
    }

    async fn run_batches(
        &self,
        target: &Target,
        extractor: &dyn RecordExtractor,
        total_pages: u32,
        ledger: &mut Ledger,
    ) {
        let mut planner = BatchPlanner::new(total_pages, target.concurrency);
        while let Some(batch) = planner.next_batch() {
            if self.cancel.is_cancelled() {
                ledger.warnings.push(HarvestWarning::Cancelled {
                    next_page: batch[0],
                });
                break;
            }
            self.pause_between_batches(target).await;

            self.sink.emit(HarvestEvent::BatchDispatched {
                target: target.name.clone(),
                pages: batch.clone(),
            });
            let fetched = join_all(batch.iter().map(|&index| self.fetch_page(target, index))).await;

            let timeouts = fetched
                .iter()
                .filter(|page| matches!(&page.result, Err(err) if err.kind == FailureKind::Timeout))
                .count();
            for page in fetched {
                let settled = self.settle(target, extractor, page);
                self.record(target, ledger, settled.outcome);
            }

            if target.adaptive_concurrency
                && timeouts > 0
                && timeouts * 2 >= batch.len()
                && planner.batch_size() > 1
            {
                let size = planner.shrink();
                engine_warn!(
                    "[{}] {} of {} pages timed out; batch size reduced to {}",
                    target.name,
                    timeouts,
                    batch.len(),
                    size
                );
            }
        }
    }

    async fn run_sequential(
        &self,
        target: &Target,
        extractor: &dyn RecordExtractor,
        mut previous: Vec<RawRecord>,
        ledger: &mut Ledger,
    ) {
        let limit = target.max_pages.unwrap_or(self.page_limit);
        let mut index = 2;
        loop {
            if index > limit {
                let warning = match target.max_pages {
                    Some(cap) => HarvestWarning::PageCapReached {
                        cap,
                        discovered: None,
                    },
                    None => HarvestWarning::PaginationAmbiguous {
                        stopped_at_page: limit,
                        reason: format!("sequential page limit {limit} reached"),
                    },
                };
                ledger.warnings.push(warning);
                return;
            }
            if self.cancel.is_cancelled() {
                ledger
                    .warnings
                    .push(HarvestWarning::Cancelled { next_page: index });
                return;
            }
            self.pause_between_batches(target).await;

            self.sink.emit(HarvestEvent::BatchDispatched {
                target: target.name.clone(),
                pages: vec![index],
            });
            let page = self.fetch_page(target, index).await;
            let Settled {
                mut outcome,
                end_of_pagination,
            } = self.settle(target, extractor, page);

            match outcome.status {
                PageStatus::FetchError | PageStatus::ExtractError => {
                    ledger.warnings.push(HarvestWarning::PaginationAmbiguous {
                        stopped_at_page: index,
                        reason: format!(
                            "stopped after failure: {}",
                            outcome.error.as_deref().unwrap_or("unknown")
                        ),
                    });
                    self.record(target, ledger, outcome);
                    return;
                }
                PageStatus::Empty => {
                    engine_info!("[{}] page {} has no records; stopping", target.name, index);
                    self.record(target, ledger, outcome);
                    return;
                }
                PageStatus::Ok if outcome.records == previous => {
                    // Sites that clamp out-of-range pages keep serving the last one.
                    ledger.warnings.push(HarvestWarning::PaginationAmbiguous {
                        stopped_at_page: index,
                        reason: "page repeats the previous page".to_string(),
                    });
                    outcome.records.clear();
                    outcome.status = PageStatus::Empty;
                    self.record(target, ledger, outcome);
                    return;
                }
                PageStatus::Ok => {
                    previous = outcome.records.clone();
                    self.record(target, ledger, outcome);
                    if end_of_pagination {
                        engine_info!("[{}] page {} is the last page", target.name, index);
                        return;
                    }
                }
            }
            index += 1;
        }
    }

    async fn pause_between_batches(&self, target: &Target) {
        if let Some(delay) = target.batch_delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetches one page, retrying transient failures per the target's policy.
    async fn fetch_page(&self, target: &Target, index: u32) -> PageFetchResult {
        let url = target.page_url(index);
        let started = Instant::now();
        let mut attempt = 1;
        let result = loop {
            match self.fetcher.fetch(&url).await {
                Ok(output) => break Ok(output),
                Err(err) => {
                    let err = err.with_attempt(attempt);
                    if attempt >= target.retry.max_attempts || !err.is_retryable() {
                        break Err(err);
                    }
                    attempt += 1;
                    engine_debug!(
                        "[{}] retrying page {} (attempt {}): {}",
                        target.name,
                        index,
                        attempt,
                        err
                    );
                    tokio::time::sleep(target.retry.delay_before(attempt)).await;
                }
            }
        };
        PageFetchResult {
            index,
            url,
            result,
            elapsed: started.elapsed(),
        }
    }

    fn settle(
        &self,
        target: &Target,
        extractor: &dyn RecordExtractor,
        page: PageFetchResult,
    ) -> Settled {
        let PageFetchResult {
            index,
            url,
            result,
            elapsed,
        } = page;
        match result {
            Err(err) => Settled {
                outcome: PageOutcome::fetch_failed(index, url, err.to_string(), elapsed),
                end_of_pagination: false,
            },
            Ok(output) => match extractor.extract(&output.content) {
                Ok(extraction) => Settled {
                    outcome: PageOutcome::extracted(
                        index,
                        url,
                        extraction.records,
                        &target.primary_field,
                        elapsed,
                    ),
                    end_of_pagination: extraction.end_of_pagination,
                },
                Err(err) => Settled {
                    outcome: PageOutcome::extract_failed(index, url, err.to_string(), elapsed),
                    end_of_pagination: false,
                },
            },
        }
    }

    fn record(&self, target: &Target, ledger: &mut Ledger, outcome: PageOutcome) {
        if let Some(error) = &outcome.error {
            engine_warn!("[{}] page {} {}: {}", target.name, outcome.index, outcome.status, error);
        }
        self.sink.emit(HarvestEvent::PageCompleted {
            target: target.name.clone(),
            index: outcome.index,
            status: outcome.status,
            records: outcome.records.len(),
        });
        ledger.outcomes.insert(outcome.index, outcome);
    }
}

/// Runs one harvest with default scheduling: no progress events, no cancellation.
pub async fn run_harvest(
    target: &Target,
    discoverer: &dyn PaginationDiscoverer,
    fetcher: &dyn Fetcher,
    extractor: &dyn RecordExtractor,
) -> Result<HarvestResult, HarvestError> {
    BatchScheduler::new(fetcher)
        .run(target, discoverer, extractor)
        .await
}
