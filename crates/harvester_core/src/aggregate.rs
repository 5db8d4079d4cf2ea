use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::outcome::{PageOutcome, PageStatus};
use crate::pagination::PaginationMode;
use crate::record::RawRecord;
use crate::target::TargetError;

/// Fields whose combined values identify a duplicate record.
///
/// Deduplication is strictly opt-in: some sites list the same person twice
/// with different titles and both rows are wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeKey {
    fields: Vec<String>,
}

impl DedupeKey {
    /// A key needs at least one field; an empty key would make every record
    /// a duplicate of the first.
    pub fn new<I, S>(fields: I) -> Result<Self, TargetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err(TargetError::EmptyDedupeKey);
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn key_of(&self, record: &RawRecord) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| record.value_or_empty(f).to_string())
            .collect()
    }
}

/// Non-fatal conditions surfaced in the summary rather than as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarvestWarning {
    /// Sequential mode stopped on a heuristic that may have cut the walk short.
    PaginationAmbiguous { stopped_at_page: u32, reason: String },
    /// The discovered page total exceeded the target's page cap.
    PageCapReached { cap: u32, discovered: Option<u32> },
    /// Cancellation was requested; pages from `next_page` on were not fetched.
    Cancelled { next_page: u32 },
}

impl fmt::Display for HarvestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarvestWarning::PaginationAmbiguous {
                stopped_at_page,
                reason,
            } => write!(f, "pagination ambiguous at page {stopped_at_page}: {reason}"),
            HarvestWarning::PageCapReached { cap, discovered } => match discovered {
                Some(total) => write!(f, "page cap {cap} reached ({total} pages discovered)"),
                None => write!(f, "page cap {cap} reached"),
            },
            HarvestWarning::Cancelled { next_page } => {
                write!(f, "cancelled before page {next_page}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub index: u32,
    pub url: String,
    pub status: PageStatus,
    pub records: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    pub target: String,
    pub pagination: PaginationMode,
    pub pages_attempted: usize,
    pub pages_failed: usize,
    pub pages_empty: usize,
    pub records_retained: usize,
    pub records_dropped: usize,
    pub duplicates_removed: usize,
    pub warnings: Vec<HarvestWarning>,
    pub pages: Vec<PageReport>,
    /// Why the harvest was fatal, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HarvestSummary {
    pub fn pages_succeeded(&self) -> usize {
        self.pages_attempted - self.pages_failed
    }
}

/// Records of one harvest in page order, plus its summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestResult {
    pub records: Vec<RawRecord>,
    pub summary: HarvestSummary,
}

impl HarvestResult {
    /// A result with no records, used where a harvest produced nothing usable.
    pub fn empty(target: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            summary: HarvestSummary {
                target: target.into(),
                pagination: PaginationMode::Single,
                pages_attempted: 0,
                pages_failed: 0,
                pages_empty: 0,
                records_retained: 0,
                records_dropped: 0,
                duplicates_removed: 0,
                warnings: Vec::new(),
                pages: Vec::new(),
                error: None,
            },
        }
    }

    /// An empty result for a fatal harvest. When page 1 was requested it is
    /// counted as one failed page.
    pub fn failed(
        target: impl Into<String>,
        error: impl Into<String>,
        first_page_attempted: bool,
    ) -> Self {
        let mut result = Self::empty(target);
        if first_page_attempted {
            result.summary.pages_attempted = 1;
            result.summary.pages_failed = 1;
        }
        result.summary.error = Some(error.into());
        result
    }
}

/// Concatenates page records in ascending page order and builds the summary.
///
/// Input order does not matter; outcomes are ordered by page index here.
pub fn aggregate(
    target: &str,
    pagination: PaginationMode,
    outcomes: impl IntoIterator<Item = PageOutcome>,
    dedupe: Option<&DedupeKey>,
    warnings: Vec<HarvestWarning>,
) -> HarvestResult {
    let mut outcomes: Vec<PageOutcome> = outcomes.into_iter().collect();
    outcomes.sort_by_key(|o| o.index);

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut pages = Vec::with_capacity(outcomes.len());
    let mut duplicates_removed = 0;
    let mut records_dropped = 0;

    for outcome in outcomes {
        records_dropped += outcome.dropped;
        pages.push(PageReport {
            index: outcome.index,
            url: outcome.url,
            status: outcome.status,
            records: outcome.records.len(),
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            error: outcome.error,
        });
        for record in outcome.records {
            if let Some(key) = dedupe {
                if !seen.insert(key.key_of(&record)) {
                    duplicates_removed += 1;
                    continue;
                }
            }
            records.push(record);
        }
    }

    let summary = HarvestSummary {
        target: target.to_string(),
        pagination,
        pages_attempted: pages.len(),
        pages_failed: pages.iter().filter(|p| p.status.is_failure()).count(),
        pages_empty: pages
            .iter()
            .filter(|p| p.status == PageStatus::Empty)
            .count(),
        records_retained: records.len(),
        records_dropped,
        duplicates_removed,
        warnings,
        pages,
        error: None,
    };

    HarvestResult { records, summary }
}

/// Ordering of the combined output of several harvests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeOrder {
    /// Job order, then page order within each job.
    #[default]
    JobOrder,
    /// Records with an email first; otherwise job order is kept.
    EmailFirst,
}

pub fn merge_records<'a>(
    results: impl IntoIterator<Item = &'a HarvestResult>,
    order: MergeOrder,
) -> Vec<RawRecord> {
    let mut merged: Vec<RawRecord> = results
        .into_iter()
        .flat_map(|r| r.records.iter().cloned())
        .collect();
    if order == MergeOrder::EmailFirst {
        // Stable, so relative order inside each group survives.
        merged.sort_by_key(|r| !r.has_email());
    }
    merged
}
