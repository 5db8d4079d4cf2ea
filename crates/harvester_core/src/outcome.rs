use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::record::{retain_identified, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Ok,
    FetchError,
    ExtractError,
    Empty,
}

impl PageStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, PageStatus::FetchError | PageStatus::ExtractError)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PageStatus::Ok => "ok",
            PageStatus::FetchError => "fetch_error",
            PageStatus::ExtractError => "extract_error",
            PageStatus::Empty => "empty",
        };
        f.write_str(label)
    }
}

/// What happened to one page: its status, retained records and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub index: u32,
    pub url: String,
    pub status: PageStatus,
    pub records: Vec<RawRecord>,
    /// Records the extractor produced without a primary field.
    pub dropped: usize,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl PageOutcome {
    /// Outcome of a successful fetch + extract. Unidentified records are dropped here.
    pub fn extracted(
        index: u32,
        url: impl Into<String>,
        records: Vec<RawRecord>,
        primary_field: &str,
        elapsed: Duration,
    ) -> Self {
        let (records, dropped) = retain_identified(records, primary_field);
        let status = if records.is_empty() {
            PageStatus::Empty
        } else {
            PageStatus::Ok
        };
        Self {
            index,
            url: url.into(),
            status,
            records,
            dropped,
            elapsed,
            error: None,
        }
    }

    pub fn fetch_failed(
        index: u32,
        url: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::failed(index, url, PageStatus::FetchError, error, elapsed)
    }

    pub fn extract_failed(
        index: u32,
        url: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::failed(index, url, PageStatus::ExtractError, error, elapsed)
    }

    fn failed(
        index: u32,
        url: impl Into<String>,
        status: PageStatus,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            url: url.into(),
            status,
            records: Vec::new(),
            dropped: 0,
            elapsed,
            error: Some(error.into()),
        }
    }
}
