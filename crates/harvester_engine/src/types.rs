use std::fmt;
use std::time::Duration;

use harvester_core::{PageStatus, PaginationMode};

use crate::extract::ExtractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub content: String,
    pub metadata: FetchMetadata,
}

impl FetchOutput {
    /// Output for content that did not come over HTTP (fixtures, renderers).
    pub fn from_content(url: impl Into<String>, content: impl Into<String>) -> Self {
        let url = url.into();
        let content = content.into();
        Self {
            metadata: FetchMetadata {
                original_url: url.clone(),
                final_url: url,
                content_type: None,
                encoding: "UTF-8".to_string(),
                byte_len: content.len() as u64,
            },
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub encoding: String,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} fetching {url} (attempt {attempt}): {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub url: String,
    pub attempt: u32,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            attempt: 1,
            message: message.into(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Transient failures worth another attempt under a retry policy.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FailureKind::Timeout | FailureKind::Network => true,
            FailureKind::HttpStatus(code) => code == 429 || (500..600).contains(&code),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Decode,
    /// A readiness condition never became true.
    NotReady,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Decode => write!(f, "undecodable body"),
            FailureKind::NotReady => write!(f, "readiness condition not met"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// One page's fetch, owned by the scheduler until it becomes a `PageOutcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetchResult {
    pub index: u32,
    pub url: String,
    pub result: Result<FetchOutput, FetchError>,
    pub elapsed: Duration,
}

/// Harvest-level failures. Everything page-local is folded into the summary instead.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("first page of {target} could not be fetched: {source}")]
    FirstPageFetch {
        target: String,
        #[source]
        source: FetchError,
    },
    #[error("first page of {target} could not be parsed: {source}")]
    FirstPageExtract {
        target: String,
        #[source]
        source: ExtractError,
    },
    #[error("no page of {target} was harvested successfully")]
    NoSuccessfulPages { target: String },
    #[error("harvest of {target} was cancelled before it started")]
    Cancelled { target: String },
}

impl HarvestError {
    /// Whether page 1 was requested before the harvest failed.
    pub fn attempted_first_page(&self) -> bool {
        matches!(
            self,
            HarvestError::FirstPageFetch { .. } | HarvestError::FirstPageExtract { .. }
        )
    }
}

/// Progress notifications emitted while a harvest runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestEvent {
    PaginationDiscovered {
        target: String,
        mode: PaginationMode,
    },
    BatchDispatched {
        target: String,
        pages: Vec<u32>,
    },
    PageCompleted {
        target: String,
        index: u32,
        status: PageStatus,
        records: usize,
    },
    Finished {
        target: String,
        records: usize,
        pages_failed: usize,
    },
}
