use std::time::Duration;

use url::Url;

use crate::aggregate::DedupeKey;
use crate::record::DEFAULT_PRIMARY_FIELD;

/// Pages fetched concurrently per batch when a target does not say otherwise.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Placeholder replaced by the site's page number in [`PageScheme::Template`].
pub const PAGE_PLACEHOLDER: &str = "{page}";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid base url {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("page template {0:?} has no {{page}} placeholder")]
    TemplateWithoutPlaceholder(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("page cap must be at least 1")]
    ZeroPageCap,
    #[error("dedupe key must name at least one field")]
    EmptyDedupeKey,
}

/// How the URL of page N is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScheme {
    /// Page 1 is the base URL as given; later pages set `param=N`, replacing
    /// any value the base URL already carries.
    QueryParam { param: String },
    /// Every page, including the first, substitutes `{page}` in the template.
    Template { template: String },
}

impl Default for PageScheme {
    fn default() -> Self {
        PageScheme::QueryParam {
            param: "page".to_string(),
        }
    }
}

/// Retry policy applied by the scheduler to a single page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        self.backoff * next_attempt.saturating_sub(1)
    }
}

/// One harvest job. Built once, then shared read-only for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    base_url: Url,
    pub page_scheme: PageScheme,
    /// Site page number of page index 1 (some sites count from 0).
    pub start_page: u32,
    pub concurrency: usize,
    pub max_pages: Option<u32>,
    pub primary_field: String,
    pub batch_delay: Option<Duration>,
    pub dedupe: Option<DedupeKey>,
    pub retry: RetryPolicy,
    pub adaptive_concurrency: bool,
}

impl Target {
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self, TargetError> {
        let parsed = Url::parse(base_url).map_err(|err| TargetError::InvalidBaseUrl {
            url: base_url.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            name: name.into(),
            base_url: parsed,
            page_scheme: PageScheme::default(),
            start_page: 1,
            concurrency: DEFAULT_CONCURRENCY,
            max_pages: None,
            primary_field: DEFAULT_PRIMARY_FIELD.to_string(),
            batch_delay: None,
            dedupe: None,
            retry: RetryPolicy::default(),
            adaptive_concurrency: false,
        })
    }

    pub fn with_page_scheme(mut self, scheme: PageScheme) -> Result<Self, TargetError> {
        if let PageScheme::Template { template } = &scheme {
            if !template.contains(PAGE_PLACEHOLDER) {
                return Err(TargetError::TemplateWithoutPlaceholder(template.clone()));
            }
        }
        self.page_scheme = scheme;
        Ok(self)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, TargetError> {
        if concurrency == 0 {
            return Err(TargetError::ZeroConcurrency);
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn with_max_pages(mut self, cap: Option<u32>) -> Result<Self, TargetError> {
        if cap == Some(0) {
            return Err(TargetError::ZeroPageCap);
        }
        self.max_pages = cap;
        Ok(self)
    }

    pub fn with_start_page(mut self, start_page: u32) -> Self {
        self.start_page = start_page;
        self
    }

    pub fn with_primary_field(mut self, field: impl Into<String>) -> Self {
        self.primary_field = field.into();
        self
    }

    pub fn with_batch_delay(mut self, delay: Option<Duration>) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_dedupe(mut self, key: Option<DedupeKey>) -> Self {
        self.dedupe = key;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn with_adaptive_concurrency(mut self, enabled: bool) -> Self {
        self.adaptive_concurrency = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// URL of the 1-based page `index`.
    pub fn page_url(&self, index: u32) -> String {
        let site_page = self.start_page + index.saturating_sub(1);
        match &self.page_scheme {
            PageScheme::QueryParam { param } => {
                if index <= 1 {
                    return self.base_url.to_string();
                }
                let mut url = self.base_url.clone();
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(name, _)| name != param.as_str())
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(param, &site_page.to_string());
                url.to_string()
            }
            PageScheme::Template { template } => {
                template.replace(PAGE_PLACEHOLDER, &site_page.to_string())
            }
        }
    }

    /// Applies the page cap to a discovered page total.
    pub fn capped_total(&self, total_pages: u32) -> u32 {
        match self.max_pages {
            Some(cap) => total_pages.min(cap),
            None => total_pages,
        }
    }
}
