#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use harvester_core::{PaginationMode, RawRecord};
use harvester_engine::{
    ExtractError, Extraction, FailureKind, FetchError, FetchOutput, Fetcher, HarvestEvent,
    PaginationDiscoverer, ProgressSink, RecordExtractor,
};

struct PageFixture {
    content: String,
    delay: Duration,
    transient_failures: AtomicU32,
    failure: Option<FailureKind>,
}

/// In-memory fetcher keyed by URL. Records every request and the highest
/// number of fetches in flight at once.
#[derive(Default)]
pub struct FixtureFetcher {
    pages: HashMap<String, PageFixture>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.delayed_page(url, content, Duration::ZERO)
    }

    pub fn delayed_page(
        mut self,
        url: impl Into<String>,
        content: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.pages.insert(
            url.into(),
            PageFixture {
                content: content.into(),
                delay,
                transient_failures: AtomicU32::new(0),
                failure: None,
            },
        );
        self
    }

    pub fn failing_page(mut self, url: impl Into<String>, kind: FailureKind) -> Self {
        self.pages.insert(
            url.into(),
            PageFixture {
                content: String::new(),
                delay: Duration::ZERO,
                transient_failures: AtomicU32::new(0),
                failure: Some(kind),
            },
        );
        self
    }

    /// Times out `failures` times, then serves `content`.
    pub fn flaky_page(
        mut self,
        url: impl Into<String>,
        content: impl Into<String>,
        failures: u32,
    ) -> Self {
        self.pages.insert(
            url.into(),
            PageFixture {
                content: content.into(),
                delay: Duration::ZERO,
                transient_failures: AtomicU32::new(failures),
                failure: None,
            },
        );
        self
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| *r == url).count()
    }

    async fn respond(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let Some(page) = self.pages.get(url) else {
            return Err(FetchError::new(FailureKind::HttpStatus(404), url, "no fixture"));
        };
        if !page.delay.is_zero() {
            tokio::time::sleep(page.delay).await;
        }
        let pending = page.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            page.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(FetchError::new(FailureKind::Timeout, url, "injected timeout"));
        }
        if let Some(kind) = &page.failure {
            return Err(FetchError::new(kind.clone(), url, "injected failure"));
        }
        Ok(FetchOutput::from_content(url, page.content.clone()))
    }
}

#[async_trait::async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let result = self.respond(url).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One record per line as `name|job_title|email`. A `#last` line marks the
/// final page; a `#malformed` line makes extraction fail.
pub struct LineExtractor;

impl RecordExtractor for LineExtractor {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractError> {
        let mut extraction = Extraction::default();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line {
                "#last" => extraction.end_of_pagination = true,
                "#malformed" => return Err(ExtractError::Malformed("bad fixture".into())),
                _ => {
                    let mut parts = line.split('|');
                    let mut record = RawRecord::new();
                    for field in ["name", "job_title", "email"] {
                        record.set(field, parts.next().unwrap_or("").trim());
                    }
                    extraction.records.push(record);
                }
            }
        }
        Ok(extraction)
    }
}

/// Reports the same mode for every first page.
pub struct FixedMode(pub PaginationMode);

impl PaginationDiscoverer for FixedMode {
    fn discover(&self, _first_page: &str) -> PaginationMode {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HarvestEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<HarvestEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<Vec<u32>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HarvestEvent::BatchDispatched { pages, .. } => Some(pages),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: HarvestEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn page_url(base: &str, index: u32) -> String {
    if index == 1 {
        base.to_string()
    } else {
        format!("{base}?page={index}")
    }
}

pub fn names(records: &[RawRecord]) -> Vec<&str> {
    records.iter().map(|r| r.value_or_empty("name")).collect()
}
