use std::time::Duration;

use engine_logging::engine_debug;
use scraper::{Html, Selector};

use crate::extract::{compile_selector, ExtractError};
use crate::fetch::Fetcher;
use crate::{FailureKind, FetchError, FetchOutput};

/// Wraps a fetcher and re-polls a URL until the content matches a readiness
/// selector. Sites that fill their listing in after the first response are
/// harvested through this instead of a plain GET; the scheduler cannot tell
/// the difference.
pub struct ReadinessFetcher<F> {
    inner: F,
    ready: Selector,
    ready_css: String,
    max_polls: u32,
    poll_interval: Duration,
}

impl<F: Fetcher> ReadinessFetcher<F> {
    pub fn new(
        inner: F,
        ready_selector: &str,
        max_polls: u32,
        poll_interval: Duration,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            inner,
            ready: compile_selector(ready_selector)?,
            ready_css: ready_selector.to_string(),
            max_polls: max_polls.max(1),
            poll_interval,
        })
    }

    fn is_ready(&self, content: &str) -> bool {
        Html::parse_document(content)
            .select(&self.ready)
            .next()
            .is_some()
    }
}

#[async_trait::async_trait]
impl<F: Fetcher> Fetcher for ReadinessFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        for poll in 1..=self.max_polls {
            let output = self.inner.fetch(url).await?;
            if self.is_ready(&output.content) {
                return Ok(output);
            }
            engine_debug!(
                "{} not ready after poll {}/{} (waiting for {})",
                url,
                poll,
                self.max_polls,
                self.ready_css
            );
            if poll < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(FetchError::new(
            FailureKind::NotReady,
            url,
            format!(
                "{} never matched after {} polls",
                self.ready_css, self.max_polls
            ),
        ))
    }
}
