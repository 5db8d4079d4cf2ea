//! RON site configuration.
//!
//! Each site entry is the per-site plugin: where the listing lives, how its
//! pages are numbered and found, and which selectors produce records.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harvester_core::{DedupeKey, PageScheme, RetryPolicy, Target, TargetError};
use harvester_engine::{
    file_base_name, ExtractError, FetchSettings, FieldRule, FieldSource, HighestPageLink,
    LabelCount, PaginationDiscoverer, SelectorExtractor, SequentialPages, SinglePage,
    DEFAULT_CSV_FIELDS, DEFAULT_JOB_BATCH,
};
use serde::Deserialize;

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_COMBINED_NAME: &str = "combined";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("site {site:?}: {source}")]
    Target {
        site: String,
        #[source]
        source: TargetError,
    },
    #[error("site {site:?}: {source}")]
    Selector {
        site: String,
        #[source]
        source: ExtractError,
    },
    #[error("job batch must be at least 1")]
    ZeroJobBatch,
    #[error("no sites configured")]
    NoSites,
    #[error("two sites share the output name {0:?}")]
    DuplicateSite(String),
    #[error("combined output name {0:?} is also a site's output name")]
    CombinedNameClash(String),
    #[error("no configured site matches {0}")]
    UnknownSites(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub output_dir: PathBuf,
    pub job_batch: usize,
    /// Write `<base>.summary.json` next to each site's output.
    pub manifest: bool,
    pub csv_fields: Vec<String>,
    pub fetch: FetchConfig,
    pub combined: Option<CombinedConfig>,
    pub sites: Vec<SiteConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            job_batch: DEFAULT_JOB_BATCH,
            manifest: true,
            csv_fields: DEFAULT_CSV_FIELDS.iter().map(|f| f.to_string()).collect(),
            fetch: FetchConfig::default(),
            combined: None,
            sites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_bytes: u64,
    pub redirect_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let settings = FetchSettings::default();
        Self {
            connect_timeout_secs: settings.connect_timeout.as_secs(),
            request_timeout_secs: settings.request_timeout.as_secs(),
            user_agent: settings.user_agent,
            max_bytes: settings.max_bytes,
            redirect_limit: settings.redirect_limit,
        }
    }
}

impl FetchConfig {
    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            redirect_limit: self.redirect_limit,
            max_bytes: self.max_bytes,
            user_agent: self.user_agent.clone(),
            ..FetchSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CombinedConfig {
    pub base_name: String,
    pub email_first: bool,
}

impl Default for CombinedConfig {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_COMBINED_NAME.to_string(),
            email_first: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default = "first_page")]
    pub start_page: u32,
    #[serde(default)]
    pub pagination: PaginationConfig,
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub primary_field: Option<String>,
    #[serde(default)]
    pub dedupe: Option<Vec<String>>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub adaptive_concurrency: bool,
    #[serde(default)]
    pub ready: Option<ReadyConfig>,
}

fn first_page() -> u32 {
    1
}

/// How pages after the first are addressed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum PagesConfig {
    /// `?<param>=N` appended to the site URL.
    Query(String),
    /// A URL containing `{page}`.
    Template(String),
}

impl Default for PagesConfig {
    fn default() -> Self {
        PagesConfig::Query("page".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub enum PaginationConfig {
    #[default]
    Single,
    Sequential,
    /// A "showing 1 - 15 of 856" or "Page 1 of 6" label.
    Label {
        selector: String,
        #[serde(default)]
        per_page: Option<u32>,
    },
    /// The highest number among pagination links.
    HighestLink {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
        #[serde(default)]
        query_param: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backoff_ms() -> u64 {
    500
}

/// Re-fetch until `selector` matches, for listings filled in after load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyConfig {
    pub selector: String,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_polls() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl ReadyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractorConfig {
    pub item: String,
    pub fields: Vec<FieldConfig>,
    /// Stamp `school_name` and `url` from the site entry on every record.
    #[serde(default = "stamp_site_fields")]
    pub site_fields: bool,
    #[serde(default)]
    pub static_fields: Vec<(String, String)>,
    #[serde(default)]
    pub next_page: Option<String>,
}

fn stamp_site_fields() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub strip_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub enum SourceConfig {
    #[default]
    Text,
    Attr(String),
    Mailto,
    EmailInText,
}

impl From<&SourceConfig> for FieldSource {
    fn from(source: &SourceConfig) -> Self {
        match source {
            SourceConfig::Text => FieldSource::Text,
            SourceConfig::Attr(name) => FieldSource::Attr(name.clone()),
            SourceConfig::Mailto => FieldSource::Mailto,
            SourceConfig::EmailInText => FieldSource::EmailInText,
        }
    }
}

impl HarvestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_batch == 0 {
            return Err(ConfigError::ZeroJobBatch);
        }
        if self.sites.is_empty() {
            return Err(ConfigError::NoSites);
        }
        let mut seen = HashSet::new();
        for site in &self.sites {
            site.target()?;
            let base = file_base_name(&site.name);
            if !seen.insert(base.clone()) {
                return Err(ConfigError::DuplicateSite(base));
            }
        }
        if let Some(combined) = &self.combined {
            let base = file_base_name(&combined.base_name);
            if seen.contains(&base) {
                return Err(ConfigError::CombinedNameClash(base));
            }
        }
        Ok(())
    }

    /// Keeps only the sites named in `only`, by display name or file base
    /// name, case-insensitively. An empty filter keeps everything.
    pub fn select(&mut self, only: &[String]) -> Result<(), ConfigError> {
        if only.is_empty() {
            return Ok(());
        }
        let wanted: Vec<String> = only.iter().map(|n| n.to_lowercase()).collect();
        let matches = |site: &SiteConfig, w: &str| {
            site.name.to_lowercase() == w || file_base_name(&site.name) == w
        };
        let missing: Vec<&str> = only
            .iter()
            .zip(&wanted)
            .filter(|(_, w)| !self.sites.iter().any(|s| matches(s, w)))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::UnknownSites(missing.join(", ")));
        }
        self.sites
            .retain(|site| wanted.iter().any(|w| matches(site, w)));
        Ok(())
    }
}

impl SiteConfig {
    pub fn target(&self) -> Result<Target, ConfigError> {
        let wrap = |source| ConfigError::Target {
            site: self.name.clone(),
            source,
        };
        let scheme = match &self.pages {
            PagesConfig::Query(param) => PageScheme::QueryParam {
                param: param.clone(),
            },
            PagesConfig::Template(template) => PageScheme::Template {
                template: template.clone(),
            },
        };
        let dedupe = self
            .dedupe
            .as_ref()
            .map(DedupeKey::new)
            .transpose()
            .map_err(wrap)?;
        let mut target = Target::new(&self.name, &self.url)
            .and_then(|t| t.with_page_scheme(scheme))
            .and_then(|t| t.with_max_pages(self.max_pages))
            .map_err(wrap)?
            .with_start_page(self.start_page)
            .with_batch_delay(self.batch_delay_ms.map(Duration::from_millis))
            .with_dedupe(dedupe)
            .with_adaptive_concurrency(self.adaptive_concurrency);
        if let Some(concurrency) = self.concurrency {
            target = target.with_concurrency(concurrency).map_err(wrap)?;
        }
        if let Some(field) = &self.primary_field {
            target = target.with_primary_field(field.clone());
        }
        if let Some(retry) = &self.retry {
            target = target.with_retry(RetryPolicy {
                max_attempts: retry.attempts,
                backoff: Duration::from_millis(retry.backoff_ms),
            });
        }
        Ok(target)
    }

    pub fn extractor(&self) -> Result<SelectorExtractor, ConfigError> {
        let wrap = |source| ConfigError::Selector {
            site: self.name.clone(),
            source,
        };
        let config = &self.extractor;
        let rules = config
            .fields
            .iter()
            .map(|field| {
                let rule = FieldRule::new(
                    field.name.clone(),
                    field.selector.as_deref(),
                    FieldSource::from(&field.source),
                );
                match &field.strip_prefix {
                    Some(prefix) => rule.with_strip_prefix(prefix.clone()),
                    None => rule,
                }
            })
            .collect();

        let mut extractor = SelectorExtractor::new(&config.item, rules).map_err(wrap)?;
        if config.site_fields {
            extractor = extractor
                .with_static_field("school_name", self.name.clone())
                .with_static_field("url", self.url.clone());
        }
        for (name, value) in &config.static_fields {
            extractor = extractor.with_static_field(name.clone(), value.clone());
        }
        if let Some(css) = &config.next_page {
            extractor = extractor.with_next_page_selector(css).map_err(wrap)?;
        }
        Ok(extractor)
    }

    pub fn discoverer(&self) -> Result<Box<dyn PaginationDiscoverer>, ConfigError> {
        let wrap = |source| ConfigError::Selector {
            site: self.name.clone(),
            source,
        };
        Ok(match &self.pagination {
            PaginationConfig::Single => Box::new(SinglePage),
            PaginationConfig::Sequential => Box::new(SequentialPages),
            PaginationConfig::Label { selector, per_page } => Box::new(
                LabelCount::new(selector)
                    .map_err(wrap)?
                    .with_per_page(*per_page)
                    .with_item_selector(&self.extractor.item)
                    .map_err(wrap)?,
            ),
            PaginationConfig::HighestLink {
                selector,
                attr,
                query_param,
            } => Box::new(
                HighestPageLink::new(selector)
                    .map_err(wrap)?
                    .with_attr(attr.clone())
                    .with_query_param(query_param.clone()),
            ),
        })
    }
}
