use engine_logging::engine_debug;
use harvester_core::{pages_for_items, parse_count_label, CountLabel, PaginationMode};
use scraper::{Html, Selector};
use url::Url;

use crate::extract::{clean_text, compile_selector, ExtractError};

/// Decides from page 1 how many pages a harvest covers.
pub trait PaginationDiscoverer: Send + Sync {
    fn discover(&self, first_page: &str) -> PaginationMode;
}

/// No pagination; page 1 is the whole listing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinglePage;

impl PaginationDiscoverer for SinglePage {
    fn discover(&self, _first_page: &str) -> PaginationMode {
        PaginationMode::Single
    }
}

/// Always walk pages one by one until a stop condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialPages;

impl PaginationDiscoverer for SequentialPages {
    fn discover(&self, _first_page: &str) -> PaginationMode {
        PaginationMode::Sequential
    }
}

fn mode_for_total(total_pages: u32) -> PaginationMode {
    if total_pages > 1 {
        PaginationMode::Count { total_pages }
    } else {
        PaginationMode::Single
    }
}

/// Reads a label such as "showing 1 - 15 of 856" or "Page 1 of 6".
///
/// Items per page come from the configured override, else the label's range,
/// else the number of items on page 1. A total with no usable page size falls
/// back to sequential mode; a missing label means a single page.
pub struct LabelCount {
    label: Selector,
    per_page: Option<u32>,
    item: Option<Selector>,
}

impl LabelCount {
    pub fn new(label_selector: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            label: compile_selector(label_selector)?,
            per_page: None,
            item: None,
        })
    }

    pub fn with_per_page(mut self, per_page: Option<u32>) -> Self {
        self.per_page = per_page.filter(|n| *n > 0);
        self
    }

    /// Items on page 1 matching `css` give the page size when nothing else does.
    pub fn with_item_selector(mut self, css: &str) -> Result<Self, ExtractError> {
        self.item = Some(compile_selector(css)?);
        Ok(self)
    }
}

impl PaginationDiscoverer for LabelCount {
    fn discover(&self, first_page: &str) -> PaginationMode {
        let doc = Html::parse_document(first_page);
        let Some(label) = doc.select(&self.label).next() else {
            return PaginationMode::Single;
        };
        let text = clean_text(&label.text().collect::<String>());
        match parse_count_label(&text) {
            Some(CountLabel::Pages { total, .. }) => mode_for_total(total),
            Some(CountLabel::Items { range, total }) => {
                let per_page = self
                    .per_page
                    .or_else(|| range.map(|(first, last)| last - first + 1))
                    .or_else(|| {
                        let sel = self.item.as_ref()?;
                        let count = u32::try_from(doc.select(sel).count()).ok()?;
                        (count > 0).then_some(count)
                    });
                match per_page {
                    Some(per_page) => mode_for_total(pages_for_items(total, per_page)),
                    None => {
                        engine_debug!("label {:?} has a total but no page size", text);
                        PaginationMode::Sequential
                    }
                }
            }
            None => {
                engine_debug!("unrecognised pagination label {:?}", text);
                PaginationMode::Single
            }
        }
    }
}

/// Takes the highest page number among pagination links.
///
/// The number is read from `attr` when set (e.g. `data-page`), else from the
/// `query_param` of the link's href when set, else from the link text.
pub struct HighestPageLink {
    links: Selector,
    attr: Option<String>,
    query_param: Option<String>,
}

impl HighestPageLink {
    pub fn new(link_selector: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            links: compile_selector(link_selector)?,
            attr: None,
            query_param: None,
        })
    }

    pub fn with_attr(mut self, attr: Option<String>) -> Self {
        self.attr = attr;
        self
    }

    pub fn with_query_param(mut self, param: Option<String>) -> Self {
        self.query_param = param;
        self
    }
}

impl PaginationDiscoverer for HighestPageLink {
    fn discover(&self, first_page: &str) -> PaginationMode {
        let doc = Html::parse_document(first_page);
        let highest = doc
            .select(&self.links)
            .filter_map(|link| {
                if let Some(attr) = &self.attr {
                    return link.value().attr(attr)?.trim().parse::<u32>().ok();
                }
                if let Some(param) = &self.query_param {
                    return page_from_href(link.value().attr("href")?, param);
                }
                clean_text(&link.text().collect::<String>()).parse::<u32>().ok()
            })
            .max()
            .unwrap_or(1);
        mode_for_total(highest)
    }
}

fn page_from_href(href: &str, param: &str) -> Option<u32> {
    let base = Url::parse("https://pagination.invalid/").ok()?;
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == param)
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Tries each discoverer in turn and keeps the first answer other than `Single`.
pub struct FirstMatch {
    discoverers: Vec<Box<dyn PaginationDiscoverer>>,
}

impl FirstMatch {
    pub fn new(discoverers: Vec<Box<dyn PaginationDiscoverer>>) -> Self {
        Self { discoverers }
    }
}

impl PaginationDiscoverer for FirstMatch {
    fn discover(&self, first_page: &str) -> PaginationMode {
        self.discoverers
            .iter()
            .map(|d| d.discover(first_page))
            .find(|mode| *mode != PaginationMode::Single)
            .unwrap_or(PaginationMode::Single)
    }
}
