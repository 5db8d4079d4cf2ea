use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// How many pages a harvest covers, decided once from page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaginationMode {
    /// The page total is known up front.
    Count { total_pages: u32 },
    /// No total is derivable; walk pages until a stop condition.
    Sequential,
    /// No pagination control; page 1 is everything.
    Single,
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationMode::Count { total_pages } => write!(f, "count ({total_pages} pages)"),
            PaginationMode::Sequential => write!(f, "sequential"),
            PaginationMode::Single => write!(f, "single"),
        }
    }
}

/// A pagination label as found on listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLabel {
    /// "Page 1 of 6".
    Pages { current: u32, total: u32 },
    /// "showing 1 - 15 of 856 constituents", or just "... of 856".
    Items {
        range: Option<(u32, u32)>,
        total: u32,
    },
}

static PAGE_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpage\s+(\d[\d,]*)\s+of\s+(\d[\d,]*)").unwrap());
static ITEM_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s*(?:-|–|to)\s*(\d[\d,]*)\s+of\s+(\d[\d,]*)").unwrap()
});
static TOTAL_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bof\s+(\d[\d,]*)").unwrap());

fn parse_number(text: &str) -> Option<u32> {
    text.replace(',', "").parse().ok()
}

/// Parses the common pagination label shapes. Whitespace runs are tolerated.
pub fn parse_count_label(label: &str) -> Option<CountLabel> {
    if let Some(caps) = PAGE_OF_RE.captures(label) {
        let current = parse_number(&caps[1])?;
        let total = parse_number(&caps[2])?;
        return Some(CountLabel::Pages { current, total });
    }
    if let Some(caps) = ITEM_RANGE_RE.captures(label) {
        let first = parse_number(&caps[1])?;
        let last = parse_number(&caps[2])?;
        let total = parse_number(&caps[3])?;
        let range = (last >= first).then_some((first, last));
        return Some(CountLabel::Items { range, total });
    }
    let caps = TOTAL_ONLY_RE.captures(label)?;
    let total = parse_number(&caps[1])?;
    Some(CountLabel::Items { range: None, total })
}

/// `ceil(total_items / per_page)`, never less than one page.
pub fn pages_for_items(total_items: u32, per_page: u32) -> u32 {
    if per_page == 0 {
        return 1;
    }
    total_items.div_ceil(per_page).max(1)
}

/// Hands out the page indices `2..=total` in groups of the current batch size.
///
/// The size can shrink between batches; pages are never skipped or repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlanner {
    next: u32,
    last: u32,
    size: usize,
}

impl BatchPlanner {
    pub fn new(total_pages: u32, batch_size: usize) -> Self {
        Self {
            next: 2,
            last: total_pages,
            size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.size
    }

    /// Pages not handed out yet.
    pub fn remaining(&self) -> u32 {
        if self.next > self.last {
            0
        } else {
            self.last - self.next + 1
        }
    }

    /// Halves the batch size (minimum 1) and returns the new size.
    pub fn shrink(&mut self) -> usize {
        self.size = (self.size / 2).max(1);
        self.size
    }

    pub fn next_batch(&mut self) -> Option<Vec<u32>> {
        if self.next > self.last {
            return None;
        }
        let size = u32::try_from(self.size).unwrap_or(u32::MAX);
        let end = self.next.saturating_add(size - 1).min(self.last);
        let batch: Vec<u32> = (self.next..=end).collect();
        self.next = end + 1;
        Some(batch)
    }
}

/// Fixed-size partition of pages `2..=total_pages`.
pub fn plan_batches(total_pages: u32, batch_size: usize) -> Vec<Vec<u32>> {
    let mut planner = BatchPlanner::new(total_pages, batch_size);
    std::iter::from_fn(|| planner.next_batch()).collect()
}
