//! Harvester core: the IO-free data model of a paginated harvest.
//!
//! Records, targets, pagination modes, batch planning and result aggregation
//! live here. Nothing in this crate touches the network or the filesystem.
mod aggregate;
mod outcome;
mod pagination;
mod record;
mod target;

pub use aggregate::{
    aggregate, merge_records, DedupeKey, HarvestResult, HarvestSummary, HarvestWarning,
    MergeOrder, PageReport,
};
pub use outcome::{PageOutcome, PageStatus};
pub use pagination::{
    pages_for_items, parse_count_label, plan_batches, BatchPlanner, CountLabel, PaginationMode,
};
pub use record::{retain_identified, RawRecord, DEFAULT_PRIMARY_FIELD};
pub use target::{
    PageScheme, RetryPolicy, Target, TargetError, DEFAULT_CONCURRENCY, PAGE_PLACEHOLDER,
};
