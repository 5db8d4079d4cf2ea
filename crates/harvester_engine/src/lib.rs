//! Harvester engine: fetching, extraction, scheduling and output.
//!
//! Everything that touches the network, parses HTML or writes files lives
//! here; the data model and pure algorithms come from `harvester_core`.
mod decode;
mod discover;
mod export;
mod extract;
mod fetch;
mod filename;
mod orchestrator;
mod persist;
mod progress;
mod ready;
mod scheduler;
mod types;

pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use discover::{FirstMatch, HighestPageLink, LabelCount, PaginationDiscoverer, SequentialPages, SinglePage};
pub use export::{
    records_to_csv, Clock, ExportError, FileOutputSink, OutputPaths, OutputSink, DEFAULT_CSV_FIELDS,
};
pub use extract::{
    clean_text, mailto_address, ExtractError, Extraction, FieldRule, FieldSource, RecordExtractor,
    SelectorExtractor,
};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, DEFAULT_USER_AGENT};
pub use filename::file_base_name;
pub use orchestrator::{
    CombinedOutput, HarvestJob, JobReport, Orchestrator, RunReport, DEFAULT_JOB_BATCH,
};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use progress::{LogProgressSink, NoopProgressSink, ProgressSink};
pub use ready::ReadinessFetcher;
pub use scheduler::{run_harvest, BatchScheduler, PAGE_LIMIT};
pub use types::{
    FailureKind, FetchError, FetchMetadata, FetchOutput, HarvestError, HarvestEvent,
    PageFetchResult,
};
