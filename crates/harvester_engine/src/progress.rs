use engine_logging::{engine_debug, engine_info};

use crate::HarvestEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: HarvestEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: HarvestEvent) {}
}

/// Forwards events to the global logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::PaginationDiscovered { target, mode } => {
                engine_info!("[{}] pagination: {}", target, mode);
            }
            HarvestEvent::BatchDispatched { target, pages } => {
                engine_info!("[{}] processing pages {:?}", target, pages);
            }
            HarvestEvent::PageCompleted {
                target,
                index,
                status,
                records,
            } => {
                engine_debug!("[{}] page {} {} ({} records)", target, index, status, records);
            }
            HarvestEvent::Finished {
                target,
                records,
                pages_failed,
            } => {
                engine_info!(
                    "[{}] finished: {} records, {} failed pages",
                    target,
                    records,
                    pages_failed
                );
            }
        }
    }
}
