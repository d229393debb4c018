//! The crawl loop and its failure accounting.

mod failures;
mod scheduler;

pub use failures::{FailureReport, FailureTracker};
pub use scheduler::{CrawlScheduler, ScanMode};
