//! Harvest orchestration for mangaroo.
//!
//! This crate ties together the automation session, content extraction,
//! asset fetching, and the archive into a single sequential run
//! ([`HarvestOrchestrator::harvest`]).

pub mod orchestrator;
pub mod progress;
pub mod report;
mod staging;

pub use orchestrator::HarvestOrchestrator;
pub use progress::{ProgressReporter, SilentProgress};
pub use report::{ChapterOutcome, ChapterReport, HarvestOutcome, HarvestResult};
