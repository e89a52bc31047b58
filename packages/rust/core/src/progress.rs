//! Progress reporting injected into the orchestrator.

use crate::report::HarvestResult;

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before chapter `number` of `total` is processed.
    fn chapter_started(&self, number: u32, total: u32);
    /// Called after every image attempt, successful or not.
    fn image_done(&self, chapter: u32, index: u32, total: usize);
    /// Called when the harvest completes (including cancelled runs).
    fn done(&self, result: &HarvestResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn chapter_started(&self, _number: u32, _total: u32) {}
    fn image_done(&self, _chapter: u32, _index: u32, _total: usize) {}
    fn done(&self, _result: &HarvestResult) {}
}
