// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job-progress accounting for the two scan passes.

use std::collections::BTreeMap;
use tracing::info;

/// Receives progress snapshots after every counter change.
///
/// The background-job runner hooks its metadata reporting in here; the
/// default sink emits structured log events.
pub trait ProgressSink: Send {
    /// Report the current step and finished counters.
    fn report(&mut self, steps: &BTreeMap<String, u64>, finished: &BTreeMap<String, u64>);
}

/// Default sink: structured progress events through tracing.
#[derive(Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, steps: &BTreeMap<String, u64>, finished: &BTreeMap<String, u64>) {
        info!(
            steps = steps.values().sum::<u64>(),
            finished = finished.values().sum::<u64>(),
            "scan progress"
        );
    }
}

/// Measured job progress: steps are added during the measurement pass, then
/// marked finished one commit at a time during execution.
pub struct ScanProgress {
    steps: BTreeMap<String, u64>,
    finished: BTreeMap<String, u64>,
    sink: Box<dyn ProgressSink>,
}

impl ScanProgress {
    /// Progress reporting through the given sink.
    pub fn new(sink: Box<dyn ProgressSink>) -> Self {
        Self {
            steps: BTreeMap::new(),
            finished: BTreeMap::new(),
            sink,
        }
    }

    /// Count one upcoming unit of work under `name`.
    pub fn add_step(&mut self, name: &str) {
        *self.steps.entry(name.to_string()).or_default() += 1;
        self.sink.report(&self.steps, &self.finished);
    }

    /// Count one finished unit of work under `name`.
    pub fn mark_finished(&mut self, name: &str) {
        *self.finished.entry(name.to_string()).or_default() += 1;
        self.sink.report(&self.steps, &self.finished);
    }

    /// `(total steps, total finished)`.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.steps.values().sum(),
            self.finished.values().sum(),
        )
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new(Box::new(LogProgress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording(Arc<Mutex<Vec<(u64, u64)>>>);

    impl ProgressSink for Recording {
        fn report(&mut self, steps: &BTreeMap<String, u64>, finished: &BTreeMap<String, u64>) {
            self.0
                .lock()
                .unwrap()
                .push((steps.values().sum(), finished.values().sum()));
        }
    }

    #[test]
    fn every_change_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut progress = ScanProgress::new(Box::new(Recording(Arc::clone(&seen))));
        progress.add_step("octocat/a");
        progress.add_step("octocat/a");
        progress.mark_finished("octocat/a");

        assert_eq!(progress.totals(), (2, 1));
        assert_eq!(&*seen.lock().unwrap(), &[(1, 0), (2, 0), (2, 1)]);
    }
}
