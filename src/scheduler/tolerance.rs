//! Shared failure budget for the remote operations of the control loop.

/// Outcome of recording an operation into the counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ToleranceStatus {
    /// The operation succeeded; the budget is restored.
    Succeeded,
    /// The operation failed, but the budget is not yet exhausted.
    Failed,
    /// The failure exhausted the budget. The budget has been reset.
    Exceeded,
}

/// Counts consecutive failures across all tolerated operations and reports
/// when their number goes over the configured threshold.
///
/// A single success resets the count, so only an uninterrupted run of
/// `threshold + 1` failures is ever escalated.
pub struct ToleranceCounter {
    threshold: u32,
    used: u32,
}

impl ToleranceCounter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, used: 0 }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
        self.used = self.used.min(threshold);
    }

    /// Record the outcome of a tolerated operation. `label` names the
    /// operation in the escalation log message.
    pub fn record(&mut self, success: bool, label: &str) -> ToleranceStatus {
        if success {
            self.used = 0;
            return ToleranceStatus::Succeeded;
        }
        self.used += 1;
        if self.used > self.threshold {
            log::warn!(
                "Operation `{label}` failed {} times in a row, giving up on it",
                self.used
            );
            self.used = 0;
            return ToleranceStatus::Exceeded;
        }
        log::debug!("Operation `{label}` failed ({}/{})", self.used, self.threshold);
        ToleranceStatus::Failed
    }
}
