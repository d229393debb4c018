use crate::app::DealwatchError;

/// What to do about one failed crawl cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureReport {
    pub consecutive: u64,
    /// Log at error level rather than debug.
    pub log: bool,
    /// Tell the operator through the delivery channel.
    pub escalate: bool,
}

/// Counts consecutive cycle failures and rate-limits their reporting.
///
/// A failure is logged when its kind differs from the previous one, and
/// every `tries_before_log` failures in a row. Escalation happens once,
/// when the run of failures reaches the threshold. Zero behaves like one;
/// a negative threshold disables the periodic log and escalation.
#[derive(Debug)]
pub struct FailureTracker {
    tries_before_log: i64,
    consecutive: u64,
    last_kind: Option<&'static str>,
}

impl FailureTracker {
    pub fn new(tries_before_log: i64) -> Self {
        Self {
            tries_before_log: if tries_before_log == 0 { 1 } else { tries_before_log },
            consecutive: 0,
            last_kind: None,
        }
    }

    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }

    pub fn record(&mut self, error: &DealwatchError) -> FailureReport {
        self.consecutive += 1;
        let kind = error.kind();
        let new_kind = self.last_kind != Some(kind);
        self.last_kind = Some(kind);

        let threshold = u64::try_from(self.tries_before_log).ok();
        let periodic = threshold.is_some_and(|t| self.consecutive % t == 0);

        FailureReport {
            consecutive: self.consecutive,
            log: new_kind || periodic,
            escalate: threshold == Some(self.consecutive),
        }
    }

    /// A cycle went through; start counting from scratch.
    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.last_kind = None;
    }
}
