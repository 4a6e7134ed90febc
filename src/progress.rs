//! Progress reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage as seen by progress listeners.
///
/// The vocabulary and its order are fixed; stages never regress within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Preparing,
    Compressing,
    Packaging,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Preparing => "preparing",
            Stage::Compressing => "compressing",
            Stage::Packaging => "packaging",
            Stage::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0-100
    #[serde(rename = "progress")]
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
        }
    }
}

/// Percent reserved for the compressing stage
pub const COMPRESSING_SPAN: u8 = 80;

/// Compressing percent for `processed` of an estimated `total` frames.
///
/// Stays below [`COMPRESSING_SPAN`] until the source is exhausted, because the
/// estimate can undershoot the real frame count.
pub fn compressing_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let raw = (processed as f64 / total as f64 * COMPRESSING_SPAN as f64).round();
    (raw as u64).min(COMPRESSING_SPAN as u64 - 1) as u8
}

/// Forwards events to a caller callback while enforcing stage order and
/// per-stage monotonic percent.
pub struct ProgressReporter<'a> {
    callback: &'a mut dyn FnMut(ProgressEvent),
    last: Option<ProgressEvent>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    /// Emit `percent` for `stage`.
    ///
    /// Regressions are dropped, as are repeats of the previous event.
    pub fn report(&mut self, stage: Stage, percent: u8) {
        let event = ProgressEvent::new(stage, percent);
        if let Some(last) = self.last {
            if stage < last.stage {
                tracing::debug!(from = %last.stage, to = %stage, "ignoring stage regression");
                return;
            }
            if stage == last.stage && event.percent <= last.percent {
                return;
            }
        }
        self.last = Some(event);
        (self.callback)(event);
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        self.last
    }
}
