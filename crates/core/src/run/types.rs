//! Run data types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A run candidate reported by a probe, before the controller adopts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedRun {
    /// Opaque run identifier.
    pub id: String,
    /// Location fragments of this run appear at.
    pub location: String,
    /// Directory holding the run's persisted state and job directories.
    pub working_dir: PathBuf,
    /// Start time as known upstream, if the probe has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Upstream view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    /// Last data unit (e.g. lumisection) the upstream registry has seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unit_seen: Option<u64>,
    /// `false` once the run has ended upstream.
    pub still_active: bool,
}

/// The run a controller is currently driving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub location: String,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Force-finalization time; `None` when no timeout is configured.
    pub deadline: Option<DateTime<Utc>>,
    /// Latest activity reported by the probe.
    pub still_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unit_seen: Option<u64>,
}

impl Run {
    /// Adopt a detected run that started at `started_at`.
    pub fn new(detected: DetectedRun, started_at: DateTime<Utc>, timeout: Option<Duration>) -> Self {
        Self {
            id: detected.id,
            location: detected.location,
            working_dir: detected.working_dir,
            started_at,
            deadline: timeout.map(|t| started_at + t),
            still_active: true,
            last_unit_seen: None,
        }
    }

    /// Whether the run's deadline has passed at `now`.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }

    /// Record the latest status reported upstream.
    pub fn observe(&mut self, status: &RunStatus) {
        self.still_active = status.still_active;
        if status.last_unit_seen.is_some() {
            self.last_unit_seen = status.last_unit_seen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> DetectedRun {
        DetectedRun {
            id: "398348".to_string(),
            location: "/tmp/ngt/run398348".to_string(),
            working_dir: PathBuf::from("/tmp/ngt/run398348"),
            started_at: None,
        }
    }

    #[test]
    fn test_deadline_from_timeout() {
        let start = Utc::now();
        let run = Run::new(detected(), start, Some(Duration::hours(8)));
        assert_eq!(run.deadline, Some(start + Duration::hours(8)));
        assert!(!run.timed_out(start + Duration::hours(7)));
        assert!(run.timed_out(start + Duration::hours(8) + Duration::seconds(1)));
    }

    #[test]
    fn test_no_timeout_never_times_out() {
        let start = Utc::now();
        let run = Run::new(detected(), start, None);
        assert!(!run.timed_out(start + Duration::days(365)));
    }

    #[test]
    fn test_observe_keeps_last_unit() {
        let mut run = Run::new(detected(), Utc::now(), None);
        run.observe(&RunStatus {
            run_id: "398348".to_string(),
            last_unit_seen: Some(187),
            still_active: true,
        });
        run.observe(&RunStatus {
            run_id: "398348".to_string(),
            last_unit_seen: None,
            still_active: false,
        });
        assert!(!run.still_active);
        assert_eq!(run.last_unit_seen, Some(187));
    }
}
