//! Read-only status projection over the tracker, scheduler and event log.

use crate::events::{EventLog, TrackedEvent};
use crate::scheduler::SchedulerInfo;
use crate::tracker::TrackerInfo;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the keeper reports, in one serializable value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeeperStatus {
    /// `None` when event tracking is disabled.
    pub tracker: Option<TrackerInfo>,
    pub scheduler: SchedulerInfo,
    pub events: Vec<TrackedEvent>,
}

/// Cheap to clone; every read is a snapshot and never blocks the loops.
#[derive(Clone)]
pub struct StatusReporter {
    tracker: Option<watch::Receiver<TrackerInfo>>,
    scheduler: watch::Receiver<SchedulerInfo>,
    events: Arc<EventLog>,
}

impl StatusReporter {
    pub fn new(
        tracker: Option<watch::Receiver<TrackerInfo>>,
        scheduler: watch::Receiver<SchedulerInfo>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            tracker,
            scheduler,
            events,
        }
    }

    pub fn tracker_info(&self) -> Option<TrackerInfo> {
        self.tracker.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn scheduler_info(&self) -> SchedulerInfo {
        self.scheduler.borrow().clone()
    }

    /// Tracked events, oldest first.
    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events.list()
    }

    pub fn snapshot(&self) -> KeeperStatus {
        KeeperStatus {
            tracker: self.tracker_info(),
            scheduler: self.scheduler_info(),
            events: self.events(),
        }
    }
}
