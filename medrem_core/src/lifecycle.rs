//! Dose event lifecycle.
//!
//! ```text
//! pending --take--> taken
//! pending --skip--> skipped
//! pending --sweep--> missed --take (late)--> taken
//! ```
//!
//! The sweep is the only automatic transition. Taken and skipped are final;
//! asking for a transition that does not apply is a no-op, not an error.

use crate::{DoseEvent, DoseStatus, Error, Result};
use chrono::NaiveDateTime;
use uuid::Uuid;

/// Result of asking a dose event to change state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied { from: DoseStatus, to: DoseStatus },
    Unchanged(DoseStatus),
}

impl Transition {
    pub fn changed(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

impl DoseEvent {
    /// Record the dose as taken at `at`.
    ///
    /// Allowed from pending and, for late manual confirmation, from missed.
    pub fn mark_taken(&mut self, at: NaiveDateTime) -> Transition {
        match self.status {
            DoseStatus::Pending | DoseStatus::Missed => {
                let from = self.status;
                self.status = DoseStatus::Taken;
                self.taken_at = Some(at);
                self.updated_at = Some(at);
                Transition::Applied {
                    from,
                    to: DoseStatus::Taken,
                }
            }
            other => Transition::Unchanged(other),
        }
    }

    pub fn mark_skipped(&mut self, at: NaiveDateTime) -> Transition {
        match self.status {
            DoseStatus::Pending => {
                self.status = DoseStatus::Skipped;
                self.skipped_at = Some(at);
                self.updated_at = Some(at);
                Transition::Applied {
                    from: DoseStatus::Pending,
                    to: DoseStatus::Skipped,
                }
            }
            other => Transition::Unchanged(other),
        }
    }

    /// Flip to missed when still pending and the scheduled time has passed
    pub fn mark_missed_if_overdue(&mut self, as_of: NaiveDateTime) -> Transition {
        if self.status == DoseStatus::Pending && self.scheduled_at() < as_of {
            self.status = DoseStatus::Missed;
            self.updated_at = Some(as_of);
            Transition::Applied {
                from: DoseStatus::Pending,
                to: DoseStatus::Missed,
            }
        } else {
            Transition::Unchanged(self.status)
        }
    }
}

/// Mark every overdue pending event as missed; returns the ids that changed
pub fn sweep_missed(events: &mut [DoseEvent], as_of: NaiveDateTime) -> Vec<Uuid> {
    let flipped: Vec<Uuid> = events
        .iter_mut()
        .filter_map(|e| e.mark_missed_if_overdue(as_of).changed().then_some(e.id))
        .collect();

    if !flipped.is_empty() {
        tracing::info!("Sweep marked {} dose(s) as missed", flipped.len());
    }
    flipped
}

pub fn find_event_mut(events: &mut [DoseEvent], id: Uuid) -> Result<&mut DoseEvent> {
    events
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| Error::not_found("dose_events", id))
}
