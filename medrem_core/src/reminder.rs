//! Reminder detection and the periodic missed-dose sweep.

use crate::{DoseEvent, DoseStatus, Notification, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Tracks which reminders were already announced and which are snoozed
#[derive(Debug, Default)]
pub struct ReminderState {
    announced: HashSet<Uuid>,
    snoozed: HashMap<Uuid, NaiveDateTime>,
}

impl ReminderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reminders that should fire at `now`.
    ///
    /// A pending event is due once `now` is within `advance_minutes` of its
    /// scheduled time and the time has not passed yet. A snoozed event is
    /// due again once its snooze expires. Each event is announced once per
    /// snooze cycle.
    pub fn due(
        &mut self,
        events: &[DoseEvent],
        now: NaiveDateTime,
        advance_minutes: i64,
    ) -> Vec<Notification> {
        let advance = Duration::minutes(advance_minutes.max(0));
        let mut due = Vec::new();

        for event in events.iter().filter(|e| e.status == DoseStatus::Pending) {
            let scheduled = event.scheduled_at();
            let fire = match self.snoozed.get(&event.id) {
                Some(until) => *until <= now,
                None => scheduled - advance <= now && now <= scheduled,
            };

            if fire && self.announced.insert(event.id) {
                self.snoozed.remove(&event.id);
                due.push(Notification::ReminderDue {
                    event_id: event.id,
                    medicine_name: event.medicine_name.clone(),
                    dosage: event.dosage.clone(),
                    critical: event.critical,
                    scheduled_at: scheduled,
                });
            }
        }

        if !due.is_empty() {
            tracing::info!("{} reminder(s) due", due.len());
        }
        due
    }

    /// Re-announce `event_id` at `until`
    pub fn snooze(&mut self, event_id: Uuid, until: NaiveDateTime) {
        self.announced.remove(&event_id);
        self.snoozed.insert(event_id, until);
    }

    /// Drop bookkeeping for events that are no longer pending
    pub fn forget_settled(&mut self, events: &[DoseEvent]) {
        let pending: HashSet<Uuid> = events
            .iter()
            .filter(|e| e.status == DoseStatus::Pending)
            .map(|e| e.id)
            .collect();
        self.announced.retain(|id| pending.contains(id));
        self.snoozed.retain(|id, _| pending.contains(id));
    }
}

/// Pending events scheduled within `[now, now + window_minutes]`, soonest first
pub fn upcoming(events: &[DoseEvent], now: NaiveDateTime, window_minutes: i64) -> Vec<DoseEvent> {
    let end = now + Duration::minutes(window_minutes);
    let mut found: Vec<DoseEvent> = events
        .iter()
        .filter(|e| e.status == DoseStatus::Pending)
        .filter(|e| {
            let at = e.scheduled_at();
            now <= at && at <= end
        })
        .cloned()
        .collect();
    found.sort_by_key(|e| e.scheduled_at());
    found
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The sweep ran and flipped this many events to missed
    Ran(usize),
    /// Another sweep was still in flight; nothing was done
    AlreadyRunning,
}

/// Guards the missed-dose sweep against overlapping runs
#[derive(Debug, Default)]
pub struct Sweeper {
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run `sweep` unless a previous run has not finished
    pub fn run<F>(&self, sweep: F) -> Result<SweepOutcome>
    where
        F: FnOnce() -> Result<usize>,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sweep already in flight, skipping");
            return Ok(SweepOutcome::AlreadyRunning);
        }
        let _guard = InFlight(&self.in_flight);

        sweep().map(SweepOutcome::Ran)
    }
}

/// Runs a closure on a fixed interval on a background thread
pub struct IntervalTask {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalTask {
    /// First tick fires one `interval` after spawning
    pub fn spawn<F>(interval: std::time::Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the task to stop and wait for the current tick to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Interval task panicked");
            }
        }
    }
}

impl Drop for IntervalTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
