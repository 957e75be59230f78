//! Dose schedule generation.
//!
//! A medicine's plan is expanded eagerly into one pending [`DoseEvent`] per
//! (day, time) pair over its whole course. Generation is not idempotent:
//! callers generate once, when the medicine is created, and use
//! [`reconcile_schedule`] on edits.

use crate::dates::{add_days, scheduled_at, DoseTime};
use crate::{
    DoseEvent, DoseStatus, Error, Frequency, Medicine, MedicineDraft, MedicineStatus, Result,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use uuid::Uuid;

/// Upper bound on an explicit course length
pub const MAX_DURATION_DAYS: u32 = 3650;

/// Invariants shared by drafts and stored medicines
fn check_plan(
    name: &str,
    dosage: &str,
    frequency: Frequency,
    times: &[DoseTime],
    duration_days: Option<u32>,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("medicine name is required"));
    }
    if dosage.trim().is_empty() {
        return Err(Error::validation("dosage is required"));
    }

    let (min, max) = frequency.time_count();
    let count = times.len();
    if count < min || count > max {
        return Err(Error::validation(format!(
            "frequency {:?} needs {} time(s), got {}",
            frequency,
            if min == max {
                min.to_string()
            } else {
                format!("{}-{}", min, max)
            },
            count
        )));
    }

    let mut seen = HashSet::new();
    for time in times {
        if !seen.insert(*time) {
            return Err(Error::validation(format!("duplicate dose time {}", time)));
        }
    }

    match duration_days {
        Some(0) => return Err(Error::validation("duration must be at least one day")),
        Some(d) if d > MAX_DURATION_DAYS => {
            return Err(Error::validation(format!(
                "duration of {} days exceeds the {} day limit",
                d, MAX_DURATION_DAYS
            )))
        }
        _ => {}
    }

    Ok(())
}

impl Medicine {
    /// Check a stored or imported medicine against the same rules as a draft
    pub fn validate(&self) -> Result<()> {
        check_plan(
            &self.name,
            &self.dosage,
            self.frequency,
            &self.times,
            self.duration_days,
        )
    }
}

impl MedicineDraft {
    /// Check the draft before anything is written
    pub fn validate(&self) -> Result<()> {
        check_plan(
            &self.name,
            &self.dosage,
            self.frequency,
            &self.times,
            self.duration_days,
        )
    }

    /// Build a new active medicine from a validated draft
    pub fn into_medicine(self, now: NaiveDateTime) -> Medicine {
        Medicine {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            dosage: self.dosage.trim().to_string(),
            form: self.form,
            frequency: self.frequency,
            times: self.times,
            start_date: self.start_date,
            duration_days: self.duration_days,
            instructions: self.instructions.filter(|s| !s.trim().is_empty()),
            critical: self.critical,
            status: MedicineStatus::Active,
            created_at: now,
            updated_at: None,
            completed_at: None,
        }
    }

    /// Apply an edit to an existing medicine, keeping identity and lifecycle
    pub fn apply_to(self, medicine: &mut Medicine, now: NaiveDateTime) {
        medicine.name = self.name.trim().to_string();
        medicine.dosage = self.dosage.trim().to_string();
        medicine.form = self.form;
        medicine.frequency = self.frequency;
        medicine.times = self.times;
        medicine.start_date = self.start_date;
        medicine.duration_days = self.duration_days;
        medicine.instructions = self.instructions.filter(|s| !s.trim().is_empty());
        medicine.critical = self.critical;
        medicine.updated_at = Some(now);
    }
}

/// Number of calendar days the schedule covers
pub fn horizon_days(medicine: &Medicine, open_ended_days: u32) -> u32 {
    medicine.duration_days.unwrap_or(open_ended_days)
}

/// Last calendar day (inclusive) that carries doses
pub fn last_day(medicine: &Medicine, open_ended_days: u32) -> NaiveDate {
    add_days(
        medicine.start_date,
        i64::from(horizon_days(medicine, open_ended_days)) - 1,
    )
}

fn new_event(medicine: &Medicine, date: NaiveDate, time: DoseTime, now: NaiveDateTime) -> DoseEvent {
    DoseEvent {
        id: Uuid::new_v4(),
        medicine_id: medicine.id,
        medicine_name: medicine.name.clone(),
        dosage: medicine.dosage.clone(),
        date,
        time,
        critical: medicine.critical,
        status: DoseStatus::Pending,
        taken_at: None,
        skipped_at: None,
        created_at: now,
        updated_at: None,
    }
}

/// Expand a medicine into its full calendar of pending dose events.
///
/// Covers `start_date` through `start_date + duration - 1`, or
/// `open_ended_days` days when the course has no duration.
pub fn generate_schedule(
    medicine: &Medicine,
    open_ended_days: u32,
    now: NaiveDateTime,
) -> Vec<DoseEvent> {
    let days = horizon_days(medicine, open_ended_days);
    let mut events = Vec::with_capacity(days as usize * medicine.times.len());

    for offset in 0..i64::from(days) {
        let date = add_days(medicine.start_date, offset);
        for time in &medicine.times {
            events.push(new_event(medicine, date, *time, now));
        }
    }

    tracing::debug!(
        "Generated {} dose events for {} over {} days",
        events.len(),
        medicine.name,
        days
    );
    events
}

/// Changes needed to bring a medicine's stored schedule in line with its plan
#[derive(Clone, Debug, Default)]
pub struct ScheduleDiff {
    pub removed: Vec<Uuid>,
    pub added: Vec<DoseEvent>,
}

impl ScheduleDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Reconcile the future part of a schedule after an edit.
///
/// Only pending events due at or after `now` are removed when their slot
/// left the plan; past and terminal events are never touched. Slots due at
/// or after `now` that have no event yet are added.
pub fn reconcile_schedule(
    existing: &[DoseEvent],
    medicine: &Medicine,
    open_ended_days: u32,
    now: NaiveDateTime,
) -> ScheduleDiff {
    let first = medicine.start_date.max(now.date());
    let last = last_day(medicine, open_ended_days);

    let mut planned = HashSet::new();
    let mut date = first;
    while date <= last {
        for time in &medicine.times {
            if scheduled_at(date, *time) >= now {
                planned.insert((date, *time));
            }
        }
        date = add_days(date, 1);
    }

    let mut diff = ScheduleDiff::default();
    let mut present = HashSet::new();

    for event in existing.iter().filter(|e| e.medicine_id == medicine.id) {
        let slot = (event.date, event.time);
        let upcoming = event.status == DoseStatus::Pending && event.scheduled_at() >= now;
        if upcoming && !planned.contains(&slot) {
            diff.removed.push(event.id);
        } else {
            present.insert(slot);
        }
    }

    let mut missing: Vec<_> = planned.difference(&present).copied().collect();
    missing.sort();
    diff.added = missing
        .into_iter()
        .map(|(date, time)| new_event(medicine, date, time, now))
        .collect();

    tracing::debug!(
        "Reconciled schedule for {}: {} removed, {} added",
        medicine.name,
        diff.removed.len(),
        diff.added.len()
    );
    diff
}
