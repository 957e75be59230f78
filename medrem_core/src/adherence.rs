//! Adherence statistics derived from dose events.
//!
//! Everything here is a pure read over a slice of [`DoseEvent`]s and is
//! recomputed on demand; nothing is cached or persisted.

use crate::dates::{add_days, week_dates};
use crate::{AdherenceConfig, DoseEvent, DoseStatus, StatKey};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// `part / total` as a percentage; zero when `total` is zero
pub fn percentage(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(part) / f64::from(total) * 100.0
}

/// Counts for a single calendar day
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DayStats {
    pub date: NaiveDate,
    pub total: u32,
    pub taken: u32,
    pub pending: u32,
    pub missed: u32,
    pub skipped: u32,
    pub completion: f64,
}

/// Counts for one medicine across its whole schedule
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MedicineStats {
    pub medicine_id: Uuid,
    pub total: u32,
    pub taken: u32,
    pub missed: u32,
    pub skipped: u32,
    pub adherence: f64,
}

pub fn day_stats(events: &[DoseEvent], date: NaiveDate) -> DayStats {
    let mut stats = DayStats {
        date,
        total: 0,
        taken: 0,
        pending: 0,
        missed: 0,
        skipped: 0,
        completion: 0.0,
    };
    for event in events.iter().filter(|e| e.date == date) {
        stats.total += 1;
        match event.status {
            DoseStatus::Taken => stats.taken += 1,
            DoseStatus::Pending => stats.pending += 1,
            DoseStatus::Missed => stats.missed += 1,
            DoseStatus::Skipped => stats.skipped += 1,
        }
    }
    stats.completion = percentage(stats.taken, stats.total);
    stats
}

pub fn today_stats(events: &[DoseEvent], today: NaiveDate) -> DayStats {
    day_stats(events, today)
}

/// Percentage of events taken with `date` in `[start, end]`; zero when none
pub fn adherence_rate(events: &[DoseEvent], start: NaiveDate, end: NaiveDate) -> f64 {
    let (taken, total) = events
        .iter()
        .filter(|e| e.date >= start && e.date <= end)
        .fold((0u32, 0u32), |(taken, total), e| {
            (taken + u32::from(e.status == DoseStatus::Taken), total + 1)
        });
    percentage(taken, total)
}

/// (taken, total) per date that has at least one event
fn tally_by_date(events: &[DoseEvent]) -> BTreeMap<NaiveDate, (u32, u32)> {
    let mut days = BTreeMap::new();
    for event in events {
        let entry = days.entry(event.date).or_insert((0u32, 0u32));
        if event.status == DoseStatus::Taken {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
    days
}

/// Days where every scheduled dose was taken
pub fn perfect_days(events: &[DoseEvent]) -> u32 {
    tally_by_date(events)
        .values()
        .filter(|(taken, total)| *total > 0 && taken == total)
        .count() as u32
}

/// Days where at least `threshold_percent` of doses were taken
pub fn high_adherence_days(events: &[DoseEvent], threshold_percent: f64) -> u32 {
    tally_by_date(events)
        .values()
        .filter(|(taken, total)| *total > 0 && percentage(*taken, *total) >= threshold_percent)
        .count() as u32
}

/// Taken doses whose `taken_at` is within `window_minutes` of schedule
pub fn on_time_doses(events: &[DoseEvent], window_minutes: i64) -> u32 {
    events
        .iter()
        .filter(|e| e.status == DoseStatus::Taken)
        .filter_map(|e| e.taken_at.map(|at| (at - e.scheduled_at()).num_seconds().abs()))
        .filter(|deviation| *deviation <= window_minutes * 60)
        .count() as u32
}

/// Consecutive fully-adherent days ending today.
///
/// Walks back one calendar day at a time and stops at the first day that
/// has no events or is not 100% taken.
pub fn current_streak(events: &[DoseEvent], today: NaiveDate) -> u32 {
    let days = tally_by_date(events);
    let mut streak = 0;
    let mut check = today;

    while let Some((taken, total)) = days.get(&check) {
        if *total == 0 || taken != total {
            break;
        }
        streak += 1;
        check = add_days(check, -1);
    }

    streak
}

pub fn medicine_stats(events: &[DoseEvent], medicine_id: Uuid) -> MedicineStats {
    let mut stats = MedicineStats {
        medicine_id,
        total: 0,
        taken: 0,
        missed: 0,
        skipped: 0,
        adherence: 0.0,
    };
    for event in events.iter().filter(|e| e.medicine_id == medicine_id) {
        stats.total += 1;
        match event.status {
            DoseStatus::Taken => stats.taken += 1,
            DoseStatus::Missed => stats.missed += 1,
            DoseStatus::Skipped => stats.skipped += 1,
            DoseStatus::Pending => {}
        }
    }
    stats.adherence = percentage(stats.taken, stats.total);
    stats
}

/// Per-day breakdown for the Sunday-first week `offset` weeks from today
pub fn weekly_stats(events: &[DoseEvent], today: NaiveDate, offset: i64) -> Vec<DayStats> {
    week_dates(today, offset)
        .iter()
        .map(|date| day_stats(events, *date))
        .collect()
}

/// Per-day breakdown for the last `days` days, oldest first, ending today
pub fn daily_trend(events: &[DoseEvent], today: NaiveDate, days: u32) -> Vec<DayStats> {
    (0..i64::from(days))
        .rev()
        .map(|back| day_stats(events, add_days(today, -back)))
        .collect()
}

/// Mean absolute gap between schedule and intake, rounded to whole minutes
pub fn average_deviation_minutes(events: &[DoseEvent]) -> i64 {
    let deviations: Vec<i64> = events
        .iter()
        .filter(|e| e.status == DoseStatus::Taken)
        .filter_map(|e| e.taken_at.map(|at| (at - e.scheduled_at()).num_seconds().abs()))
        .collect();

    if deviations.is_empty() {
        return 0;
    }
    let mean_secs = deviations.iter().sum::<i64>() as f64 / deviations.len() as f64;
    (mean_secs / 60.0).round() as i64
}

/// The statistics bundle achievements are evaluated against
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Statistics {
    pub medicines_added: u32,
    pub total_doses: u32,
    pub on_time_doses: u32,
    pub perfect_days: u32,
    pub high_adherence_days: u32,
    pub streak_days: u32,
    pub emergency_contacts: u32,
}

impl Statistics {
    pub fn compute(
        events: &[DoseEvent],
        medicines_added: u32,
        emergency_contacts: u32,
        today: NaiveDate,
        options: &AdherenceConfig,
    ) -> Self {
        Self {
            medicines_added,
            total_doses: events
                .iter()
                .filter(|e| e.status == DoseStatus::Taken)
                .count() as u32,
            on_time_doses: on_time_doses(events, options.on_time_window_minutes),
            perfect_days: perfect_days(events),
            high_adherence_days: high_adherence_days(events, options.high_adherence_percent),
            streak_days: current_streak(events, today),
            emergency_contacts,
        }
    }

    /// Typed lookup; adding a `StatKey` variant without a field here fails to compile
    pub fn value(&self, key: StatKey) -> u32 {
        match key {
            StatKey::MedicinesAdded => self.medicines_added,
            StatKey::TotalDoses => self.total_doses,
            StatKey::OnTimeDoses => self.on_time_doses,
            StatKey::PerfectDays => self.perfect_days,
            StatKey::HighAdherenceDays => self.high_adherence_days,
            StatKey::StreakDays => self.streak_days,
            StatKey::EmergencyContacts => self.emergency_contacts,
        }
    }
}
