//! The medicine tracker: one explicit context object that owns the store,
//! the clock, the notification sinks and the reminder bookkeeping.
//!
//! Every command commits through [`Store::transact`]. State-changing
//! commands finish with an achievement pass, so unlocks are announced as
//! soon as the change that earned them lands.

use crate::achievements::{self, Level};
use crate::adherence::{self, DayStats, MedicineStats, Statistics};
use crate::dates::{add_days, Clock};
use crate::lifecycle::{self, find_event_mut, Transition};
use crate::notify::{JsonlNotificationLog, NotificationSink};
use crate::reminder::{self, ReminderState, SweepOutcome, Sweeper};
use crate::schedule::{generate_schedule, reconcile_schedule};
use crate::store::{ExportBundle, JsonFileStore, Store, StoreExt};
use crate::{
    Achievement, Config, DoseEvent, DoseStatus, EmergencyContact, Error, MedicalInfo, Medicine,
    MedicineDraft, MedicineFilter, MedicineStatus, Notification, Result, Setting,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Setting key that turns reminders on or off at runtime
pub const SETTING_NOTIFICATIONS: &str = "notification_enabled";
/// Setting key overriding the reminder lead time, in minutes
pub const SETTING_REMINDER_ADVANCE: &str = "reminder_advance";

const NOTIFICATION_LOG: &str = "notifications.jsonl";

pub struct MedicineTracker<S: Store, C: Clock> {
    store: S,
    clock: C,
    config: Config,
    sinks: Vec<Box<dyn NotificationSink + Send>>,
    reminders: ReminderState,
    sweeper: Arc<Sweeper>,
}

impl<C: Clock> MedicineTracker<JsonFileStore, C> {
    /// Open the on-disk tracker under `config.data.data_dir`.
    ///
    /// Notifications are also appended to `notifications.jsonl` there.
    pub fn open(config: Config, clock: C) -> Result<Self> {
        let dir = config.data.data_dir.clone();
        let store = JsonFileStore::open(&dir)?;
        let mut tracker = Self::new(store, clock, config)?;
        tracker.add_sink(Box::new(JsonlNotificationLog::new(dir.join(NOTIFICATION_LOG))));
        Ok(tracker)
    }
}

impl<S: Store, C: Clock> MedicineTracker<S, C> {
    pub fn new(store: S, clock: C, config: Config) -> Result<Self> {
        let mut tracker = Self {
            store,
            clock,
            config,
            sinks: Vec::new(),
            reminders: ReminderState::new(),
            sweeper: Arc::new(Sweeper::new()),
        };
        tracker.ensure_achievements()?;
        Ok(tracker)
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink + Send>) {
        self.sinks.push(sink);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Seed the achievement catalog on first run
    fn ensure_achievements(&mut self) -> Result<()> {
        if !self.store.get_all::<Achievement>()?.is_empty() {
            return Ok(());
        }
        self.store.transact(|s| {
            if s.achievements.is_empty() {
                s.achievements = achievements::default_achievements();
                tracing::info!("Seeded {} achievements", s.achievements.len());
            }
            Ok(())
        })
    }

    fn deliver(&mut self, notifications: &[Notification]) {
        let now = self.clock.now();
        for notification in notifications {
            for sink in self.sinks.iter_mut() {
                if let Err(e) = sink.deliver(now, notification) {
                    tracing::warn!("Notification sink failed: {}", e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Medicines
    // ------------------------------------------------------------------

    /// Validate, store and schedule a new medicine in one commit
    pub fn add_medicine(&mut self, draft: MedicineDraft) -> Result<Medicine> {
        draft.validate()?;
        let now = self.clock.now();
        let medicine = draft.into_medicine(now);
        let events = generate_schedule(&medicine, self.config.schedule.open_ended_days, now);

        let stored = medicine.clone();
        self.store.transact(move |s| {
            s.insert(stored)?;
            s.dose_events.extend(events);
            Ok(())
        })?;

        tracing::info!("Added medicine {} ({})", medicine.name, medicine.id);
        self.check_achievements()?;
        Ok(medicine)
    }

    /// Apply an edit and reconcile the medicine's future pending doses
    pub fn update_medicine(&mut self, id: Uuid, draft: MedicineDraft) -> Result<Medicine> {
        draft.validate()?;
        let now = self.clock.now();
        let open_ended_days = self.config.schedule.open_ended_days;

        let updated = self.store.transact(|s| {
            let medicine = s.get_mut::<Medicine>(&id)?;
            draft.apply_to(medicine, now);
            let medicine = medicine.clone();

            let diff = reconcile_schedule(&s.dose_events, &medicine, open_ended_days, now);
            s.dose_events.retain(|e| !diff.removed.contains(&e.id));
            s.dose_events.extend(diff.added);
            Ok(medicine)
        })?;

        tracing::info!("Updated medicine {}", updated.name);
        self.check_achievements()?;
        Ok(updated)
    }

    /// Remove a medicine and all of its dose events; returns the event count removed
    pub fn delete_medicine(&mut self, id: Uuid) -> Result<usize> {
        let removed = self.store.transact(|s| {
            if !s.delete::<Medicine>(&id) {
                return Err(Error::not_found("medicines", id));
            }
            let before = s.dose_events.len();
            s.dose_events.retain(|e| e.medicine_id != id);
            Ok(before - s.dose_events.len())
        })?;

        tracing::info!("Deleted medicine {} and {} dose events", id, removed);
        self.check_achievements()?;
        Ok(removed)
    }

    pub fn complete_medicine(&mut self, id: Uuid) -> Result<Medicine> {
        let now = self.clock.now();
        self.store.transact(|s| {
            let medicine = s.get_mut::<Medicine>(&id)?;
            medicine.status = MedicineStatus::Completed;
            medicine.completed_at = Some(now);
            medicine.updated_at = Some(now);
            Ok(medicine.clone())
        })
    }

    pub fn reactivate_medicine(&mut self, id: Uuid) -> Result<Medicine> {
        let now = self.clock.now();
        self.store.transact(|s| {
            let medicine = s.get_mut::<Medicine>(&id)?;
            medicine.status = MedicineStatus::Active;
            medicine.completed_at = None;
            medicine.updated_at = Some(now);
            Ok(medicine.clone())
        })
    }

    pub fn get_medicine(&self, id: Uuid) -> Result<Medicine> {
        self.store
            .get_by_id::<Medicine>(&id)?
            .ok_or_else(|| Error::not_found("medicines", id))
    }

    pub fn medicines(&self, filter: MedicineFilter) -> Result<Vec<Medicine>> {
        let mut medicines = self.store.get_all::<Medicine>()?;
        medicines.retain(|m| filter.matches(m));
        Ok(medicines)
    }

    /// Case-insensitive match on name, dosage or instructions
    pub fn search(&self, query: &str) -> Result<Vec<Medicine>> {
        let needle = query.trim().to_lowercase();
        let mut medicines = self.store.get_all::<Medicine>()?;
        if needle.is_empty() {
            return Ok(medicines);
        }
        medicines.retain(|m| {
            m.name.to_lowercase().contains(&needle)
                || m.dosage.to_lowercase().contains(&needle)
                || m.instructions
                    .as_deref()
                    .is_some_and(|i| i.to_lowercase().contains(&needle))
        });
        Ok(medicines)
    }

    // ------------------------------------------------------------------
    // Dose lifecycle
    // ------------------------------------------------------------------

    pub fn mark_taken(&mut self, event_id: Uuid) -> Result<Transition> {
        let now = self.clock.now();
        let transition = self
            .store
            .transact(|s| Ok(find_event_mut(&mut s.dose_events, event_id)?.mark_taken(now)))?;

        if transition.changed() {
            tracing::info!("Dose {} taken", event_id);
            self.check_achievements()?;
        }
        Ok(transition)
    }

    pub fn mark_skipped(&mut self, event_id: Uuid) -> Result<Transition> {
        let now = self.clock.now();
        let transition = self
            .store
            .transact(|s| Ok(find_event_mut(&mut s.dose_events, event_id)?.mark_skipped(now)))?;

        if transition.changed() {
            tracing::info!("Dose {} skipped", event_id);
            self.check_achievements()?;
        }
        Ok(transition)
    }

    /// Take every pending dose on `date`, one commit per dose.
    ///
    /// A failure stops the batch and leaves earlier doses taken.
    pub fn mark_all_taken(&mut self, date: NaiveDate) -> Result<usize> {
        let pending: Vec<Uuid> = self
            .schedule_for(date)?
            .into_iter()
            .filter(|e| e.status == DoseStatus::Pending)
            .map(|e| e.id)
            .collect();

        let total = pending.len();
        let mut taken = 0;
        for id in pending {
            match self.mark_taken(id) {
                Ok(t) if t.changed() => taken += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Marked {} of {} doses before failure: {}", taken, total, e);
                    return Err(e);
                }
            }
        }
        Ok(taken)
    }

    /// Flip overdue pending doses to missed as of now
    pub fn sweep_missed(&mut self) -> Result<SweepOutcome> {
        let now = self.clock.now();
        self.sweep_missed_as_of(now)
    }

    pub fn sweep_missed_as_of(&mut self, as_of: NaiveDateTime) -> Result<SweepOutcome> {
        let sweeper = Arc::clone(&self.sweeper);
        let store = &mut self.store;
        sweeper.run(|| {
            store.transact(|s| Ok(lifecycle::sweep_missed(&mut s.dose_events, as_of).len()))
        })
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    pub fn notifications_enabled(&self) -> Result<bool> {
        Ok(self
            .setting(SETTING_NOTIFICATIONS)?
            .and_then(|v| v.as_bool())
            .unwrap_or(self.config.reminders.enabled))
    }

    pub fn reminder_advance_minutes(&self) -> Result<i64> {
        Ok(self
            .setting(SETTING_REMINDER_ADVANCE)?
            .and_then(|v| v.as_i64())
            .unwrap_or(self.config.reminders.advance_minutes))
    }

    /// Announce reminders that came due since the last call
    pub fn due_reminders(&mut self) -> Result<Vec<Notification>> {
        if !self.notifications_enabled()? {
            return Ok(Vec::new());
        }
        let advance = self.reminder_advance_minutes()?;
        let now = self.clock.now();
        let today = now.date();
        let tomorrow = add_days(today, 1);

        let events: Vec<DoseEvent> = self
            .store
            .get_all::<DoseEvent>()?
            .into_iter()
            .filter(|e| e.date == today || e.date == tomorrow)
            .collect();

        self.reminders.forget_settled(&events);
        let due = self.reminders.due(&events, now, advance);
        self.deliver(&due);
        Ok(due)
    }

    /// Announce a pending dose again after `minutes`
    pub fn snooze(&mut self, event_id: Uuid, minutes: i64) -> Result<NaiveDateTime> {
        let event = self
            .store
            .get_by_id::<DoseEvent>(&event_id)?
            .ok_or_else(|| Error::not_found("dose_events", event_id))?;
        if event.status != DoseStatus::Pending {
            return Err(Error::validation(format!(
                "cannot snooze a dose that is already {}",
                event.status
            )));
        }

        let until = self.clock.now() + Duration::minutes(minutes.max(1));
        self.reminders.snooze(event_id, until);
        Ok(until)
    }

    /// Pending doses due within `window_minutes` (config default when `None`)
    pub fn upcoming(&self, window_minutes: Option<i64>) -> Result<Vec<DoseEvent>> {
        let window = window_minutes.unwrap_or(self.config.reminders.upcoming_window_minutes);
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(reminder::upcoming(&events, self.clock.now(), window))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every dose on `date`, ordered by time
    pub fn schedule_for(&self, date: NaiveDate) -> Result<Vec<DoseEvent>> {
        let mut events: Vec<DoseEvent> = self
            .store
            .get_all::<DoseEvent>()?
            .into_iter()
            .filter(|e| e.date == date)
            .collect();
        events.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.medicine_name.cmp(&b.medicine_name)));
        Ok(events)
    }

    pub fn today_stats(&self) -> Result<DayStats> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::today_stats(&events, self.clock.today()))
    }

    pub fn adherence_rate(&self, start: NaiveDate, end: NaiveDate) -> Result<f64> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::adherence_rate(&events, start, end))
    }

    pub fn medicine_stats(&self, medicine_id: Uuid) -> Result<MedicineStats> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::medicine_stats(&events, medicine_id))
    }

    pub fn current_streak(&self) -> Result<u32> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::current_streak(&events, self.clock.today()))
    }

    pub fn statistics(&self) -> Result<Statistics> {
        let snapshot = self.store.load()?;
        Ok(Statistics::compute(
            &snapshot.dose_events,
            snapshot.medicines.len() as u32,
            snapshot.emergency_contacts.len() as u32,
            self.clock.today(),
            &self.config.adherence,
        ))
    }

    /// Sunday-first week, `offset` weeks from the current one
    pub fn weekly_stats(&self, offset: i64) -> Result<Vec<DayStats>> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::weekly_stats(&events, self.clock.today(), offset))
    }

    pub fn daily_trend(&self, days: u32) -> Result<Vec<DayStats>> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::daily_trend(&events, self.clock.today(), days))
    }

    /// Mean minutes between schedule and intake over taken doses
    pub fn average_deviation(&self) -> Result<i64> {
        let events = self.store.get_all::<DoseEvent>()?;
        Ok(adherence::average_deviation_minutes(&events))
    }

    // ------------------------------------------------------------------
    // Achievements
    // ------------------------------------------------------------------

    /// Reconcile achievements with current statistics and announce unlocks
    pub fn check_achievements(&mut self) -> Result<Vec<Notification>> {
        let now = self.clock.now();
        let today = self.clock.today();
        let options = self.config.adherence.clone();

        let unlocked = self.store.transact(|s| {
            let stats = Statistics::compute(
                &s.dose_events,
                s.medicines.len() as u32,
                s.emergency_contacts.len() as u32,
                today,
                &options,
            );
            Ok(achievements::reconcile(&mut s.achievements, &stats, now))
        })?;

        self.deliver(&unlocked);
        Ok(unlocked)
    }

    pub fn achievements(&self) -> Result<Vec<Achievement>> {
        self.store.get_all::<Achievement>()
    }

    pub fn total_points(&self) -> Result<u32> {
        Ok(achievements::total_points(&self.achievements()?))
    }

    pub fn level(&self) -> Result<Level> {
        Ok(achievements::level_for(self.total_points()?))
    }

    pub fn current_goals(&self, limit: usize) -> Result<Vec<Achievement>> {
        let all = self.achievements()?;
        Ok(achievements::current_goals(&all, limit)
            .into_iter()
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // Contacts, settings and medical info
    // ------------------------------------------------------------------

    pub fn add_contact(
        &mut self,
        name: &str,
        phone: &str,
        relation: Option<String>,
    ) -> Result<EmergencyContact> {
        if name.trim().is_empty() {
            return Err(Error::validation("contact name is required"));
        }
        validate_phone(phone)?;

        let contact = EmergencyContact {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
            relation: relation.filter(|r| !r.trim().is_empty()),
            created_at: self.clock.now(),
        };
        self.store.insert(contact.clone())?;

        tracing::info!("Added emergency contact {}", contact.name);
        self.check_achievements()?;
        Ok(contact)
    }

    pub fn contacts(&self) -> Result<Vec<EmergencyContact>> {
        self.store.get_all::<EmergencyContact>()
    }

    pub fn remove_contact(&mut self, id: Uuid) -> Result<()> {
        if !self.store.delete::<EmergencyContact>(&id)? {
            return Err(Error::not_found("emergency_contacts", id));
        }
        Ok(())
    }

    pub fn setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.store.get_by_id::<Setting>(key)?.map(|s| s.value))
    }

    pub fn settings(&self) -> Result<Vec<Setting>> {
        self.store.get_all::<Setting>()
    }

    pub fn set_setting(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::validation("setting key is required"));
        }
        self.store.update(Setting {
            key: key.trim().to_string(),
            value,
        })
    }

    pub fn medical_info(&self) -> Result<Vec<MedicalInfo>> {
        self.store.get_all::<MedicalInfo>()
    }

    pub fn set_medical_info(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::validation("medical info key is required"));
        }
        self.store.update(MedicalInfo {
            key: key.trim().to_string(),
            value,
        })
    }

    // ------------------------------------------------------------------
    // Data management
    // ------------------------------------------------------------------

    pub fn export_all(&self) -> Result<ExportBundle> {
        self.store.export_all(self.clock.now())
    }

    /// Replace all data with `bundle`; rejected bundles change nothing
    pub fn import_all(&mut self, bundle: ExportBundle) -> Result<()> {
        self.store.import_all(bundle)?;
        self.reminders = ReminderState::new();
        self.ensure_achievements()?;
        tracing::info!("Imported data bundle");
        Ok(())
    }

    /// Erase every collection, then reseed achievements
    pub fn clear_all(&mut self) -> Result<()> {
        self.store.transact(|s| {
            *s = Default::default();
            Ok(())
        })?;
        self.reminders = ReminderState::new();
        self.ensure_achievements()?;
        tracing::warn!("All data cleared");
        Ok(())
    }

    /// Write the dose history as CSV; returns the row count
    pub fn write_report(&self, path: &Path) -> Result<usize> {
        let events = self.store.get_all::<DoseEvent>()?;
        crate::report::write_history_file(&events, path)
    }
}

/// Digits, spaces, `+`, `-` and parentheses only, with at least ten digits
fn validate_phone(phone: &str) -> Result<()> {
    let phone = phone.trim();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')'));
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();

    if !allowed || digits < 10 {
        return Err(Error::validation(format!("invalid phone number '{}'", phone)));
    }
    Ok(())
}
