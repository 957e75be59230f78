//! Notification delivery.
//!
//! Reminders and achievement unlocks are pushed to every registered
//! [`NotificationSink`]. The JSONL log appends one entry per notification
//! under a file lock so concurrent processes can share it.

use crate::{Notification, Result};
use chrono::NaiveDateTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Receiver of engine notifications
pub trait NotificationSink {
    fn deliver(&mut self, at: NaiveDateTime, notification: &Notification) -> Result<()>;
}

/// One line of the notification log
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoggedNotification {
    pub at: NaiveDateTime,
    pub notification: Notification,
}

/// Append-only JSONL notification log
pub struct JsonlNotificationLog {
    path: PathBuf,
}

impl JsonlNotificationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationSink for JsonlNotificationLog {
    fn deliver(&mut self, at: NaiveDateTime, notification: &Notification) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let entry = LoggedNotification {
            at,
            notification: notification.clone(),
        };
        let mut writer = std::io::BufWriter::new(&file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!("Logged notification to {:?}", self.path);
        Ok(())
    }
}

/// Read every entry of a notification log, skipping unparseable lines
pub fn read_notifications(path: &Path) -> Result<Vec<LoggedNotification>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut entries = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LoggedNotification>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Skipping notification at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    Ok(entries)
}

/// In-memory sink whose contents stay visible through a cloned handle
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for CollectingSink {
    fn deliver(&mut self, _at: NaiveDateTime, notification: &Notification) -> Result<()> {
        let mut guard = match self.received.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;
    use uuid::Uuid;

    fn at() -> NaiveDateTime {
        parse_date("2024-03-01").unwrap().and_hms_opt(7, 45, 0).unwrap()
    }

    fn reminder() -> Notification {
        Notification::ReminderDue {
            event_id: Uuid::new_v4(),
            medicine_name: "Insulin".into(),
            dosage: "10 units".into(),
            critical: true,
            scheduled_at: at(),
        }
    }

    #[test]
    fn test_log_append_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("notifications.jsonl");

        let mut log = JsonlNotificationLog::new(&path);
        log.deliver(at(), &reminder()).unwrap();
        log.deliver(
            at(),
            &Notification::AchievementUnlocked {
                achievement_id: Uuid::new_v4(),
                title: "First Step".into(),
                icon: "🎯".into(),
                points: 10,
            },
        )
        .unwrap();

        let entries = read_notifications(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].notification, Notification::ReminderDue { critical: true, .. }));
        assert_eq!(entries[1].at, at());
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("notifications.jsonl");

        let mut log = JsonlNotificationLog::new(&path);
        log.deliver(at(), &reminder()).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{ not json").unwrap();
        }
        log.deliver(at(), &reminder()).unwrap();

        assert_eq!(read_notifications(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(read_notifications(&temp_dir.path().join("none.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_collecting_sink_shares_contents() {
        let sink = CollectingSink::new();
        let mut handle = sink.clone();
        handle.deliver(at(), &reminder()).unwrap();
        assert_eq!(sink.received().len(), 1);
    }
}
