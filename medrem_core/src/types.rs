//! Core domain types for medrem.
//!
//! This module defines the records the engine stores and exchanges:
//! - Medicines and the drafts used to create or edit them
//! - Dose events and their lifecycle status
//! - Achievements and the statistics they track
//! - Emergency contacts, settings and medical info
//! - Notifications pushed to the outside world

use crate::dates::DoseTime;
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Medicine Types
// ============================================================================

/// Physical form of a medicine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MedicineForm {
    #[default]
    Tablet,
    Capsule,
    Syrup,
    Injection,
    Drops,
    Inhaler,
    Other,
}

impl FromStr for MedicineForm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tablet" => Ok(Self::Tablet),
            "capsule" => Ok(Self::Capsule),
            "syrup" => Ok(Self::Syrup),
            "injection" => Ok(Self::Injection),
            "drops" => Ok(Self::Drops),
            "inhaler" => Ok(Self::Inhaler),
            "other" => Ok(Self::Other),
            other => Err(Error::validation(format!("unknown medicine form '{}'", other))),
        }
    }
}

/// How many administrations per day
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Once,
    Twice,
    Thrice,
    Four,
    /// Any count from one to four
    Custom,
}

impl Frequency {
    /// Inclusive bounds on the number of times of day
    pub fn time_count(&self) -> (usize, usize) {
        match self {
            Frequency::Once => (1, 1),
            Frequency::Twice => (2, 2),
            Frequency::Thrice => (3, 3),
            Frequency::Four => (4, 4),
            Frequency::Custom => (1, 4),
        }
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "once" | "1" => Ok(Self::Once),
            "twice" | "2" => Ok(Self::Twice),
            "thrice" | "3" => Ok(Self::Thrice),
            "four" | "4" => Ok(Self::Four),
            "custom" => Ok(Self::Custom),
            other => Err(Error::validation(format!("unknown frequency '{}'", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MedicineStatus {
    #[default]
    Active,
    Completed,
}

/// A registered medicine and its dosing plan
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    pub dosage: String,
    pub form: MedicineForm,
    pub frequency: Frequency,
    pub times: Vec<DoseTime>,
    pub start_date: NaiveDate,
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub status: MedicineStatus,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
}

/// User input for creating or editing a medicine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicineDraft {
    pub name: String,
    pub dosage: String,
    pub form: MedicineForm,
    pub frequency: Frequency,
    pub times: Vec<DoseTime>,
    pub start_date: NaiveDate,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
    pub critical: bool,
}

/// Filter for listing medicines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MedicineFilter {
    #[default]
    All,
    Active,
    Completed,
    Critical,
}

impl MedicineFilter {
    pub fn matches(&self, medicine: &Medicine) -> bool {
        match self {
            MedicineFilter::All => true,
            MedicineFilter::Active => medicine.status == MedicineStatus::Active,
            MedicineFilter::Completed => medicine.status == MedicineStatus::Completed,
            MedicineFilter::Critical => medicine.critical,
        }
    }
}

impl FromStr for MedicineFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "critical" => Ok(Self::Critical),
            other => Err(Error::validation(format!("unknown filter '{}'", other))),
        }
    }
}

// ============================================================================
// Dose Event Types
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Pending,
    Taken,
    Missed,
    Skipped,
}

impl DoseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DoseStatus::Pending)
    }
}

impl fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DoseStatus::Pending => "pending",
            DoseStatus::Taken => "taken",
            DoseStatus::Missed => "missed",
            DoseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One scheduled administration of a medicine.
///
/// `medicine_name`, `dosage` and `critical` are snapshots taken when the
/// event was generated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseEvent {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    pub date: NaiveDate,
    pub time: DoseTime,
    #[serde(default)]
    pub critical: bool,
    pub status: DoseStatus,
    #[serde(default)]
    pub taken_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub skipped_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl DoseEvent {
    pub fn scheduled_at(&self) -> NaiveDateTime {
        crate::dates::scheduled_at(self.date, self.time)
    }
}

// ============================================================================
// Achievement Types
// ============================================================================

/// The statistic an achievement tracks
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatKey {
    MedicinesAdded,
    TotalDoses,
    OnTimeDoses,
    PerfectDays,
    HighAdherenceDays,
    StreakDays,
    EmergencyContacts,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Achievement {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub stat: StatKey,
    pub target: u32,
    pub points: u32,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub unlocked_at: Option<NaiveDateTime>,
}

impl Achievement {
    /// Progress towards the target as a fraction in `0.0..=1.0`
    pub fn ratio(&self) -> f64 {
        if self.unlocked || self.target == 0 {
            return 1.0;
        }
        (f64::from(self.progress) / f64::from(self.target)).min(1.0)
    }
}

// ============================================================================
// Auxiliary Records
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmergencyContact {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relation: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Key/value application setting
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: serde_json::Value,
}

/// Key/value medical information (blood type, allergies, ...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicalInfo {
    pub key: String,
    pub value: serde_json::Value,
}

// ============================================================================
// Notifications
// ============================================================================

/// Events pushed to notification collaborators
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    AchievementUnlocked {
        achievement_id: Uuid,
        title: String,
        icon: String,
        points: u32,
    },
    ReminderDue {
        event_id: Uuid,
        medicine_name: String,
        dosage: String,
        critical: bool,
        scheduled_at: NaiveDateTime,
    },
}
