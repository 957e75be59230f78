//! Achievement catalog and unlock engine.
//!
//! Achievements are seeded once from [`ACHIEVEMENT_CATALOG`] and then
//! reconciled against fresh [`Statistics`] after every state change.
//! Unlocking is one-way: an unlocked achievement is never re-evaluated.

use crate::adherence::Statistics;
use crate::{Achievement, Notification, StatKey};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

/// Static definition an [`Achievement`] record is seeded from
#[derive(Clone, Debug)]
pub struct AchievementDef {
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub stat: StatKey,
    pub target: u32,
    pub points: u32,
}

/// Built once and shared for the life of the process
pub static ACHIEVEMENT_CATALOG: Lazy<Vec<AchievementDef>> = Lazy::new(build_catalog);

fn def(
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    stat: StatKey,
    target: u32,
    points: u32,
) -> AchievementDef {
    AchievementDef {
        title,
        description,
        icon,
        stat,
        target,
        points,
    }
}

fn build_catalog() -> Vec<AchievementDef> {
    use StatKey::*;
    vec![
        def("First Step", "Add your first medicine", "🎯", MedicinesAdded, 1, 10),
        def("Medicine Cabinet", "Add 5 medicines", "💊", MedicinesAdded, 5, 50),
        def("Perfect Day", "Take every dose on a single day", "⭐", PerfectDays, 1, 25),
        def("Week Warrior", "Reach 100% adherence on 7 days", "🏆", PerfectDays, 7, 100),
        def("Monthly Master", "Reach 90%+ adherence on 30 days", "👑", HighAdherenceDays, 30, 200),
        def("Early Bird", "Take 10 doses within 5 minutes of schedule", "🐦", OnTimeDoses, 10, 50),
        def("Consistency King", "Build a 30-day streak", "🔥", StreakDays, 30, 150),
        def("Century Club", "Take 100 doses", "💯", TotalDoses, 100, 100),
        def("Dedicated", "Take 500 doses", "🌟", TotalDoses, 500, 250),
        def("Health Champion", "Take 1000 doses", "🏅", TotalDoses, 1000, 500),
        def("Punctual Pro", "Take 50 doses on time", "⏰", OnTimeDoses, 50, 100),
        def("Safety First", "Add an emergency contact", "🚨", EmergencyContacts, 1, 20),
    ]
}

/// Fresh, locked achievement records for first run
pub fn default_achievements() -> Vec<Achievement> {
    ACHIEVEMENT_CATALOG
        .iter()
        .map(|d| Achievement {
            id: Uuid::new_v4(),
            title: d.title.into(),
            description: d.description.into(),
            icon: d.icon.into(),
            stat: d.stat,
            target: d.target,
            points: d.points,
            progress: 0,
            unlocked: false,
            unlocked_at: None,
        })
        .collect()
}

/// Bring every locked achievement up to date with `stats`.
///
/// Returns one `AchievementUnlocked` notification per achievement that
/// crossed its target during this call. Already-unlocked records are left
/// untouched.
pub fn reconcile(
    achievements: &mut [Achievement],
    stats: &Statistics,
    now: NaiveDateTime,
) -> Vec<Notification> {
    let mut unlocked = Vec::new();

    for achievement in achievements.iter_mut().filter(|a| !a.unlocked) {
        let progress = stats.value(achievement.stat);
        achievement.progress = progress;

        if progress >= achievement.target {
            achievement.unlocked = true;
            achievement.unlocked_at = Some(now);
            tracing::info!(
                "Achievement unlocked: {} (+{} points)",
                achievement.title,
                achievement.points
            );
            unlocked.push(Notification::AchievementUnlocked {
                achievement_id: achievement.id,
                title: achievement.title.clone(),
                icon: achievement.icon.clone(),
                points: achievement.points,
            });
        }
    }

    unlocked
}

pub fn total_points(achievements: &[Achievement]) -> u32 {
    achievements
        .iter()
        .filter(|a| a.unlocked)
        .map(|a| a.points)
        .sum()
}

/// A user level reached at `min_points`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Level {
    pub level: u32,
    pub min_points: u32,
    pub title: &'static str,
}

/// Ascending; the first entry is reachable at zero points
pub const LEVELS: [Level; 8] = [
    Level { level: 1, min_points: 0, title: "Beginner" },
    Level { level: 2, min_points: 50, title: "Novice" },
    Level { level: 3, min_points: 150, title: "Intermediate" },
    Level { level: 4, min_points: 300, title: "Advanced" },
    Level { level: 5, min_points: 500, title: "Expert" },
    Level { level: 6, min_points: 800, title: "Master" },
    Level { level: 7, min_points: 1200, title: "Champion" },
    Level { level: 8, min_points: 1800, title: "Legend" },
];

/// Highest level whose threshold is at or below `points`
pub fn level_for(points: u32) -> Level {
    LEVELS
        .iter()
        .rev()
        .find(|l| points >= l.min_points)
        .copied()
        .unwrap_or(LEVELS[0])
}

/// Locked achievements closest to completion, best first
pub fn current_goals(achievements: &[Achievement], limit: usize) -> Vec<&Achievement> {
    let mut locked: Vec<&Achievement> = achievements.iter().filter(|a| !a.unlocked).collect();
    locked.sort_by(|a, b| b.ratio().total_cmp(&a.ratio()));
    locked.truncate(limit);
    locked
}

/// Check the catalog for internal consistency
pub fn validate_catalog(catalog: &[AchievementDef]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut titles = std::collections::HashSet::new();

    for d in catalog {
        if d.title.is_empty() {
            errors.push("Achievement has empty title".to_string());
        }
        if !titles.insert(d.title) {
            errors.push(format!("Duplicate achievement title '{}'", d.title));
        }
        if d.target == 0 {
            errors.push(format!("Achievement '{}' has zero target", d.title));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;

    fn now() -> NaiveDateTime {
        parse_date("2024-01-01").unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn find<'a>(achievements: &'a [Achievement], title: &str) -> &'a Achievement {
        achievements.iter().find(|a| a.title == title).unwrap()
    }

    #[test]
    fn test_catalog_is_valid() {
        assert_eq!(ACHIEVEMENT_CATALOG.len(), 12);
        let errors = validate_catalog(&ACHIEVEMENT_CATALOG);
        assert!(errors.is_empty(), "catalog errors: {:?}", errors);
    }

    #[test]
    fn test_defaults_start_locked() {
        let achievements = default_achievements();
        assert!(achievements.iter().all(|a| !a.unlocked && a.progress == 0));
        assert_eq!(total_points(&achievements), 0);
    }

    #[test]
    fn test_century_club_unlocks_once_at_100() {
        let mut achievements = default_achievements();

        let stats = Statistics {
            total_doses: 99,
            ..Default::default()
        };
        let events = reconcile(&mut achievements, &stats, now());
        assert!(events.is_empty());
        let century = find(&achievements, "Century Club");
        assert!(!century.unlocked);
        assert_eq!(century.progress, 99);

        let stats = Statistics {
            total_doses: 100,
            ..Default::default()
        };
        let events = reconcile(&mut achievements, &stats, now());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Notification::AchievementUnlocked { title, points: 100, .. } if title == "Century Club"
        ));
        assert!(find(&achievements, "Century Club").unlocked);

        // No second emission
        let again = reconcile(&mut achievements, &stats, now());
        assert!(again.is_empty());
    }

    #[test]
    fn test_unlock_is_monotonic() {
        let mut achievements = default_achievements();
        let stats = Statistics {
            medicines_added: 1,
            ..Default::default()
        };
        reconcile(&mut achievements, &stats, now());
        assert!(find(&achievements, "First Step").unlocked);
        let progress_before = find(&achievements, "First Step").progress;

        // Medicine deleted: statistic drops back to zero
        reconcile(&mut achievements, &Statistics::default(), now());
        let first = find(&achievements, "First Step");
        assert!(first.unlocked);
        assert_eq!(first.progress, progress_before);
        assert_eq!(first.unlocked_at, Some(now()));
    }

    #[test]
    fn test_points_and_levels() {
        let mut achievements = default_achievements();
        let stats = Statistics {
            medicines_added: 5,
            emergency_contacts: 1,
            ..Default::default()
        };
        let events = reconcile(&mut achievements, &stats, now());
        assert_eq!(events.len(), 3);
        assert_eq!(total_points(&achievements), 10 + 50 + 20);
        assert_eq!(level_for(total_points(&achievements)).title, "Novice");

        assert_eq!(level_for(0).title, "Beginner");
        assert_eq!(level_for(149).level, 2);
        assert_eq!(level_for(150).level, 3);
        assert_eq!(level_for(10_000).title, "Legend");
    }

    #[test]
    fn test_current_goals_sorted_by_progress() {
        let mut achievements = default_achievements();
        let stats = Statistics {
            total_doses: 90,
            on_time_doses: 9,
            ..Default::default()
        };
        reconcile(&mut achievements, &stats, now());

        let goals = current_goals(&achievements, 2);
        assert_eq!(goals.len(), 2);
        // 90/100 and 9/10 tie at 0.9
        assert!(goals.iter().all(|g| (g.ratio() - 0.9).abs() < 1e-9));
    }
}
