//! CSV dose-history report.

use crate::{DoseEvent, Result};
use std::io::Write;
use std::path::Path;

#[derive(Debug, serde::Serialize)]
struct HistoryRow {
    id: String,
    medicine: String,
    dosage: String,
    date: String,
    time: String,
    status: String,
    taken_at: Option<String>,
    skipped_at: Option<String>,
    critical: bool,
}

impl From<&DoseEvent> for HistoryRow {
    fn from(event: &DoseEvent) -> Self {
        HistoryRow {
            id: event.id.to_string(),
            medicine: event.medicine_name.clone(),
            dosage: event.dosage.clone(),
            date: event.date.to_string(),
            time: event.time.to_string(),
            status: event.status.to_string(),
            taken_at: event.taken_at.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            skipped_at: event.skipped_at.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            critical: event.critical,
        }
    }
}

/// Write one row per event, ordered by schedule, with a header row
pub fn write_history<W: Write>(events: &[DoseEvent], out: W) -> Result<usize> {
    let mut ordered: Vec<&DoseEvent> = events.iter().collect();
    ordered.sort_by_key(|e| (e.scheduled_at(), e.medicine_name.clone()));

    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(out);
    for event in &ordered {
        writer.serialize(HistoryRow::from(*event))?;
    }
    writer.flush()?;

    Ok(ordered.len())
}

/// Write the history report to `path`, replacing any previous report
pub fn write_history_file(events: &[DoseEvent], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)?;
    let count = write_history(events, &file)?;
    file.sync_all()?;

    tracing::info!("Wrote {} dose events to {:?}", count, path);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;
    use crate::DoseStatus;
    use uuid::Uuid;

    fn event(date: &str, time: &str, status: DoseStatus) -> DoseEvent {
        let created = parse_date("2024-01-01").unwrap().and_hms_opt(0, 0, 0).unwrap();
        DoseEvent {
            id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            medicine_name: "Aspirin".into(),
            dosage: "100mg".into(),
            date: parse_date(date).unwrap(),
            time: time.parse().unwrap(),
            critical: false,
            status,
            taken_at: (status == DoseStatus::Taken)
                .then(|| parse_date(date).unwrap().and_hms_opt(8, 1, 0).unwrap()),
            skipped_at: None,
            created_at: created,
            updated_at: None,
        }
    }

    #[test]
    fn test_history_rows_in_schedule_order() {
        let events = vec![
            event("2024-01-02", "08:00", DoseStatus::Missed),
            event("2024-01-01", "20:00", DoseStatus::Pending),
            event("2024-01-01", "08:00", DoseStatus::Taken),
        ];

        let mut buf = Vec::new();
        assert_eq!(write_history(&events, &mut buf).unwrap(), 3);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,medicine,dosage,date,time,status,taken_at,skipped_at,critical"
        );
        assert!(lines[1].contains("2024-01-01,08:00,taken,2024-01-01T08:01:00,,false"));
        assert!(lines[2].contains("2024-01-01,20:00,pending"));
        assert!(lines[3].contains("2024-01-02,08:00,missed"));
    }

    #[test]
    fn test_history_file_parses_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("reports").join("history.csv");
        let events = vec![event("2024-01-01", "08:00", DoseStatus::Taken)];

        write_history_file(&events, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "Aspirin");
        assert_eq!(&rows[0][5], "taken");
    }
}
