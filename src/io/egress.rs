//! Billing egress - appends billing events to a file
//!
//! Events are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::BillingEvent;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for billing events
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append one billing event; returns false if it could not be written
    pub fn write_event(&self, event: &BillingEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(plate = %event.license_plate, error = %e, "billing_encode_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(plate = %event.license_plate, error = %e, "billing_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }

    /// Write several events, returning how many succeeded
    pub fn write_events(&self, events: &[BillingEvent]) -> usize {
        events.iter().filter(|event| self.write_event(event)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BillingAction, EventKind, VehicleStatus};
    use std::fs;
    use tempfile::tempdir;

    fn billing(plate: &str, cost: i64) -> BillingEvent {
        BillingEvent {
            timestamp: "2025-05-01 08:25:00".to_string(),
            timestamp_unix: 1_746_087_900,
            license_plate: plate.into(),
            location: "A1".into(),
            status: VehicleStatus::Exiting,
            action: BillingAction::VehicleExiting,
            parked_duration_minutes: 25.0,
            parked_blocks: 3,
            total_cost: cost,
            event_type: EventKind::VehicleEvent,
        }
    }

    #[test]
    fn test_write_event() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("billing.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        assert!(egress.write_event(&billing("29A-12345", 30_000)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["license_plate"], "29A-12345");
        assert_eq!(parsed["action"], "vehicle_exiting");
        assert_eq!(parsed["total_cost"], 30_000);
    }

    #[test]
    fn test_write_events_batch() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("billing.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        let events: Vec<_> = (0..5).map(|i| billing("29A-12345", i * 10_000)).collect();
        assert_eq!(egress.write_events(&events), 5);

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 5);
    }

    #[test]
    fn test_creates_parent_directories_and_appends() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("billing.jsonl");
        let egress = Egress::new(nested.to_str().unwrap());

        assert!(egress.write_event(&billing("29A-12345", 10_000)));
        assert!(egress.write_event(&billing("30B-12345", 20_000)));

        let content = fs::read_to_string(&nested).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("30B-12345"));
    }
}
