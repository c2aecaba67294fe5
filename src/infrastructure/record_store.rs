use std::fs;
use std::path::Path;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::domain::records::{Advance, Bill, Employee, OffDay, RecordFilter, RecordStore};
use crate::error::RecordStoreError;

/// Point-in-time export of the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub advances: Vec<Advance>,
    #[serde(default)]
    pub bills: Vec<Bill>,
    #[serde(default)]
    pub off_days: Vec<OffDay>,
}

/// `RecordStore` served from an in-memory snapshot, typically loaded from a JSON export.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRecordStore {
    snapshot: RecordSnapshot,
}

impl SnapshotRecordStore {
    pub fn new(mut snapshot: RecordSnapshot) -> Self {
        snapshot.employees.sort_by_key(|e| e.id);
        Self { snapshot }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RecordStoreError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| RecordStoreError::Unavailable(format!("failed to read {:?}: {}", path, e)))?;
        let snapshot: RecordSnapshot = serde_json::from_str(&raw)
            .map_err(|e| RecordStoreError::Unavailable(format!("failed to parse {:?}: {}", path, e)))?;
        info!(
            "Loaded record snapshot from {:?}: {} employees, {} advances, {} bills, {} off days",
            path,
            snapshot.employees.len(),
            snapshot.advances.len(),
            snapshot.bills.len(),
            snapshot.off_days.len()
        );
        Ok(Self::new(snapshot))
    }
}

#[async_trait]
impl RecordStore for SnapshotRecordStore {
    async fn list_employees(&self, limit: Option<usize>) -> Result<Vec<Employee>, RecordStoreError> {
        let limit = limit.unwrap_or(usize::MAX);
        Ok(self.snapshot.employees.iter().take(limit).cloned().collect())
    }

    async fn find_employee_by_id(&self, id: i64) -> Result<Option<Employee>, RecordStoreError> {
        Ok(self.snapshot.employees.iter().find(|e| e.id == id).cloned())
    }

    async fn find_employee_by_name(&self, name: &str) -> Result<Option<Employee>, RecordStoreError> {
        Ok(self.snapshot.employees.iter().find(|e| e.matches_name(name)).cloned())
    }

    async fn advances(&self, filter: &RecordFilter) -> Result<Vec<Advance>, RecordStoreError> {
        Ok(self
            .snapshot
            .advances
            .iter()
            .filter(|a| filter.matches(a.employee_id, a.created_at))
            .cloned()
            .collect())
    }

    async fn bills(&self, filter: &RecordFilter) -> Result<Vec<Bill>, RecordStoreError> {
        Ok(self
            .snapshot
            .bills
            .iter()
            .filter(|b| filter.matches(b.billed_employee_id, b.date))
            .cloned()
            .collect())
    }

    async fn off_days(&self, filter: &RecordFilter) -> Result<Vec<OffDay>, RecordStoreError> {
        Ok(self
            .snapshot
            .off_days
            .iter()
            .filter(|o| filter.matches(o.employee_id, o.date.and_time(chrono::NaiveTime::MIN)))
            .cloned()
            .collect())
    }
}
