//! Read-only view of the salary-management record store.
//!
//! The pipeline never writes records; it consumes them through the fixed,
//! parameterized queries of [`RecordStore`].

use std::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::RecordStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

/// Lifecycle status shared by advances and off-day requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 3] = [RequestStatus::Pending, RequestStatus::Approved, RequestStatus::Denied];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub salary: f64,
    pub employment_start_date: NaiveDate,
    #[serde(default)]
    pub days_worked_this_month: u32,
    #[serde(default)]
    pub total_days_worked: u32,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Case-insensitive substring match on first, last or full name.
    pub fn matches_name(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.first_name.to_lowercase().contains(&needle)
            || self.last_name.to_lowercase().contains(&needle)
            || self.full_name().to_lowercase().contains(&needle)
    }

    pub fn validate(&self) -> Result<(), RecordStoreError> {
        check_amount("employee", self.id, "salary", self.salary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advance {
    pub id: i64,
    pub employee_id: i64,
    pub amount_for_advance: f64,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
}

impl Advance {
    pub fn validate(&self) -> Result<(), RecordStoreError> {
        check_amount("advance", self.id, "amount_for_advance", self.amount_for_advance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub billed_employee_id: i64,
    pub amount_billed: f64,
    pub date: NaiveDateTime,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Bill {
    pub fn validate(&self) -> Result<(), RecordStoreError> {
        check_amount("bill", self.id, "amount_billed", self.amount_billed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffDay {
    pub id: i64,
    pub employee_id: i64,
    pub date: NaiveDate,
    #[serde(default = "default_day_count")]
    pub day_count: u32,
    pub status: RequestStatus,
}

fn default_day_count() -> u32 {
    1
}

fn check_amount(kind: &'static str, id: i64, field: &str, value: f64) -> Result<(), RecordStoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(RecordStoreError::Malformed {
            kind,
            id,
            reason: format!("{} must be a non-negative finite number, got {}", field, value),
        });
    }
    Ok(())
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Timestamps match from the first instant of `start` through the last of `end`.
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start.and_time(NaiveTime::MIN) && self.contains_date(at.date())
    }
}

/// The only query shape the pipeline issues for child records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub employee_id: Option<i64>,
    pub range: Option<DateRange>,
    /// Lower bound on the record timestamp, used by trailing-window extraction.
    pub since: Option<NaiveDateTime>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_employee(employee_id: i64) -> Self {
        Self {
            employee_id: Some(employee_id),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: Option<DateRange>) -> Self {
        self.range = range;
        self
    }

    pub fn since(mut self, at: NaiveDateTime) -> Self {
        self.since = Some(at);
        self
    }

    pub fn matches(&self, employee_id: i64, at: NaiveDateTime) -> bool {
        self.employee_id.map_or(true, |id| id == employee_id)
            && self.range.map_or(true, |r| r.contains(at))
            && self.since.map_or(true, |s| at >= s)
    }
}

/// Consumed record-store interface: parameterized reads, no writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Employees in id order, at most `limit` when given.
    async fn list_employees(&self, limit: Option<usize>) -> Result<Vec<Employee>, RecordStoreError>;

    async fn find_employee_by_id(&self, id: i64) -> Result<Option<Employee>, RecordStoreError>;

    /// First employee (by id) whose first, last or full name contains `name`, ignoring case.
    async fn find_employee_by_name(&self, name: &str) -> Result<Option<Employee>, RecordStoreError>;

    async fn advances(&self, filter: &RecordFilter) -> Result<Vec<Advance>, RecordStoreError>;

    async fn bills(&self, filter: &RecordFilter) -> Result<Vec<Bill>, RecordStoreError>;

    async fn off_days(&self, filter: &RecordFilter) -> Result<Vec<OffDay>, RecordStoreError>;
}
