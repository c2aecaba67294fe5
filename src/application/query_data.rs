//! Fixed, parameterized reads that feed prompt data.
//!
//! Nothing here is driven by model output: every query shape is one of the
//! methods below. Filters that match nothing produce empty datasets.

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::debug;
use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::records::{DateRange, Employee, RecordFilter, RecordStore, RequestStatus};
use crate::error::RecordStoreError;

/// How a caller identifies an employee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmployeeRef {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeInfo {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub salary: f64,
}

impl EmployeeInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl From<&Employee> for EmployeeInfo {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id,
            first_name: e.first_name.clone(),
            last_name: e.last_name.clone(),
            role: e.role.as_str().to_string(),
            salary: e.salary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvanceRow {
    pub id: i64,
    pub amount: f64,
    pub date: NaiveDateTime,
    pub status: RequestStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillRow {
    pub id: i64,
    pub amount: f64,
    pub date: NaiveDateTime,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmployeeStatistics {
    pub total_advances: usize,
    pub total_advance_amount: f64,
    pub pending_advances: usize,
    pub approved_advances: usize,
    pub total_bills: usize,
    pub total_bill_amount: f64,
    pub total_off_days: u32,
}

/// One employee with their child records. `Default` is the empty dataset
/// returned for an unknown employee.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmployeeDataset {
    pub employee: Option<EmployeeInfo>,
    pub advances: Vec<AdvanceRow>,
    pub bills: Vec<BillRow>,
    pub statistics: EmployeeStatistics,
}

impl EmployeeDataset {
    pub fn is_empty(&self) -> bool {
        self.employee.is_none()
    }

    /// JSON for prompt injection; the empty dataset renders as `{}`.
    pub fn to_value(&self) -> Value {
        if self.is_empty() {
            return json!({});
        }
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub denied: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdvanceTotals {
    pub total_count: usize,
    pub total_requested: f64,
    pub total_approved: f64,
    pub pending_count: usize,
    pub by_status: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BillTotals {
    pub total_count: usize,
    pub total_amount: f64,
}

/// Aggregate advances and bills, optionally scoped to a range and an employee.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinancialDataset {
    pub advances: AdvanceTotals,
    pub bills: BillTotals,
    pub date_range: Option<DateRange>,
    pub employee_id: Option<i64>,
}

impl FinancialDataset {
    pub fn is_empty(&self) -> bool {
        self.advances.total_count == 0 && self.bills.total_count == 0
    }
}

pub struct QueryDataFetcher {
    store: Arc<dyn RecordStore>,
}

impl QueryDataFetcher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn employee_data(&self, who: &EmployeeRef, range: Option<DateRange>) -> Result<EmployeeDataset, RecordStoreError> {
        let employee = match who {
            EmployeeRef::Id(id) => self.store.find_employee_by_id(*id).await?,
            EmployeeRef::Name(name) if name.trim().is_empty() => None,
            EmployeeRef::Name(name) => self.store.find_employee_by_name(name.trim()).await?,
        };
        let Some(employee) = employee else {
            debug!("No employee matches {:?}", who);
            return Ok(EmployeeDataset::default());
        };

        let filter = RecordFilter::for_employee(employee.id).with_range(range);
        let advances = self.store.advances(&filter).await?;
        let bills = self.store.bills(&filter).await?;
        let off_days = self.store.off_days(&filter).await?;

        let count_status = |status: RequestStatus| advances.iter().filter(|a| a.status == status).count();
        let statistics = EmployeeStatistics {
            total_advances: advances.len(),
            total_advance_amount: advances.iter().map(|a| a.amount_for_advance).sum(),
            pending_advances: count_status(RequestStatus::Pending),
            approved_advances: count_status(RequestStatus::Approved),
            total_bills: bills.len(),
            total_bill_amount: bills.iter().map(|b| b.amount_billed).sum(),
            total_off_days: off_days.iter().map(|o| o.day_count).sum(),
        };

        Ok(EmployeeDataset {
            employee: Some(EmployeeInfo::from(&employee)),
            advances: advances
                .into_iter()
                .map(|a| AdvanceRow {
                    id: a.id,
                    amount: a.amount_for_advance,
                    date: a.created_at,
                    status: a.status,
                    reason: a.reason,
                })
                .collect(),
            bills: bills
                .into_iter()
                .map(|b| BillRow {
                    id: b.id,
                    amount: b.amount_billed,
                    date: b.date,
                    reason: b.reason,
                })
                .collect(),
            statistics,
        })
    }

    pub async fn financial_data(&self, range: Option<DateRange>, employee_id: Option<i64>) -> Result<FinancialDataset, RecordStoreError> {
        let filter = RecordFilter {
            employee_id,
            range,
            since: None,
        };
        let advances = self.store.advances(&filter).await?;
        let bills = self.store.bills(&filter).await?;

        let mut by_status = StatusCounts::default();
        let mut total_approved = 0.0;
        for advance in &advances {
            match advance.status {
                RequestStatus::Pending => by_status.pending += 1,
                RequestStatus::Approved => {
                    by_status.approved += 1;
                    total_approved += advance.amount_for_advance;
                }
                RequestStatus::Denied => by_status.denied += 1,
            }
        }

        Ok(FinancialDataset {
            advances: AdvanceTotals {
                total_count: advances.len(),
                total_requested: advances.iter().map(|a| a.amount_for_advance).sum(),
                total_approved,
                pending_count: by_status.pending,
                by_status,
            },
            bills: BillTotals {
                total_count: bills.len(),
                total_amount: bills.iter().map(|b| b.amount_billed).sum(),
            },
            date_range: range,
            employee_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{Advance, Bill, MockRecordStore, Role};
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn grace() -> Employee {
        Employee {
            id: 7,
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            role: Role::Manager,
            salary: 5200.0,
            employment_start_date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            days_worked_this_month: 0,
            total_days_worked: 0,
        }
    }

    fn advance(id: i64, amount: f64, status: RequestStatus) -> Advance {
        Advance {
            id,
            employee_id: 7,
            amount_for_advance: amount,
            reason: Some("Rent".into()),
            status,
            created_at: at(2024, 5, 2),
        }
    }

    #[tokio::test]
    async fn test_unknown_employee_yields_empty_dataset() {
        let mut store = MockRecordStore::new();
        store.expect_find_employee_by_id().returning(|_| Ok(None));
        let fetcher = QueryDataFetcher::new(Arc::new(store));

        let data = fetcher.employee_data(&EmployeeRef::Id(404), None).await.unwrap();
        assert!(data.is_empty());
        assert_eq!(data.to_value(), json!({}));
    }

    #[tokio::test]
    async fn test_blank_name_never_hits_the_store() {
        let fetcher = QueryDataFetcher::new(Arc::new(MockRecordStore::new()));
        let data = fetcher.employee_data(&EmployeeRef::Name("  ".into()), None).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_employee_dataset_statistics() {
        let mut store = MockRecordStore::new();
        store.expect_find_employee_by_name().returning(|_| Ok(Some(grace())));
        store.expect_advances().returning(|f| {
            assert_eq!(f.employee_id, Some(7));
            Ok(vec![
                advance(1, 100.0, RequestStatus::Pending),
                advance(2, 250.0, RequestStatus::Approved),
            ])
        });
        store.expect_bills().returning(|_| {
            Ok(vec![Bill {
                id: 3,
                billed_employee_id: 7,
                amount_billed: 40.5,
                date: at(2024, 5, 3),
                reason: None,
            }])
        });
        store.expect_off_days().returning(|_| Ok(vec![]));
        let fetcher = QueryDataFetcher::new(Arc::new(store));

        let data = fetcher.employee_data(&EmployeeRef::Name("hopper".into()), None).await.unwrap();
        let value = data.to_value();
        assert_eq!(value["employee"]["role"], "manager");
        assert_eq!(value["advances"][0]["status"], "pending");
        assert_eq!(value["statistics"]["total_advance_amount"], 350.0);
        assert_eq!(value["statistics"]["pending_advances"], 1);
        assert_eq!(value["statistics"]["approved_advances"], 1);
        assert_eq!(value["statistics"]["total_bill_amount"], 40.5);
    }

    #[tokio::test]
    async fn test_financial_data_with_no_matches_is_zeroed() {
        let mut store = MockRecordStore::new();
        store.expect_advances().returning(|_| Ok(vec![]));
        store.expect_bills().returning(|_| Ok(vec![]));
        let fetcher = QueryDataFetcher::new(Arc::new(store));

        let range = DateRange::new(NaiveDate::from_ymd_opt(1999, 1, 1).unwrap(), NaiveDate::from_ymd_opt(1999, 1, 31).unwrap());
        let data = fetcher.financial_data(Some(range), Some(1)).await.unwrap();
        assert!(data.is_empty());
        assert_eq!(data.advances.total_requested, 0.0);
        assert_eq!(data.date_range, Some(range));
    }

    #[tokio::test]
    async fn test_financial_data_totals_by_status() {
        let mut store = MockRecordStore::new();
        store.expect_advances().returning(|_| {
            Ok(vec![
                advance(1, 100.0, RequestStatus::Pending),
                advance(2, 250.0, RequestStatus::Approved),
                advance(3, 75.0, RequestStatus::Denied),
            ])
        });
        store.expect_bills().returning(|_| Ok(vec![]));
        let fetcher = QueryDataFetcher::new(Arc::new(store));

        let data = fetcher.financial_data(None, None).await.unwrap();
        assert_eq!(data.advances.total_count, 3);
        assert_eq!(data.advances.total_requested, 425.0);
        assert_eq!(data.advances.total_approved, 250.0);
        assert_eq!(data.advances.pending_count, 1);
        assert_eq!(data.advances.by_status.denied, 1);
    }
}
