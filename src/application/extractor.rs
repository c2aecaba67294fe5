//! Turns record-store state into normalized text documents.
//!
//! Three independent modes: one summary per employee, one pattern document
//! per calendar month over a trailing window, and one pattern document per
//! advance status plus a common-reasons digest. A mode that finds no records
//! yields no documents. A malformed record or a failed per-employee lookup is
//! skipped and counted rather than aborting the mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};

use crate::domain::document::{Document, DocumentType};
use crate::domain::records::{Advance, Bill, Employee, OffDay, RecordFilter, RecordStore, RequestStatus};
use crate::error::RecordStoreError;

const RECENT_ITEMS: usize = 5;
const REASON_CHARS: usize = 50;
const TOP_REASONS: usize = 10;

/// Documents produced by one or more extraction modes.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub documents: Vec<Document>,
    /// Entities or records left out because they were malformed or could not be read.
    pub skipped: usize,
    /// Modes that failed as a whole (e.g. the store was unreachable).
    pub failed_modes: Vec<&'static str>,
}

impl ExtractionOutcome {
    fn merge(&mut self, other: ExtractionOutcome) {
        self.documents.extend(other.documents);
        self.skipped += other.skipped;
        self.failed_modes.extend(other.failed_modes);
    }
}

pub struct DocumentExtractor {
    store: Arc<dyn RecordStore>,
}

impl DocumentExtractor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Runs every mode. A failing mode is logged and recorded; the others still run.
    pub async fn extract_all(&self, entity_limit: Option<usize>, trailing_months: u32, now: DateTime<Utc>) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        let modes = [
            ("employee_summaries", self.employee_summaries(entity_limit, now).await),
            ("monthly_patterns", self.monthly_patterns(trailing_months, now).await),
            ("advance_patterns", self.advance_patterns(now).await),
        ];
        for (mode, result) in modes {
            match result {
                Ok(part) => {
                    debug!("Extraction mode {} produced {} documents ({} skipped)", mode, part.documents.len(), part.skipped);
                    outcome.merge(part);
                }
                Err(e) => {
                    error!("Extraction mode {} failed: {}", mode, e);
                    outcome.failed_modes.push(mode);
                }
            }
        }
        outcome
    }

    /// One `employee_summary` document per employee.
    pub async fn employee_summaries(&self, limit: Option<usize>, now: DateTime<Utc>) -> Result<ExtractionOutcome, RecordStoreError> {
        let employees = self.store.list_employees(limit).await?;
        let mut outcome = ExtractionOutcome::default();
        for employee in employees {
            match self.employee_summary(&employee, now).await {
                Ok(doc) => outcome.documents.push(doc),
                Err(e) => {
                    warn!("Skipping employee {}: {}", employee.id, e);
                    outcome.skipped += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn employee_summary(&self, employee: &Employee, now: DateTime<Utc>) -> Result<Document, RecordStoreError> {
        employee.validate()?;
        let filter = RecordFilter::for_employee(employee.id);
        let advances = self.store.advances(&filter).await?;
        let bills = self.store.bills(&filter).await?;
        let off_days = self.store.off_days(&filter).await?;
        for advance in &advances {
            advance.validate()?;
        }
        for bill in &bills {
            bill.validate()?;
        }

        let content = render_employee_summary(employee, &advances, &bills, &off_days);
        Ok(Document::created_at(DocumentType::EmployeeSummary, content, now)
            .with_meta("employee_id", employee.id)
            .with_meta("employee_name", employee.full_name())
            .with_meta("role", employee.role.as_str())
            .with_meta("total_advances", advances.len())
            .with_meta("total_bills", bills.len())
            .with_meta("total_off_days", off_days.len()))
    }

    /// One `financial_pattern` document per month with activity in the trailing
    /// window (`months` × 30 days), plus one `financial_trend` document.
    pub async fn monthly_patterns(&self, months: u32, now: DateTime<Utc>) -> Result<ExtractionOutcome, RecordStoreError> {
        let since = (now - Duration::days(i64::from(months) * 30)).naive_utc();
        let filter = RecordFilter::all().since(since);
        let advances = self.store.advances(&filter).await?;
        let bills = self.store.bills(&filter).await?;

        let mut outcome = ExtractionOutcome::default();
        let mut by_month: BTreeMap<String, MonthBucket> = BTreeMap::new();
        for advance in advances {
            if let Err(e) = advance.validate() {
                warn!("Skipping record: {}", e);
                outcome.skipped += 1;
                continue;
            }
            by_month
                .entry(advance.created_at.format("%Y-%m").to_string())
                .or_default()
                .advances
                .push(advance);
        }
        for bill in bills {
            if let Err(e) = bill.validate() {
                warn!("Skipping record: {}", e);
                outcome.skipped += 1;
                continue;
            }
            by_month.entry(bill.date.format("%Y-%m").to_string()).or_default().bills.push(bill);
        }

        for (month, bucket) in &by_month {
            let approved_amount = bucket.approved_amount();
            let requested = bucket.advance_amount();
            let bill_amount = bucket.bill_amount();
            let approval_rate = if requested > 0.0 { approved_amount / requested * 100.0 } else { 0.0 };
            let content = format!(
                "Financial Summary for {month}:\n\
                 - Total Advance Requests: {}\n\
                 - Total Advance Amount Requested: {}\n\
                 - Total Advance Amount Approved: {}\n\
                 - Approval Rate: {:.1}%\n\
                 - Total Bills: {}\n\
                 - Total Bill Amount: {}\n\
                 - Net Financial Impact: {}",
                bucket.advances.len(),
                money(requested),
                money(approved_amount),
                approval_rate,
                bucket.bills.len(),
                money(bill_amount),
                money(approved_amount + bill_amount),
            );
            outcome.documents.push(
                Document::created_at(DocumentType::FinancialPattern, content, now)
                    .with_meta("month", month.as_str())
                    .with_meta("date", format!("{}-01", month))
                    .with_meta("total_advances", bucket.advances.len())
                    .with_meta("total_bills", bucket.bills.len()),
            );
        }

        if !by_month.is_empty() {
            let n = by_month.len() as f64;
            let advance_count: usize = by_month.values().map(|b| b.advances.len()).sum();
            let advance_amount: f64 = by_month.values().map(MonthBucket::advance_amount).sum();
            let bill_count: usize = by_month.values().map(|b| b.bills.len()).sum();
            let bill_amount: f64 = by_month.values().map(MonthBucket::bill_amount).sum();
            let content = format!(
                "Financial Trends Analysis (Last {months} months):\n\
                 - Average Monthly Advances: {:.1}\n\
                 - Average Monthly Advance Amount: {}\n\
                 - Average Monthly Bills: {:.1}\n\
                 - Average Monthly Bill Amount: {}",
                advance_count as f64 / n,
                money(advance_amount / n),
                bill_count as f64 / n,
                money(bill_amount / n),
            );
            outcome.documents.push(
                Document::created_at(DocumentType::FinancialTrend, content, now)
                    .with_meta("period_months", i64::from(months)),
            );
        }
        Ok(outcome)
    }

    /// One `advance_pattern` document per status present, plus a digest of the
    /// most common reasons when any advance has one.
    pub async fn advance_patterns(&self, now: DateTime<Utc>) -> Result<ExtractionOutcome, RecordStoreError> {
        let advances = self.store.advances(&RecordFilter::all()).await?;
        let mut outcome = ExtractionOutcome::default();
        let mut valid = Vec::with_capacity(advances.len());
        for advance in advances {
            match advance.validate() {
                Ok(()) => valid.push(advance),
                Err(e) => {
                    warn!("Skipping record: {}", e);
                    outcome.skipped += 1;
                }
            }
        }
        if valid.is_empty() {
            return Ok(outcome);
        }

        let total = valid.len();
        for status in RequestStatus::ALL {
            let group: Vec<&Advance> = valid.iter().filter(|a| a.status == status).collect();
            if group.is_empty() {
                continue;
            }
            let amount: f64 = group.iter().map(|a| a.amount_for_advance).sum();
            let label = capitalize(status.as_str());
            let content = format!(
                "Advance Request Status Patterns: {label}\n\
                 - {label}: {} requests, Average: {}\n\
                 - Total Amount: {}\n\
                 - Share of All Requests: {:.1}%",
                group.len(),
                money(amount / group.len() as f64),
                money(amount),
                group.len() as f64 / total as f64 * 100.0,
            );
            outcome.documents.push(
                Document::created_at(DocumentType::AdvancePattern, content, now)
                    .with_meta("pattern_category", "status")
                    .with_meta("status", status.as_str())
                    .with_meta("count", group.len()),
            );
        }

        let mut by_reason: HashMap<String, (usize, f64)> = HashMap::new();
        for advance in &valid {
            let Some(reason) = advance.reason.as_deref().map(normalize_reason).filter(|r| !r.is_empty()) else {
                continue;
            };
            let slot = by_reason.entry(reason).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += advance.amount_for_advance;
        }
        if !by_reason.is_empty() {
            let mut reasons: Vec<(String, (usize, f64))> = by_reason.into_iter().collect();
            reasons.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.0.cmp(&b.0)));
            reasons.truncate(TOP_REASONS);
            let mut content = String::from("Common Advance Request Reasons:");
            for (reason, (count, amount)) in &reasons {
                content.push_str(&format!("\n- {}: {} requests, Average: {}", reason, count, money(amount / *count as f64)));
            }
            outcome.documents.push(
                Document::created_at(DocumentType::AdvancePattern, content, now).with_meta("pattern_category", "reasons"),
            );
        }
        Ok(outcome)
    }
}

#[derive(Default)]
struct MonthBucket {
    advances: Vec<Advance>,
    bills: Vec<Bill>,
}

impl MonthBucket {
    fn advance_amount(&self) -> f64 {
        self.advances.iter().map(|a| a.amount_for_advance).sum()
    }

    fn approved_amount(&self) -> f64 {
        self.advances
            .iter()
            .filter(|a| a.status == RequestStatus::Approved)
            .map(|a| a.amount_for_advance)
            .sum()
    }

    fn bill_amount(&self) -> f64 {
        self.bills.iter().map(|b| b.amount_billed).sum()
    }
}

fn render_employee_summary(employee: &Employee, advances: &[Advance], bills: &[Bill], off_days: &[OffDay]) -> String {
    let count = |status: RequestStatus| advances.iter().filter(|a| a.status == status).count();
    let mut out = format!(
        "Employee Profile: {}\n\
         Role: {}\n\
         Salary: {}\n\
         Employment Start Date: {}\n\
         Days Worked This Month: {}\n\
         Total Days Worked: {}\n\
         \n\
         Advance Requests Summary:\n\
         - Total Advances: {}\n\
         - Total Amount Requested: {}\n\
         - Pending: {}\n\
         - Approved: {}\n\
         - Denied: {}\n",
        employee.full_name(),
        employee.role.as_str(),
        money(employee.salary),
        employee.employment_start_date,
        employee.days_worked_this_month,
        employee.total_days_worked,
        advances.len(),
        money(advances.iter().map(|a| a.amount_for_advance).sum()),
        count(RequestStatus::Pending),
        count(RequestStatus::Approved),
        count(RequestStatus::Denied),
    );

    if !advances.is_empty() {
        out.push_str("\nRecent Advance Requests:\n");
        let mut recent: Vec<&Advance> = advances.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for advance in recent.into_iter().take(RECENT_ITEMS) {
            out.push_str(&format!(
                "- {}: {} ({})",
                advance.created_at.format("%Y-%m-%d"),
                money(advance.amount_for_advance),
                advance.status
            ));
            if let Some(reason) = advance.reason.as_deref().filter(|r| !r.is_empty()) {
                out.push_str(&format!(" - {}", truncate_chars(reason, REASON_CHARS)));
            }
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nBills Summary:\n- Total Bills: {}\n- Total Amount: {}\n",
        bills.len(),
        money(bills.iter().map(|b| b.amount_billed).sum())
    ));
    if !bills.is_empty() {
        out.push_str("\nRecent Bills:\n");
        let mut recent: Vec<&Bill> = bills.iter().collect();
        recent.sort_by(|a, b| b.date.cmp(&a.date));
        for bill in recent.into_iter().take(RECENT_ITEMS) {
            out.push_str(&format!("- {}: {}", bill.date.format("%Y-%m-%d"), money(bill.amount_billed)));
            if let Some(reason) = bill.reason.as_deref().filter(|r| !r.is_empty()) {
                out.push_str(&format!(" - {}", truncate_chars(reason, REASON_CHARS)));
            }
            out.push('\n');
        }
    }

    let off_count = |status: RequestStatus| off_days.iter().filter(|o| o.status == status).count();
    out.push_str(&format!(
        "\nOff Days Summary:\n- Total Requests: {}\n- Total Days: {}\n- Pending: {}\n- Approved: {}\n- Denied: {}",
        off_days.len(),
        off_days.iter().map(|o| o.day_count).sum::<u32>(),
        off_count(RequestStatus::Pending),
        off_count(RequestStatus::Approved),
        off_count(RequestStatus::Denied),
    ));
    out
}

/// `$1,234.56`
pub(crate) fn money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn normalize_reason(reason: &str) -> String {
    truncate_chars(&reason.trim().to_lowercase(), REASON_CHARS).trim_end().to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
