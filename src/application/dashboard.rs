use crate::domain::models::{Record, RecordStatus};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmployeeTotal {
    pub employee_name: String,
    pub approved_minutes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub total_records: usize,
    pub pending_count: usize,
    pub approved_count: usize,
    pub rejected_count: usize,
    pub approved_minutes: u64,
    pub pending_minutes: u64,
    /// Ordered by approved minutes, largest first.
    pub approved_by_employee: Vec<EmployeeTotal>,
}

pub fn summarize(records: &[Record]) -> DashboardSummary {
    let mut summary = DashboardSummary {
        total_records: records.len(),
        ..DashboardSummary::default()
    };
    let mut per_employee: BTreeMap<&str, u64> = BTreeMap::new();

    for record in records {
        let minutes = u64::from(record.duration_minutes);
        match record.status {
            RecordStatus::Pending => {
                summary.pending_count += 1;
                summary.pending_minutes += minutes;
            }
            RecordStatus::Approved => {
                summary.approved_count += 1;
                summary.approved_minutes += minutes;
                *per_employee.entry(record.employee_name.as_str()).or_default() += minutes;
            }
            RecordStatus::Rejected => summary.rejected_count += 1,
        }
    }

    let mut totals = per_employee
        .into_iter()
        .map(|(employee_name, approved_minutes)| EmployeeTotal {
            employee_name: employee_name.to_string(),
            approved_minutes,
        })
        .collect::<Vec<_>>();
    totals.sort_by(|left, right| right.approved_minutes.cmp(&left.approved_minutes));
    summary.approved_by_employee = totals;
    summary
}
