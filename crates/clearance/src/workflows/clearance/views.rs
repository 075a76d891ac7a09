//! Read models derived from the repository on demand. Nothing here is stored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregator::Transition;
use super::domain::{
    AcademicPlacement, AggregateStatus, ApplicationId, ApplicationRecord, CertificateReference,
    DecisionState, DepartmentId, DepartmentStatusRow, RegistrationNumber, StudentProfile,
};
use super::reapplication::ReapplicationPolicy;
use super::registry::DepartmentRegistry;

/// Department row as shown to students and staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentStatusView {
    pub department_id: DepartmentId,
    pub department_name: String,
    #[serde(flatten)]
    pub state: DecisionState,
    pub cycle: u32,
    pub rejection_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_reply: Option<String>,
}

impl DepartmentStatusView {
    pub(crate) fn from_row(row: DepartmentStatusRow, registry: &DepartmentRegistry) -> Self {
        Self {
            department_name: registry.name_of(&row.department_id),
            department_id: row.department_id,
            state: row.state,
            cycle: row.cycle,
            rejection_count: row.rejection_count,
            student_reply: row.student_reply,
        }
    }
}

/// Per-application projection: every department row plus the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub registration_number: RegistrationNumber,
    pub student: StudentProfile,
    pub placement: AcademicPlacement,
    pub status: AggregateStatus,
    pub reapplication_count: u32,
    pub reapplications_remaining: u32,
    pub certificate_reference: Option<CertificateReference>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub departments: Vec<DepartmentStatusView>,
}

impl ApplicationStatusView {
    pub(crate) fn build(
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
        registry: &DepartmentRegistry,
        policy: &ReapplicationPolicy,
    ) -> Self {
        let remaining = record
            .reapplication_ceiling(policy)
            .saturating_sub(record.reapplication_count);

        let mut departments: Vec<_> = rows
            .into_iter()
            .map(|row| DepartmentStatusView::from_row(row, registry))
            .collect();
        departments.sort_by_key(|view| registry.display_order(&view.department_id));

        Self {
            application_id: record.id,
            registration_number: record.registration_number,
            student: record.student,
            placement: record.placement,
            status: record.status,
            reapplication_count: record.reapplication_count,
            reapplications_remaining: remaining,
            certificate_reference: record.certificate_reference,
            submitted_at: record.submitted_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
            departments,
        }
    }
}

/// One pending row in a department's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorklistEntry {
    pub application_id: ApplicationId,
    pub registration_number: RegistrationNumber,
    pub student_name: String,
    /// Pending rows on a rejected application wait for the next reapplication cycle.
    pub application_status: AggregateStatus,
    pub cycle: u32,
    pub is_reapplication: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_reply: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl WorklistEntry {
    pub(crate) fn from_parts(record: &ApplicationRecord, row: DepartmentStatusRow) -> Self {
        Self {
            application_id: record.id.clone(),
            registration_number: record.registration_number.clone(),
            student_name: record.student.name.clone(),
            application_status: record.status,
            cycle: row.cycle,
            is_reapplication: row.cycle > 0,
            student_reply: row.student_reply,
            submitted_at: record.submitted_at,
        }
    }
}

/// Reapplications first, then oldest submission first.
pub(crate) fn sort_worklist(entries: &mut [WorklistEntry]) {
    entries.sort_by(|a, b| {
        b.is_reapplication
            .cmp(&a.is_reapplication)
            .then(a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.application_id.cmp(&b.application_id))
    });
}

/// Counts for a department dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentSummary {
    pub department_id: DepartmentId,
    pub department_name: String,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub rejections_by_reason: BTreeMap<String, usize>,
}

impl DepartmentSummary {
    pub(crate) fn tally(
        department: &DepartmentId,
        registry: &DepartmentRegistry,
        rows: &[DepartmentStatusRow],
    ) -> Self {
        let mut summary = Self {
            department_id: department.clone(),
            department_name: registry.name_of(department),
            pending: 0,
            approved: 0,
            rejected: 0,
            rejections_by_reason: BTreeMap::new(),
        };
        for row in rows {
            match &row.state {
                DecisionState::Pending => summary.pending += 1,
                DecisionState::Approved { .. } => summary.approved += 1,
                DecisionState::Rejected { reason_code, .. } => {
                    summary.rejected += 1;
                    *summary
                        .rejections_by_reason
                        .entry(reason_code.clone())
                        .or_default() += 1;
                }
            }
        }
        summary
    }
}

/// Result of a recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedAggregate {
    pub application_id: ApplicationId,
    pub department: DepartmentStatusView,
    pub status: AggregateStatus,
    pub transition: Transition,
    /// True when this decision completed the application and queued finalization.
    pub finalization_requested: bool,
}
