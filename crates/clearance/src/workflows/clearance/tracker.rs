use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ActorId, ApplicationId, Decision, DecisionState, DepartmentId, DepartmentStatusRow,
    ReapplicationHistoryEntry,
};
use super::errors::ClearanceError;

/// Decision payload from a department, with the actor already authorized upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub department: DepartmentId,
    pub decision: Decision,
    pub actor: ActorId,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl DecisionInput {
    pub fn approve(department: &str, actor: &str) -> Self {
        Self {
            department: DepartmentId::new(department),
            decision: Decision::Approve,
            actor: ActorId(actor.to_string()),
            reason_code: None,
            remark: None,
        }
    }

    pub fn reject(department: &str, actor: &str, reason_code: &str, remark: &str) -> Self {
        Self {
            department: DepartmentId::new(department),
            decision: Decision::Reject,
            actor: ActorId(actor.to_string()),
            reason_code: Some(reason_code.to_string()),
            remark: Some(remark.to_string()),
        }
    }
}

/// Owns the shape of the per-department row-set; all checks here are pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepartmentStatusTracker;

impl DepartmentStatusTracker {
    pub fn initial_rows(
        &self,
        application_id: &ApplicationId,
        departments: &[DepartmentId],
    ) -> Vec<DepartmentStatusRow> {
        departments
            .iter()
            .map(|department| DepartmentStatusRow {
                application_id: application_id.clone(),
                department_id: department.clone(),
                state: DecisionState::Pending,
                cycle: 0,
                rejection_count: 0,
                student_reply: None,
            })
            .collect()
    }

    /// Exactly one row per expected department, nothing extra.
    pub fn verify_complete(
        &self,
        rows: &[DepartmentStatusRow],
        expected: &[DepartmentId],
    ) -> Result<(), ClearanceError> {
        let present: HashSet<&DepartmentId> = rows.iter().map(|row| &row.department_id).collect();
        let complete = rows.len() == expected.len()
            && present.len() == rows.len()
            && expected.iter().all(|department| present.contains(department));

        if complete {
            Ok(())
        } else {
            Err(ClearanceError::IncompleteInitialization {
                expected: expected.len(),
                found: present.len(),
            })
        }
    }

    pub fn validate_input(&self, input: &DecisionInput) -> Result<(), ClearanceError> {
        let has_reason = input
            .reason_code
            .as_deref()
            .is_some_and(|code| !code.trim().is_empty());
        if input.decision == Decision::Reject && !has_reason {
            return Err(ClearanceError::MissingRejectionReason);
        }
        Ok(())
    }

    /// Index of the targeted row, provided it is still pending.
    pub fn locate_pending(
        &self,
        rows: &[DepartmentStatusRow],
        department: &DepartmentId,
    ) -> Result<usize, ClearanceError> {
        let index = rows
            .iter()
            .position(|row| &row.department_id == department)
            .ok_or_else(|| ClearanceError::UnknownDepartment(department.clone()))?;

        let state = &rows[index].state;
        if !state.is_pending() {
            return Err(ClearanceError::AlreadyDecided {
                department: department.clone(),
                state: state.label(),
            });
        }
        Ok(index)
    }

    pub fn apply(&self, row: &mut DepartmentStatusRow, input: &DecisionInput, now: DateTime<Utc>) {
        let remark = input
            .remark
            .as_ref()
            .map(|remark| remark.trim().to_string())
            .filter(|remark| !remark.is_empty());

        row.state = match input.decision {
            Decision::Approve => DecisionState::Approved {
                actor: input.actor.clone(),
                decided_at: now,
                remark,
            },
            Decision::Reject => {
                row.rejection_count += 1;
                DecisionState::Rejected {
                    actor: input.actor.clone(),
                    decided_at: now,
                    reason_code: input
                        .reason_code
                        .as_deref()
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                    remark,
                }
            }
        };
    }

    /// Archive a rejected row and put it back to pending for `cycle`.
    pub fn reset_for_reapplication(
        &self,
        row: &mut DepartmentStatusRow,
        reply: &str,
        cycle: u32,
        now: DateTime<Utc>,
    ) -> Option<ReapplicationHistoryEntry> {
        if !row.state.is_rejected() {
            return None;
        }

        let prior = std::mem::replace(&mut row.state, DecisionState::Pending);
        row.cycle = cycle;
        row.student_reply = Some(reply.to_string());

        Some(ReapplicationHistoryEntry {
            application_id: row.application_id.clone(),
            cycle,
            department_id: row.department_id.clone(),
            prior_decision: prior.label().to_string(),
            prior_actor: prior.actor().cloned(),
            prior_decided_at: prior.decided_at(),
            reason_code: prior.reason_code().map(str::to_string),
            remark: prior.remark().map(str::to_string),
            student_reply: reply.to_string(),
            archived_at: now,
        })
    }
}
