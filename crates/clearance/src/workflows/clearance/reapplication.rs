use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::aggregate;
use super::domain::{
    AcademicPlacement, AggregateStatus, ApplicationRecord, ContactDetails, DepartmentId,
    DepartmentStatusRow, ReapplicationHistoryEntry,
};
use super::errors::ClearanceError;
use super::registry::AcademicCatalog;
use super::tracker::DepartmentStatusTracker;

/// Ceiling and pacing rules, passed in explicitly on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapplicationPolicy {
    pub max_reapplications: u32,
    /// Times one department's rejections may be answered with a reapplication.
    pub max_per_department: u32,
    pub cooldown: Option<Duration>,
}

impl Default for ReapplicationPolicy {
    fn default() -> Self {
        Self {
            max_reapplications: 5,
            max_per_department: 5,
            cooldown: None,
        }
    }
}

/// Fields a student may correct while responding to a rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAmendment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub contact: Option<ContactDetails>,
    #[serde(default)]
    pub placement: Option<AcademicPlacement>,
}

impl ProfileAmendment {
    fn apply(self, record: &mut ApplicationRecord) {
        if let Some(name) = self.name {
            record.student.name = name;
        }
        if let Some(parent_name) = self.parent_name {
            record.student.parent_name = Some(parent_name);
        }
        if let Some(contact) = self.contact {
            record.student.contact = contact;
        }
        if let Some(placement) = self.placement {
            record.placement = placement;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapplicationRequest {
    pub reply_message: String,
    #[serde(default)]
    pub amendment: Option<ProfileAmendment>,
}

impl ReapplicationRequest {
    pub fn reply(message: &str) -> Self {
        Self {
            reply_message: message.to_string(),
            amendment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReapplicationOutcome {
    pub cycle: u32,
    pub reset: Vec<DepartmentId>,
    pub history: Vec<ReapplicationHistoryEntry>,
}

/// Governs re-submission after a rejection. Mutates the in-memory record and rows;
/// the caller commits them as one unit.
#[derive(Debug, Clone, Default)]
pub struct ReapplicationController {
    tracker: DepartmentStatusTracker,
}

impl ReapplicationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-open every rejected row. Approved rows stay closed.
    pub fn open(
        &self,
        record: &mut ApplicationRecord,
        rows: &mut [DepartmentStatusRow],
        request: ReapplicationRequest,
        policy: &ReapplicationPolicy,
        catalog: Option<&AcademicCatalog>,
        now: DateTime<Utc>,
    ) -> Result<ReapplicationOutcome, ClearanceError> {
        if record.status != AggregateStatus::Rejected {
            return Err(ClearanceError::ApplicationNotRejected(record.status));
        }

        let reply = request.reply_message.trim().to_string();
        if reply.is_empty() {
            return Err(ClearanceError::MissingReplyMessage);
        }

        if record.reapplications_exhausted(policy) {
            return Err(ClearanceError::ReapplicationLimitExceeded {
                limit: record.reapplication_ceiling(policy),
            });
        }

        if let (Some(cooldown), Some(last)) = (policy.cooldown, record.last_reapplied_at) {
            let retry_after = last + cooldown;
            if now < retry_after {
                return Err(ClearanceError::ReapplicationCooldown { retry_after });
            }
        }

        // `rejection_count` already includes the rejection being answered.
        let department_exhausted = rows
            .iter()
            .any(|row| row.state.is_rejected() && row.rejection_count > policy.max_per_department);
        if department_exhausted {
            return Err(ClearanceError::ReapplicationLimitExceeded {
                limit: policy.max_per_department,
            });
        }

        if let Some(amendment) = request.amendment {
            if let (Some(catalog), Some(placement)) = (catalog, amendment.placement.as_ref()) {
                catalog.validate(placement)?;
            }
            amendment.apply(record);
        }

        let cycle = record.reapplication_count + 1;
        let mut outcome = ReapplicationOutcome {
            cycle,
            reset: Vec::new(),
            history: Vec::new(),
        };

        for row in rows.iter_mut() {
            if let Some(entry) = self
                .tracker
                .reset_for_reapplication(row, &reply, cycle, now)
            {
                outcome.reset.push(row.department_id.clone());
                outcome.history.push(entry);
            }
        }

        record.reapplication_count = cycle;
        record.last_reapplied_at = Some(now);
        record.status = aggregate(rows);
        record.updated_at = now;

        Ok(outcome)
    }
}
