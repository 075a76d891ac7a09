use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reapplication::ReapplicationPolicy;

/// Identifier wrapper for submitted applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable department identifier issued by the registry. Rows never reference display names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

impl DepartmentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Student registration number, the natural key of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationNumber(String);

impl RegistrationNumber {
    /// Registration numbers compare trimmed and upper-cased.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the staff member who recorded a decision, already authenticated upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

/// Opaque handle to an issued clearance certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateReference(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchoolId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub email: String,
    pub phone: String,
}

/// Student identity fields captured at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    #[serde(default)]
    pub parent_name: Option<String>,
    pub contact: ContactDetails,
}

/// Academic classification as references into the school/course/branch hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicPlacement {
    pub school: SchoolId,
    pub course: CourseId,
    pub branch: BranchId,
}

/// Inbound payload from the submission source. Fields arrive already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub registration_number: String,
    pub student: StudentProfile,
    pub placement: AcademicPlacement,
}

/// Derived overall state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    InProgress,
    Rejected,
    Completed,
}

impl AggregateStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AggregateStatus::InProgress => "in_progress",
            AggregateStatus::Rejected => "rejected",
            AggregateStatus::Completed => "completed",
        }
    }
}

/// Department verdict supplied by the decision source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Per-row decision state. Rejections always carry a reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecisionState {
    Pending,
    Approved {
        actor: ActorId,
        decided_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remark: Option<String>,
    },
    Rejected {
        actor: ActorId,
        decided_at: DateTime<Utc>,
        reason_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remark: Option<String>,
    },
}

impl DecisionState {
    pub const fn label(&self) -> &'static str {
        match self {
            DecisionState::Pending => "pending",
            DecisionState::Approved { .. } => "approved",
            DecisionState::Rejected { .. } => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DecisionState::Pending)
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, DecisionState::Approved { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, DecisionState::Rejected { .. })
    }

    pub fn actor(&self) -> Option<&ActorId> {
        match self {
            DecisionState::Pending => None,
            DecisionState::Approved { actor, .. } | DecisionState::Rejected { actor, .. } => {
                Some(actor)
            }
        }
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DecisionState::Pending => None,
            DecisionState::Approved { decided_at, .. }
            | DecisionState::Rejected { decided_at, .. } => Some(*decided_at),
        }
    }

    pub fn reason_code(&self) -> Option<&str> {
        match self {
            DecisionState::Rejected { reason_code, .. } => Some(reason_code),
            _ => None,
        }
    }

    pub fn remark(&self) -> Option<&str> {
        match self {
            DecisionState::Pending => None,
            DecisionState::Approved { remark, .. } | DecisionState::Rejected { remark, .. } => {
                remark.as_deref()
            }
        }
    }
}

/// One (application, department) approval row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentStatusRow {
    pub application_id: ApplicationId,
    pub department_id: DepartmentId,
    pub state: DecisionState,
    /// Reapplication cycle the current state belongs to; 0 for the original submission.
    pub cycle: u32,
    /// How many times this department has rejected the application.
    pub rejection_count: u32,
    pub student_reply: Option<String>,
}

/// Immutable audit record of a decision overwritten by a reapplication reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapplicationHistoryEntry {
    pub application_id: ApplicationId,
    pub cycle: u32,
    pub department_id: DepartmentId,
    pub prior_decision: String,
    pub prior_actor: Option<ActorId>,
    pub prior_decided_at: Option<DateTime<Utc>>,
    pub reason_code: Option<String>,
    pub remark: Option<String>,
    pub student_reply: String,
    pub archived_at: DateTime<Utc>,
}

/// Repository record for one student's clearance submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub registration_number: RegistrationNumber,
    pub student: StudentProfile,
    pub placement: AcademicPlacement,
    pub status: AggregateStatus,
    pub reapplication_count: u32,
    pub last_reapplied_at: Option<DateTime<Utc>>,
    pub max_reapplications_override: Option<u32>,
    pub certificate_reference: Option<CertificateReference>,
    /// Written in the same commit that completes the row-set; guards finalization.
    pub finalization_requested_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApplicationRecord {
    pub fn reapplication_ceiling(&self, policy: &ReapplicationPolicy) -> u32 {
        self.max_reapplications_override
            .unwrap_or(policy.max_reapplications)
    }

    pub fn reapplications_exhausted(&self, policy: &ReapplicationPolicy) -> bool {
        self.reapplication_count >= self.reapplication_ceiling(policy)
    }

    /// Completed applications and rejected ones out of reapplications are terminal.
    pub fn is_active(&self, policy: &ReapplicationPolicy) -> bool {
        match self.status {
            AggregateStatus::InProgress => true,
            AggregateStatus::Completed => false,
            AggregateStatus::Rejected => !self.reapplications_exhausted(policy),
        }
    }

    pub fn awaiting_certificate(&self) -> bool {
        self.status == AggregateStatus::Completed && self.certificate_reference.is_none()
    }
}
