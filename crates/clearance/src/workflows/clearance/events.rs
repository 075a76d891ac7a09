use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::domain::{
    ApplicationId, CertificateReference, Decision, DepartmentId, RegistrationNumber,
};

/// Domain events consumed by the external notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClearanceEvent {
    Submitted {
        application_id: ApplicationId,
        registration_number: RegistrationNumber,
        departments: Vec<DepartmentId>,
        at: DateTime<Utc>,
    },
    DepartmentDecided {
        application_id: ApplicationId,
        department: DepartmentId,
        decision: Decision,
        at: DateTime<Utc>,
    },
    Completed {
        application_id: ApplicationId,
        at: DateTime<Utc>,
    },
    Rejected {
        application_id: ApplicationId,
        department: DepartmentId,
        reason_code: String,
        at: DateTime<Utc>,
    },
    ReapplicationOpened {
        application_id: ApplicationId,
        cycle: u32,
        departments: Vec<DepartmentId>,
        at: DateTime<Utc>,
    },
    CertificateIssued {
        application_id: ApplicationId,
        certificate: CertificateReference,
        at: DateTime<Utc>,
    },
}

impl ClearanceEvent {
    pub fn application_id(&self) -> &ApplicationId {
        match self {
            ClearanceEvent::Submitted { application_id, .. }
            | ClearanceEvent::DepartmentDecided { application_id, .. }
            | ClearanceEvent::Completed { application_id, .. }
            | ClearanceEvent::Rejected { application_id, .. }
            | ClearanceEvent::ReapplicationOpened { application_id, .. }
            | ClearanceEvent::CertificateIssued { application_id, .. } => application_id,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ClearanceEvent::Submitted { .. } => "submitted",
            ClearanceEvent::DepartmentDecided { .. } => "department_decided",
            ClearanceEvent::Completed { .. } => "completed",
            ClearanceEvent::Rejected { .. } => "rejected",
            ClearanceEvent::ReapplicationOpened { .. } => "reapplication_opened",
            ClearanceEvent::CertificateIssued { .. } => "certificate_issued",
        }
    }
}

/// Outbound hook for domain events. Publishing happens after the state change commits.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ClearanceEvent) -> Result<(), EventError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event channel closed")]
    ChannelClosed,
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Places events on an unbounded channel drained by the dispatcher task.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::UnboundedSender<ClearanceEvent>,
}

impl ChannelEventPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClearanceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ClearanceEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::ChannelClosed)
    }
}

/// Keeps every published event in memory; used by the demo and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<ClearanceEvent>>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<ClearanceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, event: ClearanceEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError::Transport("recorder mutex poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Publish a batch, logging failures instead of surfacing them to the caller.
pub(crate) fn publish_all<E: EventPublisher + ?Sized>(publisher: &E, events: Vec<ClearanceEvent>) {
    for event in events {
        let name = event.name();
        let application_id = event.application_id().clone();
        if let Err(err) = publisher.publish(event) {
            tracing::warn!(%application_id, event = name, error = %err, "domain event dropped");
        }
    }
}
