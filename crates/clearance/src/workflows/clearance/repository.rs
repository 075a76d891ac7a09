use super::domain::{
    ApplicationId, ApplicationRecord, DepartmentId, DepartmentStatusRow, RegistrationNumber,
    ReapplicationHistoryEntry,
};

/// Storage abstraction for applications, their row-sets and reapplication history.
///
/// Every `insert_*`/`commit_*` call is one atomic unit: either all of its writes land
/// or none do. Serialisation across calls is the coordinator's job.
pub trait ClearanceRepository: Send + Sync {
    fn insert_submission(
        &self,
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
    ) -> Result<(), RepositoryError>;

    /// Remove a submission that failed verification before it was acknowledged.
    fn discard_submission(&self, id: &ApplicationId) -> Result<(), RepositoryError>;

    fn commit_decision(
        &self,
        record: ApplicationRecord,
        row: DepartmentStatusRow,
    ) -> Result<(), RepositoryError>;

    fn commit_reapplication(
        &self,
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
        history: Vec<ReapplicationHistoryEntry>,
    ) -> Result<(), RepositoryError>;

    fn update(&self, record: ApplicationRecord) -> Result<(), RepositoryError>;

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError>;

    fn find_by_registration(
        &self,
        registration_number: &RegistrationNumber,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError>;

    fn rows(&self, id: &ApplicationId) -> Result<Vec<DepartmentStatusRow>, RepositoryError>;

    fn department_rows(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentStatusRow>, RepositoryError>;

    fn history(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ReapplicationHistoryEntry>, RepositoryError>;

    /// Completed applications that have no certificate reference yet.
    fn awaiting_certificate(&self, limit: usize)
        -> Result<Vec<ApplicationRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
