use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    ApplicationId, ApplicationRecord, DepartmentId, DepartmentStatusRow, RegistrationNumber,
    ReapplicationHistoryEntry,
};
use super::repository::{ClearanceRepository, RepositoryError};

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<ApplicationId, ApplicationRecord>,
    rows: HashMap<ApplicationId, BTreeMap<DepartmentId, DepartmentStatusRow>>,
    history: HashMap<ApplicationId, Vec<ReapplicationHistoryEntry>>,
}

/// Process-local repository. One mutex over all tables makes each call atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClearanceRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryClearanceRepository {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

impl ClearanceRepository for InMemoryClearanceRepository {
    fn insert_submission(
        &self,
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if tables.records.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        let row_set = rows
            .into_iter()
            .map(|row| (row.department_id.clone(), row))
            .collect();
        tables.rows.insert(record.id.clone(), row_set);
        tables.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn discard_submission(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables.records.remove(id);
        tables.rows.remove(id);
        tables.history.remove(id);
        Ok(())
    }

    fn commit_decision(
        &self,
        record: ApplicationRecord,
        row: DepartmentStatusRow,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.records.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        let row_set = tables
            .rows
            .get_mut(&record.id)
            .ok_or(RepositoryError::NotFound)?;
        if !row_set.contains_key(&row.department_id) {
            return Err(RepositoryError::NotFound);
        }
        row_set.insert(row.department_id.clone(), row);
        tables.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn commit_reapplication(
        &self,
        record: ApplicationRecord,
        rows: Vec<DepartmentStatusRow>,
        history: Vec<ReapplicationHistoryEntry>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.records.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        let row_set = tables
            .rows
            .get_mut(&record.id)
            .ok_or(RepositoryError::NotFound)?;
        if rows.iter().any(|row| !row_set.contains_key(&row.department_id)) {
            return Err(RepositoryError::NotFound);
        }
        for row in rows {
            row_set.insert(row.department_id.clone(), row);
        }
        tables
            .history
            .entry(record.id.clone())
            .or_default()
            .extend(history);
        tables.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(&self, record: ApplicationRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if tables.records.contains_key(&record.id) {
            tables.records.insert(record.id.clone(), record);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        Ok(self.tables()?.records.get(id).cloned())
    }

    fn find_by_registration(
        &self,
        registration_number: &RegistrationNumber,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .records
            .values()
            .filter(|record| &record.registration_number == registration_number)
            .cloned()
            .collect())
    }

    fn rows(&self, id: &ApplicationId) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .rows
            .get(id)
            .map(|row_set| row_set.values().cloned().collect())
            .unwrap_or_default())
    }

    fn department_rows(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentStatusRow>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .rows
            .values()
            .filter_map(|row_set| row_set.get(department).cloned())
            .collect())
    }

    fn history(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ReapplicationHistoryEntry>, RepositoryError> {
        Ok(self
            .tables()?
            .history
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn awaiting_certificate(
        &self,
        limit: usize,
    ) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let tables = self.tables()?;
        let mut records: Vec<ApplicationRecord> = tables
            .records
            .values()
            .filter(|record| record.awaiting_certificate())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        records.truncate(limit);
        Ok(records)
    }
}
