//! Departments required to clear an application, plus the academic hierarchy that
//! submissions reference.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;

use serde::{Deserialize, Serialize};

use super::domain::{AcademicPlacement, BranchId, CourseId, DepartmentId, SchoolId};

/// A department that must sign off on every application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
    pub display_order: u16,
    pub active: bool,
}

impl Department {
    pub fn new(id: &str, name: &str, display_order: u16) -> Self {
        Self {
            id: DepartmentId::new(id),
            name: name.to_string(),
            display_order,
            active: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("department '{0}' is registered more than once")]
    DuplicateDepartment(DepartmentId),
    #[error("department id must not be blank")]
    BlankDepartmentId,
    #[error("malformed department entry '{0}' (expected id:Name)")]
    MalformedEntry(String),
    #[error("unable to read department csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct DepartmentCsvRow {
    id: String,
    name: String,
    display_order: u16,
    is_active: String,
}

/// Static, config-driven list of departments.
#[derive(Debug, Clone)]
pub struct DepartmentRegistry {
    departments: Vec<Department>,
}

impl DepartmentRegistry {
    pub fn new(mut departments: Vec<Department>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for department in &departments {
            if department.id.0.trim().is_empty() {
                return Err(RegistryError::BlankDepartmentId);
            }
            if !seen.insert(department.id.clone()) {
                return Err(RegistryError::DuplicateDepartment(department.id.clone()));
            }
        }
        departments.sort_by_key(|department| department.display_order);
        Ok(Self { departments })
    }

    /// Parse `library:Library,hostel:Hostel` style lists; order follows the input.
    pub fn from_pairs(pairs: &str) -> Result<Self, RegistryError> {
        let departments = pairs
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .enumerate()
            .map(|(index, entry)| {
                let display_order = u16::try_from(index + 1)
                    .map_err(|_| RegistryError::MalformedEntry(entry.to_string()))?;
                match entry.split_once(':') {
                    Some((id, name)) if !name.trim().is_empty() => {
                        Ok(Department::new(id.trim(), name.trim(), display_order))
                    }
                    _ => Err(RegistryError::MalformedEntry(entry.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(departments)
    }

    /// Load `id,name,display_order,is_active` rows.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, RegistryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut departments = Vec::new();
        for row in csv_reader.deserialize::<DepartmentCsvRow>() {
            let row = row?;
            departments.push(Department {
                id: DepartmentId::new(row.id),
                name: row.name,
                display_order: row.display_order,
                active: matches!(
                    row.is_active.to_ascii_lowercase().as_str(),
                    "true" | "t" | "1" | "yes"
                ),
            });
        }
        Self::new(departments)
    }

    /// Active departments in display order; every submission gets one row per entry.
    pub fn required(&self) -> impl Iterator<Item = &Department> {
        self.departments.iter().filter(|department| department.active)
    }

    pub fn required_ids(&self) -> Vec<DepartmentId> {
        self.required().map(|department| department.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.required().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &DepartmentId) -> Option<&Department> {
        self.departments
            .iter()
            .find(|department| &department.id == id)
    }

    /// Falls back to the raw id for departments retired since submission.
    pub fn name_of(&self, id: &DepartmentId) -> String {
        self.get(id)
            .map(|department| department.name.clone())
            .unwrap_or_else(|| id.0.clone())
    }

    pub fn display_order(&self, id: &DepartmentId) -> u16 {
        self.get(id)
            .map(|department| department.display_order)
            .unwrap_or(u16::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcademicReferenceError {
    #[error("unknown school '{0}'")]
    School(String),
    #[error("course '{course}' is not offered by school '{school}'")]
    Course { school: String, course: String },
    #[error("branch '{branch}' is not part of course '{course}'")]
    Branch { course: String, branch: String },
}

/// School -> course -> branch hierarchy keyed by stable ids.
#[derive(Debug, Clone, Default)]
pub struct AcademicCatalog {
    schools: BTreeMap<SchoolId, BTreeMap<CourseId, HashSet<BranchId>>>,
}

impl AcademicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, school: &str, course: &str, branch: &str) -> Self {
        self.schools
            .entry(SchoolId(school.to_string()))
            .or_default()
            .entry(CourseId(course.to_string()))
            .or_default()
            .insert(BranchId(branch.to_string()));
        self
    }

    pub fn validate(&self, placement: &AcademicPlacement) -> Result<(), AcademicReferenceError> {
        let courses = self
            .schools
            .get(&placement.school)
            .ok_or_else(|| AcademicReferenceError::School(placement.school.0.clone()))?;
        let branches =
            courses
                .get(&placement.course)
                .ok_or_else(|| AcademicReferenceError::Course {
                    school: placement.school.0.clone(),
                    course: placement.course.0.clone(),
                })?;
        if !branches.contains(&placement.branch) {
            return Err(AcademicReferenceError::Branch {
                course: placement.course.0.clone(),
                branch: placement.branch.0.clone(),
            });
        }
        Ok(())
    }
}
