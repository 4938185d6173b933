//! The course record and its validation rules.

use serde::{Deserialize, Serialize};

/// The fields a submission must fill in to be accepted.
pub const REQUIRED_FIELDS: [&str; 3] = ["code", "name", "instructor"];

/// One course in the catalog.
///
/// Everything is free-form text; only `code`, `name` and `instructor`
/// are required to be non-blank. `code` doubles as the lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// The course code, e.g. `CS101`. Lookup key.
    pub code: String,
    /// Human-readable course title.
    pub name: String,
    /// Who teaches it.
    pub instructor: String,
    /// Term the course runs in.
    #[serde(default)]
    pub semester: String,
    /// Meeting times.
    #[serde(default)]
    pub schedule: String,
    /// Where it meets.
    #[serde(default)]
    pub classroom: String,
    /// Free-form prerequisite text.
    #[serde(default)]
    pub prerequisites: String,
    /// How the course is graded.
    #[serde(default)]
    pub grading: String,
    /// Course description.
    #[serde(default)]
    pub description: String,
}

impl CourseRecord {
    /// The required fields this record leaves empty or blank, in
    /// declaration order.
    ///
    /// Whitespace-only values count as missing.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        // Order matches `REQUIRED_FIELDS`.
        let values = [&self.code, &self.name, &self.instructor];
        REQUIRED_FIELDS
            .iter()
            .zip(values)
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect()
    }

    /// Checks the required-field policy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = self.missing_required_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }
}

/// A submission left one or more required fields blank.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required fields: {}", .missing.join(", "))]
pub struct ValidationError {
    /// The blank required fields, in declaration order.
    pub missing: Vec<&'static str>,
}
