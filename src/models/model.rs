use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LabError;

const MAX_NAME_LEN: usize = 255;
const PROBLEM_TYPES: &[&str] = &["LP", "MIP", "NLP", "QP", "MINLP"];
const FILE_TYPES: &[&str] = &["dat", "excel_import"];

/// An authored AMPL model (`.mod` text).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmplModel {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub model_content: String,
    pub problem_type: Option<String>,
    pub tags: Vec<String>,
    pub is_template: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub description: Option<String>,
    pub model_content: String,
    pub problem_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_template: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub model_content: Option<String>,
    pub problem_type: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// An AMPL data (`.dat`) file attached to a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataFile {
    pub id: i64,
    pub model_id: i64,
    pub name: String,
    pub file_content: String,
    pub file_type: String,
    pub source_excel_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataFile {
    pub name: String,
    pub file_content: String,
    #[serde(default = "default_file_type")]
    pub file_type: String,
}

fn default_file_type() -> String {
    "dat".to_string()
}

impl AmplModel {
    /// Download name for the `.mod` export; spaces become underscores.
    pub fn export_filename(&self) -> String {
        format!("{}.mod", self.name.replace(' ', "_"))
    }
}

impl DataFile {
    /// Download name for the `.dat` export.
    pub fn export_filename(&self) -> String {
        if self.name.ends_with(".dat") {
            self.name.clone()
        } else {
            format!("{}.dat", self.name)
        }
    }
}

/// Outcome of loading a model without solving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ModelValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetInfo {
    pub name: String,
    /// Member count, known only when data was loaded and the set is not indexed
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityName {
    pub name: String,
}

impl EntityName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Declared entities of a model, grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub sets: Vec<SetInfo>,
    pub parameters: Vec<EntityName>,
    pub variables: Vec<EntityName>,
    pub objectives: Vec<EntityName>,
    pub constraints: Vec<EntityName>,
}

fn validate_name(name: &str, what: &str) -> Result<(), LabError> {
    if name.trim().is_empty() {
        return Err(LabError::Validation(format!("{} name cannot be empty", what)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(LabError::Validation(format!(
            "{} name cannot exceed {} characters",
            what, MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_problem_type(problem_type: &str) -> Result<(), LabError> {
    if !PROBLEM_TYPES.contains(&problem_type) {
        return Err(LabError::Validation(format!(
            "Invalid problem type '{}': expected one of {}",
            problem_type,
            PROBLEM_TYPES.join(", ")
        )));
    }
    Ok(())
}

/// Validate a NewModel before creation.
pub fn validate_new_model(model: &NewModel) -> Result<(), LabError> {
    validate_name(&model.name, "Model")?;
    if model.model_content.is_empty() {
        return Err(LabError::Validation(
            "Model content cannot be empty".to_string(),
        ));
    }
    if let Some(ref pt) = model.problem_type {
        validate_problem_type(pt)?;
    }
    Ok(())
}

/// Validate a ModelUpdate before applying.
pub fn validate_model_update(update: &ModelUpdate) -> Result<(), LabError> {
    if let Some(ref name) = update.name {
        validate_name(name, "Model")?;
    }
    if let Some(ref content) = update.model_content {
        if content.is_empty() {
            return Err(LabError::Validation(
                "Model content cannot be empty".to_string(),
            ));
        }
    }
    if let Some(ref pt) = update.problem_type {
        validate_problem_type(pt)?;
    }
    Ok(())
}

/// Validate a NewDataFile before creation.
pub fn validate_new_data_file(file: &NewDataFile) -> Result<(), LabError> {
    validate_name(&file.name, "Data file")?;
    if file.file_content.is_empty() {
        return Err(LabError::Validation(
            "Data file content cannot be empty".to_string(),
        ));
    }
    if !FILE_TYPES.contains(&file.file_type.as_str()) {
        return Err(LabError::Validation(format!(
            "Invalid file type '{}': expected dat or excel_import",
            file.file_type
        )));
    }
    Ok(())
}
