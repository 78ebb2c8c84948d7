//! Feature records - software capabilities tracked for compliance

use rusqlite::Row;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::storage::{Column, Entity};

/// A software capability, owned by a project and traced back to the
/// document it was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub feature_id: i64,
    #[serde(default)]
    pub feature_title: String,
    #[serde(default)]
    pub feature_description: String,
    #[serde(default)]
    pub feature_type: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_id: i64,
    #[serde(default)]
    pub reference_file: String,
    /// Assigned by the store on insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Assigned by the store on insert and on every update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Feature {
    /// Create a feature with only its identifier and title set
    pub fn new(feature_id: i64, title: impl Into<String>) -> Self {
        Self {
            feature_id,
            feature_title: title.into(),
            feature_description: String::new(),
            feature_type: String::new(),
            project_name: String::new(),
            project_id: 0,
            reference_file: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.feature_description = description.into();
        self
    }

    pub fn with_type(mut self, feature_type: impl Into<String>) -> Self {
        self.feature_type = feature_type.into();
        self
    }

    pub fn with_project(mut self, project_id: i64, project_name: impl Into<String>) -> Self {
        self.project_id = project_id;
        self.project_name = project_name.into();
        self
    }
}

impl Entity for Feature {
    const KIND: &'static str = "feature";
    const TABLE: &'static str = "feature";
    const ID_COLUMN: &'static str = "feature_id";
    const COLUMNS: &'static [Column] = &[
        Column::text("feature_title"),
        Column::text("feature_description"),
        Column::text("feature_type"),
        Column::text("project_name"),
        Column::integer("project_id"),
        Column::text("reference_file"),
    ];

    fn id(&self) -> i64 {
        self.feature_id
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.feature_title.clone()),
            Value::Text(self.feature_description.clone()),
            Value::Text(self.feature_type.clone()),
            Value::Text(self.project_name.clone()),
            Value::Integer(self.project_id),
            Value::Text(self.reference_file.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Feature {
            feature_id: row.get(0)?,
            feature_title: row.get(1)?,
            feature_description: row.get(2)?,
            feature_type: row.get(3)?,
            project_name: row.get(4)?,
            project_id: row.get(5)?,
            reference_file: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_defaults_optional_fields() {
        let feature: Feature = serde_json::from_str(r#"{"feature_id": 7}"#).unwrap();
        assert_eq!(feature.feature_id, 7);
        assert_eq!(feature.feature_title, "");
        assert_eq!(feature.project_id, 0);
        assert!(feature.created_at.is_none());
    }

    #[test]
    fn test_missing_id_fails_to_decode() {
        let result: Result<Feature, _> = serde_json::from_str(r#"{"feature_title": "Geo"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_columns_match_values() {
        let feature = Feature::new(1, "Age gate").with_project(3, "Onboarding");
        assert_eq!(Feature::COLUMNS.len(), feature.column_values().len());
    }
}
