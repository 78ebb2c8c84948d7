//! Provision records - legal and regulatory clauses

use rusqlite::Row;
use rusqlite::types::{Type, Value};
use serde::{Deserialize, Serialize};

use crate::storage::{Column, Entity};

/// A clause of a law, scoped to a jurisdiction and tagged with free-form labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    #[serde(rename = "id", alias = "provision_id")]
    pub provision_id: i64,
    #[serde(default)]
    pub provision_title: String,
    #[serde(default)]
    pub provision_body: String,
    #[serde(default)]
    pub provision_code: String,
    /// Jurisdiction code
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    /// Code of the law this provision originates from
    #[serde(default)]
    pub law_code: String,
    #[serde(default)]
    pub reference_file: String,
    #[serde(default)]
    pub relevant_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Provision {
    pub fn new(provision_id: i64, title: impl Into<String>) -> Self {
        Self {
            provision_id,
            provision_title: title.into(),
            provision_body: String::new(),
            provision_code: String::new(),
            country: String::new(),
            region: String::new(),
            law_code: String::new(),
            reference_file: String::new(),
            relevant_labels: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_jurisdiction(mut self, country: impl Into<String>, region: impl Into<String>) -> Self {
        self.country = country.into();
        self.region = region.into();
        self
    }

    pub fn with_law_code(mut self, law_code: impl Into<String>) -> Self {
        self.law_code = law_code.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant_labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

impl Entity for Provision {
    const KIND: &'static str = "provision";
    const TABLE: &'static str = "provision";
    const ID_COLUMN: &'static str = "provision_id";
    const ID_ALIASES: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [Column] = &[
        Column::text("provision_title"),
        Column::text("provision_body"),
        Column::text("provision_code"),
        Column::text("country"),
        Column::text("region"),
        Column::text("law_code"),
        Column::text("reference_file"),
        Column::labels("relevant_labels"),
    ];

    fn id(&self) -> i64 {
        self.provision_id
    }

    fn column_values(&self) -> Vec<Value> {
        // Vec<String> always serializes
        let labels = serde_json::to_string(&self.relevant_labels).unwrap_or_else(|_| "[]".to_string());
        vec![
            Value::Text(self.provision_title.clone()),
            Value::Text(self.provision_body.clone()),
            Value::Text(self.provision_code.clone()),
            Value::Text(self.country.clone()),
            Value::Text(self.region.clone()),
            Value::Text(self.law_code.clone()),
            Value::Text(self.reference_file.clone()),
            Value::Text(labels),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let labels_json: String = row.get(8)?;
        let relevant_labels: Vec<String> = serde_json::from_str(&labels_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e))
        })?;

        Ok(Provision {
            provision_id: row.get(0)?,
            provision_title: row.get(1)?,
            provision_body: row.get(2)?,
            provision_code: row.get(3)?,
            country: row.get(4)?,
            region: row.get(5)?,
            law_code: row.get(6)?,
            reference_file: row.get(7)?,
            relevant_labels,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_field_names() {
        let by_id: Provision = serde_json::from_str(r#"{"id": 101}"#).unwrap();
        let by_alias: Provision = serde_json::from_str(r#"{"provision_id": 101}"#).unwrap();
        assert_eq!(by_id.provision_id, 101);
        assert_eq!(by_alias.provision_id, 101);

        let json = serde_json::to_value(&by_id).unwrap();
        assert_eq!(json["id"], 101);
        assert!(json.get("provision_id").is_none());
    }

    #[test]
    fn test_labels_stored_as_json() {
        let provision = Provision::new(5, "Minors").with_labels(["age", "consent"]);
        let values = provision.column_values();
        assert_eq!(values.len(), Provision::COLUMNS.len());
        assert_eq!(values[7], Value::Text(r#"["age","consent"]"#.to_string()));
    }
}
