//! Database schema definitions

/// SQL to create the feature table
pub const CREATE_FEATURE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS feature (
    feature_id INTEGER PRIMARY KEY,
    feature_title TEXT NOT NULL DEFAULT '',
    feature_description TEXT NOT NULL DEFAULT '',
    feature_type TEXT NOT NULL DEFAULT '',
    project_name TEXT NOT NULL DEFAULT '',
    project_id INTEGER NOT NULL DEFAULT 0,
    reference_file TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
)
"#;

/// SQL to create the provision table
/// `relevant_labels` holds a JSON array of strings
pub const CREATE_PROVISION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS provision (
    provision_id INTEGER PRIMARY KEY,
    provision_title TEXT NOT NULL DEFAULT '',
    provision_body TEXT NOT NULL DEFAULT '',
    provision_code TEXT NOT NULL DEFAULT '',
    country TEXT NOT NULL DEFAULT '',
    region TEXT NOT NULL DEFAULT '',
    law_code TEXT NOT NULL DEFAULT '',
    reference_file TEXT NOT NULL DEFAULT '',
    relevant_labels TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
)
"#;

/// SQL to create the link table
/// The compound UNIQUE constraint is what decides concurrent identical inserts
pub const CREATE_LINK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS feature_provision_link (
    link_id INTEGER PRIMARY KEY AUTOINCREMENT,
    feature_id INTEGER NOT NULL,
    provision_id INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE(feature_id, provision_id)
)
"#;

/// Strftime expression used when the store stamps `updated_at`
pub const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%SZ', 'now')";

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_link_feature ON feature_provision_link(feature_id)",
    "CREATE INDEX IF NOT EXISTS idx_link_provision ON feature_provision_link(provision_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_FEATURE_TABLE,
        CREATE_PROVISION_TABLE,
        CREATE_LINK_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
