//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - feature(feature_id, feature_title, ..., created_at, updated_at)
//! - provision(provision_id, provision_title, ..., relevant_labels, created_at, updated_at)
//! - feature_provision_link(link_id, feature_id, provision_id, created_at)
//!   with UNIQUE(feature_id, provision_id)

pub mod schema;
pub mod sqlite;
pub mod entity;
pub mod links;

pub use sqlite::{Database, StorageOptions};
pub use entity::{Column, ColumnKind, Entity, EntityStore};
pub use links::LinkStore;
