//! Generic entity store shared by features and provisions

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;

use crate::{Error, Result};
use super::schema::NOW;
use super::sqlite::{Database, is_unique_violation};

/// Storage type of a mutable entity column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// `Vec<String>` persisted as a JSON array
    Labels,
}

/// A mutable, non-identifier column of an entity table
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Text }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Integer }
    }

    pub const fn labels(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Labels }
    }

    /// Convert a JSON patch value into the SQL value for this column
    fn sql_value(&self, value: &serde_json::Value) -> Result<Value> {
        let invalid = |expected: &str| {
            Error::Validation(format!("field `{}` must be {}", self.name, expected))
        };

        match self.kind {
            ColumnKind::Text => value
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| invalid("a string")),
            ColumnKind::Integer => value
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| invalid("an integer")),
            ColumnKind::Labels => {
                let labels: Vec<String> = serde_json::from_value(value.clone())
                    .map_err(|_| invalid("an array of strings"))?;
                serde_json::to_string(&labels)
                    .map(Value::Text)
                    .map_err(|e| Error::UnexpectedStorage(e.to_string()))
            }
        }
    }
}

/// A record kind persisted by [`EntityStore`].
///
/// Rows are read in the order `ID_COLUMN, COLUMNS..., created_at, updated_at`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Human-readable kind used in messages ("feature")
    const KIND: &'static str;
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;
    /// Other names the identifier goes by in JSON payloads
    const ID_ALIASES: &'static [&'static str] = &[];
    const COLUMNS: &'static [Column];

    fn id(&self) -> i64;

    /// Values for `COLUMNS`, in the same order
    fn column_values(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn validate(&self) -> Result<()> {
        if self.id() <= 0 {
            return Err(Error::Validation(format!(
                "invalid {} identifier: {}",
                Self::KIND,
                self.id()
            )));
        }
        Ok(())
    }
}

/// CRUD over one entity table, keyed by the application-level identifier.
pub struct EntityStore<E: Entity> {
    db: Arc<Database>,
    deadline: Option<Instant>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            deadline: self.deadline,
            _kind: PhantomData,
        }
    }
}

impl<E: Entity> EntityStore<E> {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, deadline: None, _kind: PhantomData }
    }

    /// A handle whose storage calls fail as transient once `deadline` passes
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut rusqlite::Connection) -> Result<T>) -> Result<T> {
        self.db.with_conn_until(self.deadline, f)
    }

    /// Decode a JSON payload into a validated entity
    pub fn decode(value: serde_json::Value) -> Result<E> {
        let entity: E = serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("invalid {}: {}", E::KIND, e)))?;
        entity.validate()?;
        Ok(entity)
    }

    /// Insert a new record and return it as stored
    pub fn create(&self, entity: &E) -> Result<E> {
        entity.validate()?;
        let created = self.with_conn(|conn| {
            insert_row(conn, entity)?;
            select_one::<E>(conn, entity.id())?
                .ok_or_else(|| Error::UnexpectedStorage(format!("{} {} vanished after insert", E::KIND, entity.id())))
        })?;
        tracing::debug!(kind = E::KIND, id = entity.id(), "entity created");
        Ok(created)
    }

    /// Insert all records in one transaction; any failure leaves none stored
    pub fn create_many(&self, entities: &[E]) -> Result<Vec<E>> {
        for entity in entities {
            entity.validate()?;
        }

        let created = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for entity in entities {
                insert_row(&tx, entity)?;
            }
            let mut stored = Vec::with_capacity(entities.len());
            for entity in entities {
                if let Some(row) = select_one::<E>(&tx, entity.id())? {
                    stored.push(row);
                }
            }
            tx.commit()?;
            Ok(stored)
        })?;
        tracing::debug!(kind = E::KIND, count = created.len(), "entities created");
        Ok(created)
    }

    pub fn get(&self, id: i64) -> Result<E> {
        self.with_conn(|conn| select_one::<E>(conn, id))?
            .ok_or_else(|| not_found::<E>(id))
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE {} = ?1", E::TABLE, E::ID_COLUMN);
        self.with_conn(|conn| {
            let found: Option<i64> = conn.query_row(&sql, [id], |row| row.get(0)).optional()?;
            Ok(found.is_some())
        })
    }

    /// All records, as a fresh snapshot. Callers must not rely on the order.
    pub fn list(&self) -> Result<Vec<E>> {
        let sql = format!("SELECT {} FROM {} ORDER BY {}", select_list::<E>(), E::TABLE, E::ID_COLUMN);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| E::from_row(row))?
                .collect::<rusqlite::Result<Vec<E>>>()?;
            Ok(rows)
        })
    }

    /// Overwrite the given fields of an existing record.
    ///
    /// Returns the applied field set. Identifier fields cannot be changed.
    pub fn update(&self, id: i64, fields: &Map<String, serde_json::Value>) -> Result<Map<String, serde_json::Value>> {
        if fields.is_empty() {
            return Err(Error::Validation("no fields to update".to_string()));
        }

        let mut assignments = Vec::with_capacity(fields.len() + 1);
        let mut values = Vec::with_capacity(fields.len() + 1);
        for (name, value) in fields {
            if name == E::ID_COLUMN || E::ID_ALIASES.contains(&name.as_str()) {
                return Err(Error::Validation(format!("{} identifier cannot be updated", E::KIND)));
            }
            let column = E::COLUMNS
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| Error::Validation(format!("unknown {} field: {}", E::KIND, name)))?;
            values.push(column.sql_value(value)?);
            assignments.push(format!("{} = ?{}", column.name, values.len()));
        }
        assignments.push(format!("updated_at = {}", NOW));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            E::TABLE,
            assignments.join(", "),
            E::ID_COLUMN,
            values.len()
        );
        let changed = self.with_conn(|conn| Ok(conn.execute(&sql, params_from_iter(values))?))?;
        if changed == 0 {
            return Err(not_found::<E>(id));
        }

        tracing::debug!(kind = E::KIND, id, fields = fields.len(), "entity updated");
        Ok(fields.clone())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", E::TABLE, E::ID_COLUMN);
        let removed = self.with_conn(|conn| Ok(conn.execute(&sql, [id])?))?;
        if removed == 0 {
            return Err(not_found::<E>(id));
        }
        tracing::debug!(kind = E::KIND, id, "entity deleted");
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", E::TABLE);
        let count: i64 = self.with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))?;
        Ok(count as usize)
    }
}

fn not_found<E: Entity>(id: i64) -> Error {
    Error::NotFound(format!("{} {}", E::KIND, id))
}

fn select_list<E: Entity>() -> String {
    let mut columns = vec![E::ID_COLUMN];
    columns.extend(E::COLUMNS.iter().map(|c| c.name));
    columns.push("created_at");
    columns.push("updated_at");
    columns.join(", ")
}

fn select_one<E: Entity>(conn: &rusqlite::Connection, id: i64) -> Result<Option<E>> {
    let sql = format!("SELECT {} FROM {} WHERE {} = ?1", select_list::<E>(), E::TABLE, E::ID_COLUMN);
    Ok(conn.query_row(&sql, [id], |row| E::from_row(row)).optional()?)
}

fn insert_row<E: Entity>(conn: &rusqlite::Connection, entity: &E) -> Result<()> {
    let mut columns = vec![E::ID_COLUMN];
    columns.extend(E::COLUMNS.iter().map(|c| c.name));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        E::TABLE,
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut values = vec![Value::Integer(entity.id())];
    values.extend(entity.column_values());

    match conn.execute(&sql, params_from_iter(values)) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(Error::EntityExists(format!("{} {}", E::KIND, entity.id())))
        }
        Err(e) => Err(e.into()),
    }
}
