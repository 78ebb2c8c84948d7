//! Link table operations

use std::sync::Arc;
use std::time::Instant;

use rusqlite::{Connection, OptionalExtension, params};

use crate::link::{Link, LinkKey, LinkPatch};
use crate::{Error, Result};
use super::sqlite::{Database, is_unique_violation};

const SELECT_LINK: &str = "SELECT link_id, feature_id, provision_id, created_at FROM feature_provision_link";

/// Persistence for `(feature_id, provision_id)` pairs.
///
/// Uniqueness is decided by the table's UNIQUE constraint; there is no
/// read-then-write check anywhere in this type.
#[derive(Clone)]
pub struct LinkStore {
    db: Arc<Database>,
    deadline: Option<Instant>,
}

impl LinkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, deadline: None }
    }

    /// A handle whose storage calls fail as transient once `deadline` passes
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            db: Arc::clone(&self.db),
            deadline: Some(deadline),
        }
    }

    /// Insert a pair; [`Error::DuplicateLink`] if it is already stored
    pub fn insert(&self, key: LinkKey) -> Result<Link> {
        key.validate()?;
        let link = self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO feature_provision_link (feature_id, provision_id) VALUES (?1, ?2)",
                params![key.feature_id, key.provision_id],
            );
            finish_insert(conn, key, inserted)
        })?;
        tracing::debug!(feature_id = key.feature_id, provision_id = key.provision_id, "link inserted");
        Ok(link)
    }

    /// Insert a pair only if both the feature and the provision are stored.
    ///
    /// The existence check and the insert are one statement, so a
    /// concurrent entity delete cannot slip between them.
    pub fn insert_checked(&self, key: LinkKey) -> Result<Link> {
        key.validate()?;
        let link = self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO feature_provision_link (feature_id, provision_id)
                 SELECT ?1, ?2
                 WHERE EXISTS (SELECT 1 FROM feature WHERE feature_id = ?1)
                   AND EXISTS (SELECT 1 FROM provision WHERE provision_id = ?2)",
                params![key.feature_id, key.provision_id],
            );
            if let Ok(0) = inserted {
                return Err(missing_endpoint(conn, key)?);
            }
            finish_insert(conn, key, inserted)
        })?;
        tracing::debug!(feature_id = key.feature_id, provision_id = key.provision_id, "checked link inserted");
        Ok(link)
    }

    pub fn find_by_feature(&self, feature_id: i64) -> Result<Vec<Link>> {
        self.find_where("feature_id", feature_id)
    }

    pub fn find_by_provision(&self, provision_id: i64) -> Result<Vec<Link>> {
        self.find_where("provision_id", provision_id)
    }

    /// Remove every link of a feature in one statement; returns the count removed
    pub fn delete_by_feature(&self, feature_id: i64) -> Result<usize> {
        self.delete_where("feature_id", feature_id)
    }

    /// Remove every link of a provision in one statement; returns the count removed
    pub fn delete_by_provision(&self, provision_id: i64) -> Result<usize> {
        self.delete_where("provision_id", provision_id)
    }

    /// Remove a single pair; returns whether it was stored
    pub fn delete(&self, key: LinkKey) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM feature_provision_link WHERE feature_id = ?1 AND provision_id = ?2",
                params![key.feature_id, key.provision_id],
            )?)
        })?;
        Ok(removed > 0)
    }

    /// Replace the pair stored under `link_id`
    pub fn update_link(&self, link_id: i64, patch: LinkPatch) -> Result<Link> {
        if patch.is_empty() {
            return Err(Error::Validation("no link fields to update".to_string()));
        }

        self.with_conn(|conn| {
            let current = select_by_id(conn, link_id)?
                .ok_or_else(|| Error::NotFound(format!("link {}", link_id)))?;
            let target = patch.apply(current.key());
            target.validate()?;

            let updated = conn.execute(
                "UPDATE feature_provision_link SET feature_id = ?1, provision_id = ?2 WHERE link_id = ?3",
                params![target.feature_id, target.provision_id, link_id],
            );
            match updated {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(Error::DuplicateLink {
                        feature_id: target.feature_id,
                        provision_id: target.provision_id,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            tracing::debug!(link_id, from = %current.key(), to = %target, "link updated");
            Ok(Link {
                feature_id: target.feature_id,
                provision_id: target.provision_id,
                ..current
            })
        })
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM feature_provision_link", [], |row| row.get(0))?)
        })?;
        Ok(count as usize)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.db.with_conn_until(self.deadline, f)
    }

    fn find_where(&self, column: &'static str, id: i64) -> Result<Vec<Link>> {
        let sql = format!("{} WHERE {} = ?1", SELECT_LINK, column);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let links = stmt
                .query_map([id], row_to_link)?
                .collect::<rusqlite::Result<Vec<Link>>>()?;
            Ok(links)
        })
    }

    fn delete_where(&self, column: &'static str, id: i64) -> Result<usize> {
        let sql = format!("DELETE FROM feature_provision_link WHERE {} = ?1", column);
        let removed = self.with_conn(|conn| Ok(conn.execute(&sql, [id])?))?;
        tracing::debug!(column, id, removed, "links bulk deleted");
        Ok(removed)
    }
}

fn finish_insert(conn: &Connection, key: LinkKey, inserted: rusqlite::Result<usize>) -> Result<Link> {
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(Error::DuplicateLink {
                feature_id: key.feature_id,
                provision_id: key.provision_id,
            });
        }
        Err(e) => return Err(e.into()),
    }
    let link_id = conn.last_insert_rowid();
    select_by_id(conn, link_id)?
        .ok_or_else(|| Error::UnexpectedStorage(format!("link {} vanished after insert", link_id)))
}

/// Name the side of `key` that has no stored entity
fn missing_endpoint(conn: &Connection, key: LinkKey) -> Result<Error> {
    let feature: Option<i64> = conn
        .query_row("SELECT 1 FROM feature WHERE feature_id = ?1", [key.feature_id], |row| row.get(0))
        .optional()?;
    Ok(match feature {
        None => Error::NotFound(format!("feature {}", key.feature_id)),
        Some(_) => Error::NotFound(format!("provision {}", key.provision_id)),
    })
}

fn select_by_id(conn: &Connection, link_id: i64) -> Result<Option<Link>> {
    let sql = format!("{} WHERE link_id = ?1", SELECT_LINK);
    Ok(conn.query_row(&sql, [link_id], row_to_link).optional()?)
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    Ok(Link {
        link_id: row.get(0)?,
        feature_id: row.get(1)?,
        provision_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}
