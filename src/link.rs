//! Feature-provision links
//!
//! A link asserts that a feature is governed by (or conflicts with) a
//! provision. The pair `(feature_id, provision_id)` is the link's only
//! meaningful identity; `link_id` is a row handle assigned by the store.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The `(feature_id, provision_id)` pair a link represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub feature_id: i64,
    pub provision_id: i64,
}

impl LinkKey {
    pub fn new(feature_id: i64, provision_id: i64) -> Self {
        Self { feature_id, provision_id }
    }

    /// Both sides must reference a positive identifier
    pub fn validate(&self) -> Result<()> {
        if self.feature_id <= 0 {
            return Err(Error::Validation(format!("invalid feature_id: {}", self.feature_id)));
        }
        if self.provision_id <= 0 {
            return Err(Error::Validation(format!("invalid provision_id: {}", self.provision_id)));
        }
        Ok(())
    }
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.feature_id, self.provision_id)
    }
}

/// A stored link row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub link_id: i64,
    pub feature_id: i64,
    pub provision_id: i64,
    pub created_at: String,
}

impl Link {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.feature_id, self.provision_id)
    }
}

/// Replacement values for an existing link. Absent sides keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_id: Option<i64>,
}

impl LinkPatch {
    pub fn is_empty(&self) -> bool {
        self.feature_id.is_none() && self.provision_id.is_none()
    }

    /// The pair that results from applying this patch to `current`
    pub fn apply(&self, current: LinkKey) -> LinkKey {
        LinkKey {
            feature_id: self.feature_id.unwrap_or(current.feature_id),
            provision_id: self.provision_id.unwrap_or(current.provision_id),
        }
    }
}

/// Outcome of an operation that writes a link pair.
///
/// A uniqueness violation is a normal outcome here, not an error: under
/// concurrent identical inserts exactly one caller sees `Linked` and every
/// other caller sees `Conflict`. Storage faults stay in the `Err` arm of the
/// surrounding `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum LinkOutcome {
    Linked(Link),
    Conflict(LinkKey),
}

impl LinkOutcome {
    /// Fold a store result into an outcome, keeping every other error as-is
    pub fn from_store(result: Result<Link>) -> Result<Self> {
        match result {
            Ok(link) => Ok(LinkOutcome::Linked(link)),
            Err(Error::DuplicateLink { feature_id, provision_id }) => {
                Ok(LinkOutcome::Conflict(LinkKey::new(feature_id, provision_id)))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, LinkOutcome::Linked(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LinkOutcome::Conflict(_))
    }

    pub fn link(&self) -> Option<&Link> {
        match self {
            LinkOutcome::Linked(link) => Some(link),
            LinkOutcome::Conflict(_) => None,
        }
    }
}
