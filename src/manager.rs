//! Link Manager - orchestration over the entity and link stores
//!
//! The manager is the only component that knows links and entities belong
//! together. It:
//! - reports a repeated pair as [`LinkOutcome::Conflict`] instead of an error
//! - deletes an entity's links before the entity itself, so deleting a
//!   feature or provision never leaves orphaned links behind
//!
//! There is no transaction spanning the entity and link tables. Cascades
//! run links-first: if the entity delete then fails, the only effect is
//! that the doomed entity lost its links early.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Map;

use crate::link::{Link, LinkKey, LinkOutcome, LinkPatch};
use crate::storage::{Database, EntityStore, LinkStore};
use crate::{Error, Feature, Provision, Result};

/// Behaviour switches for [`LinkManager`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerOptions {
    /// Refuse links whose feature or provision is not stored
    pub require_existing_entities: bool,
}

/// Record counts across the three tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub features: usize,
    pub provisions: usize,
    pub links: usize,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Features: {}", self.features)?;
        writeln!(f, "  Provisions: {}", self.provisions)?;
        writeln!(f, "  Links: {}", self.links)
    }
}

#[derive(Clone)]
pub struct LinkManager {
    features: EntityStore<Feature>,
    provisions: EntityStore<Provision>,
    links: LinkStore,
    options: ManagerOptions,
}

impl LinkManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_options(db, ManagerOptions::default())
    }

    pub fn with_options(db: Arc<Database>, options: ManagerOptions) -> Self {
        Self {
            features: EntityStore::new(Arc::clone(&db)),
            provisions: EntityStore::new(Arc::clone(&db)),
            links: LinkStore::new(db),
            options,
        }
    }

    /// A manager whose storage calls fail as transient once `deadline` passes.
    ///
    /// Work that has not reached the database by then never runs, and a
    /// statement still running is interrupted and rolled back.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            features: self.features.with_deadline(deadline),
            provisions: self.provisions.with_deadline(deadline),
            links: self.links.with_deadline(deadline),
            options: self.options,
        }
    }

    // ========== Link Operations ==========

    /// Link a feature to a provision
    pub fn link(&self, key: LinkKey) -> Result<LinkOutcome> {
        let inserted = if self.options.require_existing_entities {
            self.links.insert_checked(key)
        } else {
            self.links.insert(key)
        };

        let outcome = LinkOutcome::from_store(inserted)?;
        if let LinkOutcome::Conflict(key) = &outcome {
            tracing::info!(feature_id = key.feature_id, provision_id = key.provision_id, "link already exists");
        }
        Ok(outcome)
    }

    /// Replace the pair stored under `link_id`
    pub fn relink(&self, link_id: i64, patch: LinkPatch) -> Result<LinkOutcome> {
        if self.options.require_existing_entities {
            if let Some(feature_id) = patch.feature_id {
                if !self.features.exists(feature_id)? {
                    return Err(Error::NotFound(format!("feature {}", feature_id)));
                }
            }
            if let Some(provision_id) = patch.provision_id {
                if !self.provisions.exists(provision_id)? {
                    return Err(Error::NotFound(format!("provision {}", provision_id)));
                }
            }
        }
        LinkOutcome::from_store(self.links.update_link(link_id, patch))
    }

    /// Remove a single pair
    pub fn unlink(&self, key: LinkKey) -> Result<()> {
        if self.links.delete(key)? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("link {}", key)))
        }
    }

    pub fn provisions_for_feature(&self, feature_id: i64) -> Result<Vec<Link>> {
        self.links.find_by_feature(feature_id)
    }

    pub fn features_for_provision(&self, provision_id: i64) -> Result<Vec<Link>> {
        self.links.find_by_provision(provision_id)
    }

    pub fn delete_links_by_feature(&self, feature_id: i64) -> Result<usize> {
        self.links.delete_by_feature(feature_id)
    }

    pub fn delete_links_by_provision(&self, provision_id: i64) -> Result<usize> {
        self.links.delete_by_provision(provision_id)
    }

    // ========== Feature Operations ==========

    pub fn create_feature(&self, feature: &Feature) -> Result<Feature> {
        self.features.create(feature)
    }

    pub fn get_feature(&self, feature_id: i64) -> Result<Feature> {
        self.features.get(feature_id)
    }

    pub fn list_features(&self) -> Result<Vec<Feature>> {
        self.features.list()
    }

    pub fn update_feature(
        &self,
        feature_id: i64,
        fields: &Map<String, serde_json::Value>,
    ) -> Result<Map<String, serde_json::Value>> {
        self.features.update(feature_id, fields)
    }

    /// Delete a feature and all of its links; returns the number of links removed
    pub fn delete_feature(&self, feature_id: i64) -> Result<usize> {
        let removed = self.links.delete_by_feature(feature_id)?;
        if let Err(e) = self.features.delete(feature_id) {
            if removed > 0 {
                tracing::warn!(feature_id, links_removed = removed, "removed orphan links of a missing feature");
            }
            return Err(e);
        }
        tracing::info!(feature_id, links_removed = removed, "feature deleted");
        Ok(removed)
    }

    // ========== Provision Operations ==========

    pub fn create_provision(&self, provision: &Provision) -> Result<Provision> {
        self.provisions.create(provision)
    }

    /// Insert a batch of provisions atomically
    pub fn create_provisions(&self, provisions: &[Provision]) -> Result<Vec<Provision>> {
        self.provisions.create_many(provisions)
    }

    pub fn get_provision(&self, provision_id: i64) -> Result<Provision> {
        self.provisions.get(provision_id)
    }

    pub fn list_provisions(&self) -> Result<Vec<Provision>> {
        self.provisions.list()
    }

    pub fn update_provision(
        &self,
        provision_id: i64,
        fields: &Map<String, serde_json::Value>,
    ) -> Result<Map<String, serde_json::Value>> {
        self.provisions.update(provision_id, fields)
    }

    /// Delete a provision and all of its links; returns the number of links removed
    pub fn delete_provision(&self, provision_id: i64) -> Result<usize> {
        let removed = self.links.delete_by_provision(provision_id)?;
        if let Err(e) = self.provisions.delete(provision_id) {
            if removed > 0 {
                tracing::warn!(provision_id, links_removed = removed, "removed orphan links of a missing provision");
            }
            return Err(e);
        }
        tracing::info!(provision_id, links_removed = removed, "provision deleted");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            features: self.features.count()?,
            provisions: self.provisions.count()?,
            links: self.links.count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn manager() -> LinkManager {
        LinkManager::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn strict_manager() -> LinkManager {
        LinkManager::with_options(
            Arc::new(Database::open_in_memory().unwrap()),
            ManagerOptions { require_existing_entities: true },
        )
    }

    #[test]
    fn test_second_link_is_conflict() {
        let m = manager();
        assert!(m.link(LinkKey::new(1, 101)).unwrap().is_linked());

        let second = m.link(LinkKey::new(1, 101)).unwrap();
        assert_eq!(second, LinkOutcome::Conflict(LinkKey::new(1, 101)));
        assert_eq!(m.provisions_for_feature(1).unwrap().len(), 1);
    }

    #[test]
    fn test_bidirectional_queries() {
        let m = manager();
        for (f, p) in [(1, 101), (1, 102), (1, 103), (2, 101), (3, 101)] {
            assert!(m.link(LinkKey::new(f, p)).unwrap().is_linked());
        }

        let provisions: BTreeSet<i64> = m.provisions_for_feature(1).unwrap().iter().map(|l| l.provision_id).collect();
        assert_eq!(provisions, [101, 102, 103].into());

        let features: BTreeSet<i64> = m.features_for_provision(101).unwrap().iter().map(|l| l.feature_id).collect();
        assert_eq!(features, [1, 2, 3].into());
    }

    #[test]
    fn test_delete_feature_cascades_links() {
        let m = manager();
        m.create_feature(&Feature::new(1, "Chat")).unwrap();
        m.create_feature(&Feature::new(2, "Feed")).unwrap();
        for (f, p) in [(1, 101), (1, 102), (2, 101)] {
            let _ = m.link(LinkKey::new(f, p)).unwrap();
        }

        assert_eq!(m.delete_feature(1).unwrap(), 2);
        assert!(m.provisions_for_feature(1).unwrap().is_empty());
        assert_eq!(m.features_for_provision(101).unwrap().len(), 1);
        assert!(matches!(m.get_feature(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_provision_cascades_links() {
        let m = manager();
        m.create_provision(&Provision::new(101, "Art. 5")).unwrap();
        for f in [1, 2, 3] {
            let _ = m.link(LinkKey::new(f, 101)).unwrap();
        }
        let _ = m.link(LinkKey::new(1, 102)).unwrap();

        assert_eq!(m.delete_provision(101).unwrap(), 3);
        assert!(m.features_for_provision(101).unwrap().is_empty());
        assert_eq!(m.stats().unwrap().links, 1);
    }

    #[test]
    fn test_delete_missing_entity_is_not_found() {
        let m = manager();
        let _ = m.link(LinkKey::new(7, 70)).unwrap();

        // the orphan links of an unknown feature are still cleaned up
        assert!(matches!(m.delete_feature(7), Err(Error::NotFound(_))));
        assert!(m.provisions_for_feature(7).unwrap().is_empty());
        assert!(matches!(m.delete_provision(70), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unlink() {
        let m = manager();
        let _ = m.link(LinkKey::new(1, 2)).unwrap();
        m.unlink(LinkKey::new(1, 2)).unwrap();
        assert!(matches!(m.unlink(LinkKey::new(1, 2)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_relink_conflict() {
        let m = manager();
        let first = m.link(LinkKey::new(1, 101)).unwrap();
        let _ = m.link(LinkKey::new(1, 102)).unwrap();
        let link_id = first.link().unwrap().link_id;

        let outcome = m
            .relink(link_id, LinkPatch { feature_id: None, provision_id: Some(102) })
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Conflict(LinkKey::new(1, 102)));

        let outcome = m
            .relink(link_id, LinkPatch { feature_id: None, provision_id: Some(103) })
            .unwrap();
        assert_eq!(outcome.link().map(Link::key), Some(LinkKey::new(1, 103)));
    }

    #[test]
    fn test_strict_mode_requires_entities() {
        let m = strict_manager();
        assert!(matches!(m.link(LinkKey::new(1, 101)), Err(Error::NotFound(_))));

        m.create_feature(&Feature::new(1, "Chat")).unwrap();
        assert!(matches!(m.link(LinkKey::new(1, 101)), Err(Error::NotFound(_))));

        m.create_provision(&Provision::new(101, "Art. 5")).unwrap();
        assert!(m.link(LinkKey::new(1, 101)).unwrap().is_linked());
        assert!(m.link(LinkKey::new(1, 101)).unwrap().is_conflict());
    }

    #[test]
    fn test_strict_relink_requires_target_entities() {
        let m = strict_manager();
        m.create_feature(&Feature::new(1, "Chat")).unwrap();
        m.create_provision(&Provision::new(101, "Art. 5")).unwrap();
        let link_id = m.link(LinkKey::new(1, 101)).unwrap().link().unwrap().link_id;

        let err = m
            .relink(link_id, LinkPatch { feature_id: None, provision_id: Some(102) })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(m.provisions_for_feature(1).unwrap()[0].provision_id, 101);
    }

    #[test]
    fn test_expired_deadline_writes_nothing() {
        let m = manager();
        m.create_feature(&Feature::new(1, "Chat")).unwrap();
        let _ = m.link(LinkKey::new(1, 101)).unwrap();

        let late = m.with_deadline(Instant::now());
        assert!(late.link(LinkKey::new(1, 102)).unwrap_err().is_transient());
        assert!(late.delete_feature(1).unwrap_err().is_transient());

        assert_eq!(m.stats().unwrap(), Stats { features: 1, provisions: 0, links: 1 });
    }

    #[test]
    fn test_stats() {
        let m = manager();
        m.create_feature(&Feature::new(1, "Chat")).unwrap();
        m.create_provisions(&[Provision::new(1, "A"), Provision::new(2, "B")]).unwrap();
        let _ = m.link(LinkKey::new(1, 1)).unwrap();

        assert_eq!(m.stats().unwrap(), Stats { features: 1, provisions: 2, links: 1 });
    }
}
