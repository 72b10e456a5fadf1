//! C2 — Realm Registry: the keyed collection owning realm allocation and
//! deletion, plus C3's `adjust-parent` (which needs registry access to
//! get-or-create the new parent and unlink from the old one).
//!
//! Callers must hold the engine's realm-graph lock in write mode for every
//! method here (§5) — this type has no internal locking of its own; it is
//! always reached through `SnapshotRealmEngine`'s `parking_lot::RwLock`.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::realm::{RealmNode, RealmRef};

/// Indexed collection mapping realm-id to realm state.
///
/// The registry itself never contributes a reference: a fresh entry is
/// inserted with `nref == 0` and immediately bumped to 1 by the same
/// `get_or_create` call that created it, exactly as §4.1 specifies.
#[derive(Debug, Default)]
pub struct RealmRegistry {
    realms: HashMap<u64, RealmNode>,
    inode_realm: HashMap<u64, u64>,
}

impl RealmRegistry {
    /// Create an empty registry, pre-sizing its backing map.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            realms: HashMap::with_capacity(capacity),
            inode_realm: HashMap::new(),
        }
    }

    /// The realm an inode is currently a member of, per invariant 5 (every
    /// capped inode belongs to exactly one realm's `inodes_with_caps`).
    pub fn realm_of_inode(&self, ino: u64) -> Option<u64> {
        self.inode_realm.get(&ino).copied()
    }

    /// Record that `ino` now belongs to `realm_ino`'s `inodes_with_caps`.
    /// Pure membership bookkeeping; callers are responsible for any
    /// accompanying refcount change via `get_or_create`/`put`.
    pub fn attach_inode(&mut self, ino: u64, realm_ino: u64) {
        if let Some(node) = self.realms.get_mut(&realm_ino) {
            node.inodes_with_caps.insert(ino);
        }
        self.inode_realm.insert(ino, realm_ino);
    }

    /// Remove `ino` from whichever realm it currently belongs to. Returns
    /// that realm's ino, if any.
    pub fn detach_inode(&mut self, ino: u64) -> Option<u64> {
        let realm_ino = self.inode_realm.remove(&ino)?;
        if let Some(node) = self.realms.get_mut(&realm_ino) {
            node.inodes_with_caps.remove(&ino);
        }
        Some(realm_ino)
    }

    /// Look up a realm without taking a reference.
    pub fn get(&self, ino: u64) -> Option<&RealmNode> {
        self.realms.get(&ino)
    }

    /// Look up a realm mutably without taking a reference.
    pub fn get_mut(&mut self, ino: u64) -> Option<&mut RealmNode> {
        self.realms.get_mut(&ino)
    }

    /// Whether a realm is currently registered.
    pub fn contains(&self, ino: u64) -> bool {
        self.realms.contains_key(&ino)
    }

    /// Get-or-create a realm, returning a handle with one incremented
    /// reference.
    ///
    /// If the realm is absent, it is allocated, inserted with a zero
    /// refcount, and that refcount is immediately bumped to one — the
    /// registry's own map entry is never itself counted.
    pub fn get_or_create(&mut self, ino: u64) -> Result<RealmRef> {
        let is_new = !self.realms.contains_key(&ino);
        let node = self
            .realms
            .entry(ino)
            .or_insert_with(|| RealmNode::new(ino));
        node.nref += 1;
        if is_new {
            log::debug!("realm {} created (nref=1)", ino);
        }
        Ok(RealmRef::new(ino))
    }

    /// Release a reference to a realm.
    ///
    /// When the refcount reaches zero: unlink from the parent's child set,
    /// recursively `put` the parent reference this realm held, drop the
    /// cached context and snap lists, and remove the entry from the
    /// registry.
    pub fn put(&mut self, realm: RealmRef) {
        let ino = realm.ino();
        let reached_zero = match self.realms.get_mut(&ino) {
            Some(node) => {
                debug_assert!(node.nref > 0, "put() underflow on realm {}", ino);
                node.nref = node.nref.saturating_sub(1);
                node.nref == 0
            }
            None => {
                log::warn!("put() called on unregistered realm {}", ino);
                return;
            }
        };

        if !reached_zero {
            return;
        }

        let parent_ino = self.realms.get(&ino).and_then(|n| n.parent_ino);
        if let Some(pino) = parent_ino {
            if let Some(parent) = self.realms.get_mut(&pino) {
                parent.children.remove(&ino);
            }
            // This realm held one reference to its parent; release it.
            self.put(RealmRef::new(pino));
        }

        self.realms.remove(&ino);
        log::info!("realm {} destroyed (nref reached zero)", ino);
    }

    /// C3 — adjust the realm's parent pointer.
    ///
    /// `new_parent_ino == 0` is the wire convention for "no parent" (the
    /// realm becomes a root). Returns `Ok(true)` iff the parent actually
    /// changed; the caller (the trace handler) combines this with a seq
    /// bump to decide whether to invalidate the cached context — adjusting
    /// the parent alone does not.
    pub fn adjust_parent(&mut self, ino: u64, new_parent_ino: u64) -> Result<bool> {
        let new_parent_ino = if new_parent_ino == 0 {
            None
        } else {
            Some(new_parent_ino)
        };

        let current_parent_ino = self
            .get(ino)
            .ok_or_else(|| EngineError::Malformed(format!("adjust_parent: unknown realm {}", ino)))?
            .parent_ino;

        if current_parent_ino == new_parent_ino {
            return Ok(false);
        }

        // Take the new parent reference before releasing the old one, so a
        // realm moving to a sibling of its own ancestor never transiently
        // drops to zero references on a realm still in use.
        if let Some(npi) = new_parent_ino {
            self.get_or_create(npi)?;
        }

        if let Some(old_ino) = current_parent_ino {
            if let Some(old_parent) = self.get_mut(old_ino) {
                old_parent.children.remove(&ino);
            }
            self.put(RealmRef::new(old_ino));
        }

        if let Some(node) = self.get_mut(ino) {
            node.parent_ino = new_parent_ino;
        }
        if let Some(npi) = new_parent_ino {
            if let Some(parent) = self.get_mut(npi) {
                parent.children.insert(ino);
            }
        }

        Ok(true)
    }
}
