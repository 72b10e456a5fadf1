//! C3 — Realm Graph: the parent/child-linked, ref-counted realm nodes and
//! the `adjust-parent` operation.
//!
//! A realm's "reference to its parent" is modeled explicitly rather than
//! through `Arc` strong counts (see DESIGN.md Open Question (a)): the
//! registry (`registry.rs`) owns the only storage for realm data, and every
//! [`RealmRef`] handed out is a cheap, `Copy` identifier (the realm's
//! `ino`) that the registry's `nref` bookkeeping tracks. `RealmRef` is
//! intentionally *not* `Drop`-releasing — callers must call
//! [`crate::registry::RealmRegistry::put`] (or
//! `SnapshotRealmEngine::put_realm`) explicitly, mirroring the manual
//! `ceph_get_snap_realm`/`ceph_put_snap_realm` discipline the spec
//! describes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::SnapContext;

/// A handle to a realm, carrying one unit of reference count.
///
/// Cheap to copy; does not itself keep the realm alive once the holder
/// stops calling `put`. See the module docs for the refcounting contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RealmRef(u64);

impl RealmRef {
    pub(crate) fn new(ino: u64) -> Self {
        Self(ino)
    }

    /// The realm's stable identifier.
    pub fn ino(&self) -> u64 {
        self.0
    }
}

/// Mutable realm state, owned by the registry's map.
///
/// Field names and meanings follow §3 of the specification directly.
#[derive(Debug)]
pub struct RealmNode {
    pub(crate) ino: u64,
    pub(crate) seq: u64,
    pub(crate) created: u64,
    pub(crate) parent_ino: Option<u64>,
    pub(crate) parent_since: u64,
    pub(crate) snaps: Vec<u64>,
    pub(crate) prior_parent_snaps: Vec<u64>,
    pub(crate) children: HashSet<u64>,
    pub(crate) inodes_with_caps: HashSet<u64>,
    pub(crate) cached_context: Option<Arc<SnapContext>>,
    pub(crate) nref: usize,
}

impl RealmNode {
    pub(crate) fn new(ino: u64) -> Self {
        Self {
            ino,
            seq: 0,
            created: 0,
            parent_ino: None,
            parent_since: 0,
            snaps: Vec::new(),
            prior_parent_snaps: Vec::new(),
            children: HashSet::new(),
            inodes_with_caps: HashSet::new(),
            cached_context: None,
            nref: 0,
        }
    }

    /// The realm's stable identifier.
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Server-assigned logical version.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Server-assigned (logical) creation timestamp.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Current parent's ino, or `None` at the root.
    pub fn parent_ino(&self) -> Option<u64> {
        self.parent_ino
    }

    /// The point at which the current parent became this realm's parent.
    pub fn parent_since(&self) -> u64 {
        self.parent_since
    }

    /// Snapshots created directly on this realm, descending order once set
    /// by a trace record (the wire format does not guarantee order, so
    /// callers that care should sort; `context_builder` always re-sorts).
    pub fn snaps(&self) -> &[u64] {
        &self.snaps
    }

    /// Snapshots inherited from previous parents.
    pub fn prior_parent_snaps(&self) -> &[u64] {
        &self.prior_parent_snaps
    }

    /// Child realm inos.
    pub fn children(&self) -> &HashSet<u64> {
        &self.children
    }

    /// Inodes currently holding open capabilities in this realm.
    pub fn inodes_with_caps(&self) -> &HashSet<u64> {
        &self.inodes_with_caps
    }

    /// The last-built snap context, if the cache hasn't been invalidated
    /// (or hasn't been built yet).
    pub fn cached_context(&self) -> Option<&Arc<SnapContext>> {
        self.cached_context.as_ref()
    }

    /// External reference count; the registry's own map entry is not
    /// counted (invariant 6, §3).
    pub fn nref(&self) -> usize {
        self.nref
    }
}
