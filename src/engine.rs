//! `SnapshotRealmEngine`: wires the realm registry, cap_snap flush list, and
//! external collaborators together behind the engine's public API (§6
//! Exposed interfaces). `handle_snap`/`update_snap_trace`/`handle_split` are
//! implemented in `handler.rs` as further `impl` blocks on this type.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::capsnap::{self, CapSnap, CapSnapFlushList, FlushState};
use crate::collaborators::{InodeHandle, InodeSource, MdsSessionSource};
use crate::config::EngineConfig;
use crate::context::SnapContext;
use crate::error::{EngineError, Result};
use crate::realm::RealmRef;
use crate::registry::RealmRegistry;

/// The client-side snapshot realm engine.
///
/// One instance owns the entire realm graph for a mount; all public methods
/// are synchronous and may be called from any thread (§5 — this is a
/// blocking-threads design, not an async one).
pub struct SnapshotRealmEngine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: RwLock<RealmRegistry>,
    pub(crate) flush_list: CapSnapFlushList,
    pub(crate) inodes: Arc<dyn InodeSource>,
    pub(crate) sessions: Arc<dyn MdsSessionSource>,
}

impl SnapshotRealmEngine {
    /// Construct a fresh engine with an empty realm registry.
    pub fn new(
        config: EngineConfig,
        inodes: Arc<dyn InodeSource>,
        sessions: Arc<dyn MdsSessionSource>,
    ) -> Self {
        let registry = RealmRegistry::with_capacity(config.realm_capacity_hint);
        Self {
            config,
            registry: RwLock::new(registry),
            flush_list: CapSnapFlushList::new(),
            inodes,
            sessions,
        }
    }

    /// Get-or-create a realm handle with an incremented reference.
    pub fn get_realm(&self, ino: u64) -> Result<RealmRef> {
        self.registry.write().get_or_create(ino)
    }

    /// Release a realm reference previously obtained from this engine.
    pub fn put_realm(&self, realm: RealmRef) {
        self.registry.write().put(realm)
    }

    /// The realm's current snap context, if a cache is present.
    pub fn get_context(&self, realm: RealmRef) -> Option<Arc<SnapContext>> {
        self.registry
            .read()
            .get(realm.ino())
            .and_then(|n| n.cached_context().cloned())
    }

    /// Register that `ino` now holds open capabilities in `realm`, taking a
    /// reference on the realm on the inode's behalf.
    ///
    /// Capability granting itself is an external collaborator's concern
    /// (§1 Out of scope); this is the hook that path calls to keep
    /// `inodes_with_caps` and the realm graph consistent with invariant 5.
    pub fn attach_inode(&self, ino: u64, realm: RealmRef) {
        let mut registry = self.registry.write();
        registry.attach_inode(ino, realm.ino());
        let _ = registry.get_or_create(realm.ino());
    }

    /// Unregister `ino` from whichever realm it currently belongs to,
    /// releasing the reference `attach_inode` took.
    pub fn detach_inode(&self, ino: u64) {
        let mut registry = self.registry.write();
        if let Some(old_ino) = registry.detach_inode(ino) {
            registry.put(RealmRef::new(old_ino));
        }
    }

    /// The realm `ino` currently belongs to, if any.
    pub fn realm_of_inode(&self, ino: u64) -> Option<u64> {
        self.registry.read().realm_of_inode(ino)
    }

    /// §4.5 `queue-cap-snap`.
    pub fn queue_cap_snap(
        &self,
        inode: &dyn InodeHandle,
        context: Arc<SnapContext>,
    ) -> Option<Arc<CapSnap>> {
        capsnap::queue_cap_snap(inode, context, &self.flush_list)
    }

    /// §4.5 `finish-cap-snap`.
    pub fn finish_cap_snap(&self, inode: &dyn InodeHandle, cs: &Arc<CapSnap>) -> FlushState {
        capsnap::finish_cap_snap(inode, cs, &self.flush_list)
    }

    /// §4.5 flush driver: pops the snap-flush list and hands each inode to
    /// one MDS session, reused across the whole batch. Holds no graph lock
    /// during the loop.
    pub fn flush_snaps(&self, mds_id: u64) -> Result<()> {
        let session = self
            .sessions
            .get_session(mds_id)
            .ok_or(EngineError::MissingSession(mds_id))?;

        while let Some(cs) = self.flush_list.pop() {
            if let Err(e) = session.flush_cap_snaps(cs.ino()) {
                log::warn!("flush failed for inode {}: {}", cs.ino(), e);
            }
        }
        Ok(())
    }
}
