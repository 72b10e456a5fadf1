//! C5 — Trace/Split Protocol Handler: decodes inbound MDS snap messages and
//! orchestrates realm topology changes, seq updates, and cap_snap
//! queueing/migration.
//!
//! The critical ordering contract (§4.4, §9 "ordering-critical side
//! effects"): cap_snaps are always queued against a realm's *current*
//! cached context before that realm's state is mutated, so writes issued
//! before a seq bump observe the old context and writes issued after
//! observe the new one.

use crate::context_builder::rebuild_subtree;
use crate::engine::SnapshotRealmEngine;
use crate::error::{EngineError, Result};
use crate::realm::RealmRef;
use crate::registry::RealmRegistry;
use crate::wire::{self, Opcode, TraceRecord};

impl SnapshotRealmEngine {
    /// Entry point for an inbound snap message (§6 `handle_snap`).
    ///
    /// `mds_id` identifies which MDS session the message arrived on; it is
    /// not carried in the wire message itself, only in the session layer
    /// that delivered it.
    pub fn handle_snap(&self, mds_id: u64, raw: &[u8]) -> Result<()> {
        if self.sessions.get_session(mds_id).is_none() {
            log::warn!("snap message for unknown mds session {}", mds_id);
            return Err(EngineError::MissingSession(mds_id));
        }

        let message = match wire::decode_snap_message(raw, self.config.max_trace_records) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping malformed snap message from mds {}: {}", mds_id, e);
                return Ok(());
            }
        };

        let result = match message.op {
            Opcode::Split => self.handle_split(
                message.split,
                &message.split_inos,
                &message.split_realms,
                &message.trace,
            ),
            _ => {
                let is_destroy = message.op == Opcode::Destroy;
                self.update_snap_trace(&message.trace, is_destroy)
                    .map(|realm_ref| self.registry.write().put(realm_ref))
            }
        };

        if let Err(e) = result {
            log::warn!("snap message from mds {} not applied: {}", mds_id, e);
        }
        Ok(())
    }

    /// §4.4 `update-snap-trace`. Returns the deepest (first-encountered)
    /// realm in the trace, with one extra reference the caller must `put`.
    pub fn update_snap_trace(&self, records: &[TraceRecord], is_destroy: bool) -> Result<RealmRef> {
        let mut registry = self.registry.write();
        self.apply_trace(&mut registry, records, is_destroy)
    }

    /// The per-record loop shared by plain trace processing and the trailing
    /// trace portion of a split (step 5 of §4.4's split procedure). Assumes
    /// the caller already holds the registry write lock.
    fn apply_trace(
        &self,
        registry: &mut RealmRegistry,
        records: &[TraceRecord],
        is_destroy: bool,
    ) -> Result<RealmRef> {
        if records.is_empty() {
            return Err(EngineError::Malformed("trace has no records".into()));
        }

        let mut invalidate = false;
        let mut first_realm: Option<RealmRef> = None;

        for record in records {
            let realm_ref = registry.get_or_create(record.ino)?;
            if first_realm.is_none() {
                // A second reference, held past this loop and returned to
                // the caller — the loop's own reference is put below like
                // every other record's.
                first_realm = Some(registry.get_or_create(record.ino)?);
            }

            let current_seq = registry.get(record.ino).map(|n| n.seq()).unwrap_or(0);
            let advancing = record.seq > current_seq;

            if advancing && !is_destroy {
                self.queue_cap_snaps_for_realm(registry, record.ino);
            }

            let parent_changed = registry.adjust_parent(record.ino, record.parent)?;
            if parent_changed {
                invalidate = true;
            }

            if advancing {
                if let Some(node) = registry.get_mut(record.ino) {
                    node.seq = record.seq;
                    node.created = record.created;
                    node.parent_since = record.parent_since;
                    node.snaps = record.snaps.clone();
                    node.prior_parent_snaps = record.prior_parent_snaps.clone();
                }
                invalidate = true;
            } else if registry
                .get(record.ino)
                .map(|n| n.cached_context().is_none())
                .unwrap_or(false)
            {
                invalidate = true;
            }

            registry.put(realm_ref);
        }

        if invalidate {
            let root_ino = records.last().expect("checked non-empty above").ino;
            rebuild_subtree(registry, root_ino)?;
        }

        Ok(first_realm.expect("at least one record was processed"))
    }

    /// Queue a cap_snap, under the realm's current cached context, for
    /// every inode presently holding capabilities in it. Must run before
    /// the realm's own fields are mutated (see module docs).
    fn queue_cap_snaps_for_realm(&self, registry: &RealmRegistry, realm_ino: u64) {
        let node = match registry.get(realm_ino) {
            Some(n) => n,
            None => return,
        };
        let context = match node.cached_context() {
            Some(c) => c.clone(),
            None => return,
        };
        let inodes: Vec<u64> = node.inodes_with_caps().iter().copied().collect();

        for ino in inodes {
            if let Some(inode) = self.inodes.lookup(ino) {
                crate::capsnap::queue_cap_snap(inode.as_ref(), context.clone(), &self.flush_list);
            }
        }
    }

    /// §4.4 split handling.
    pub fn handle_split(
        &self,
        split_ino: u64,
        split_inos: &[u64],
        split_realms: &[u64],
        trace: &[TraceRecord],
    ) -> Result<()> {
        let mut registry = self.registry.write();

        // Step 1: reference kept for the duration of this call, released
        // in step 7.
        let new_realm_ref = registry.get_or_create(split_ino)?;

        // Step 2: peek the first trace record for the new realm's `created`
        // without consuming it — the trace is processed in full below.
        let new_created = trace
            .first()
            .map(|r| r.created)
            .ok_or_else(|| EngineError::Malformed("split message has empty trace".into()))?;

        // Step 3: detach split inodes from their current realm, queueing a
        // cap_snap under the OLD realm's context before any migration.
        let mut migrated: Vec<(u64, u64)> = Vec::new();
        for &ino in split_inos {
            let inode = match self.inodes.lookup(ino) {
                Some(i) => i,
                None => continue,
            };

            let old_realm_ino = match registry.realm_of_inode(ino) {
                Some(r) => r,
                None => continue,
            };

            let old_created = registry.get(old_realm_ino).map(|n| n.created()).unwrap_or(0);
            if old_created > new_created {
                let race = EngineError::StaleRace {
                    ino,
                    current_created: old_created,
                    split_created: new_created,
                };
                log::debug!("skipping split inode: {}", race);
                continue;
            }

            let old_context = registry
                .get(old_realm_ino)
                .and_then(|n| n.cached_context().cloned());

            registry.detach_inode(ino);
            if let Some(ctx) = old_context {
                crate::capsnap::queue_cap_snap(inode.as_ref(), ctx, &self.flush_list);
            }

            migrated.push((ino, old_realm_ino));
        }

        // Step 4: reparent split-out child realms onto the new realm.
        for &child_ino in split_realms {
            let child_ref = registry.get_or_create(child_ino)?;
            registry.adjust_parent(child_ino, split_ino)?;
            registry.put(child_ref);
        }

        // Step 5: run the normal trace processing.
        self.apply_trace(&mut registry, trace, false)
            .map(|realm_ref| registry.put(realm_ref))?;

        // Step 6: attach migrated inodes to the new realm.
        for (ino, old_realm_ino) in migrated {
            registry.put(RealmRef::new(old_realm_ino));
            registry.attach_inode(ino, split_ino);
            registry.get_or_create(split_ino)?;
        }

        // Step 7: release the reference taken in step 1.
        registry.put(new_realm_ref);

        Ok(())
    }
}
