//! Trait boundaries toward the systems this engine does not own: the inode
//! cache and the MDS session layer (§1 Out of scope). Production callers
//! implement these against their real inode/session types; tests implement
//! them against small in-memory mocks.

use std::sync::Arc;

use crate::capsnap::CapSnap;
use crate::error::EngineError;

/// Capability bit for an open write cap, per §4.5's "active writer holds a
/// write cap" check in `queue_cap_snap`.
pub const CAP_FILE_WR: u32 = 1 << 1;

/// A view onto a single cached inode.
///
/// Implementations are responsible for their own internal locking (§5: "the
/// per-inode lock... always acquired inside the realm-graph read/write
/// lock") — this crate never locks an inode itself, it only calls through
/// this trait.
pub trait InodeHandle: Send + Sync {
    /// The inode's stable identifier.
    fn ino(&self) -> u64;
    /// Capability bits currently in active use (e.g. an open writer).
    fn caps_used(&self) -> u32;
    /// Capability bits currently issued to this client for the inode.
    fn caps_issued(&self) -> u32;
    /// Current file size.
    fn size(&self) -> u64;
    /// Current modification time.
    fn mtime(&self) -> u64;
    /// Current access time.
    fn atime(&self) -> u64;
    /// Current change time.
    fn ctime(&self) -> u64;
    /// Current time-warp sequence number.
    fn time_warp_seq(&self) -> u64;

    /// Read the head dirty-page counter and reset it to zero in one step.
    fn take_wrbuffer_ref_head(&self) -> u32;

    /// Whether a cap_snap is already pending for this inode.
    fn has_pending_cap_snap(&self) -> bool;

    /// Append a newly queued cap_snap to this inode's list.
    fn push_cap_snap(&self, cap_snap: Arc<CapSnap>);
}

/// Looks up inodes by identity. The real implementation is the client's
/// inode cache; this crate only ever calls `lookup`.
pub trait InodeSource: Send + Sync {
    fn lookup(&self, ino: u64) -> Option<Arc<dyn InodeHandle>>;
}

/// A single MDS session, reused across a `flush_snaps` batch.
pub trait MdsSession: Send + Sync {
    fn flush_cap_snaps(&self, ino: u64) -> Result<(), EngineError>;
}

/// Looks up MDS sessions by id.
pub trait MdsSessionSource: Send + Sync {
    fn get_session(&self, mds_id: u64) -> Option<Arc<dyn MdsSession>>;
}
