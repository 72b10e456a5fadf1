//! C6 — Cap-Snap Lifecycle: per-inode snapshot captures, pending-writer
//! coordination, and the snap-flush list.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collaborators::{InodeHandle, CAP_FILE_WR};
use crate::context::SnapContext;

/// Metadata frozen from the inode at `finish_cap_snap` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrozenMetadata {
    /// File size at freeze time.
    pub size: u64,
    /// Modification time at freeze time.
    pub mtime: u64,
    /// Access time at freeze time.
    pub atime: u64,
    /// Change time at freeze time.
    pub ctime: u64,
    /// Time-warp sequence number at freeze time.
    pub time_warp_seq: u64,
}

#[derive(Debug)]
struct CapSnapState {
    dirty: u32,
    writing: bool,
    frozen: Option<FrozenMetadata>,
}

/// A single per-inode, per-snapshot capability capture.
///
/// `context`, `follows`, and `issued` are fixed at queue time; `dirty`,
/// `writing`, and the frozen metadata mutate as the cap_snap moves through
/// its lifecycle, so they live behind a small mutex rather than requiring
/// `&mut CapSnap` (the inode's own cap_snap list holds shared `Arc`s).
#[derive(Debug)]
pub struct CapSnap {
    ino: u64,
    context: Arc<SnapContext>,
    follows: u64,
    issued: u32,
    state: Mutex<CapSnapState>,
}

impl CapSnap {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// The snap context this cap_snap was captured under.
    pub fn context(&self) -> &Arc<SnapContext> {
        &self.context
    }

    /// The snapshot preceding this cap_snap's context (`context.seq - 1`).
    pub fn follows(&self) -> u64 {
        self.follows
    }

    /// Issued-caps bitmask snapshotted at queue time.
    pub fn issued(&self) -> u32 {
        self.issued
    }

    /// Dirty page count transferred from the inode's head counter.
    pub fn dirty(&self) -> u32 {
        self.state.lock().dirty
    }

    /// Whether a write is still in flight against this cap_snap.
    pub fn writing(&self) -> bool {
        self.state.lock().writing
    }

    /// Metadata frozen by `finish_cap_snap`, if it has run.
    pub fn frozen(&self) -> Option<FrozenMetadata> {
        self.state.lock().frozen
    }

    /// Called by the writer that was pending when this cap_snap was queued,
    /// once its write completes.
    pub fn clear_writing(&self) {
        self.state.lock().writing = false;
    }
}

/// Outcome of `finish_cap_snap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Dirty pages are still outstanding; the cap_snap stays on the inode's
    /// list awaiting writeback completion.
    NotYetFlushable,
    /// The cap_snap was pushed onto the engine's snap-flush list.
    Flushable,
}

/// Allocate and queue a cap_snap for `inode` under `context`.
///
/// Returns `None` if a cap_snap is already pending for this inode — per
/// §4.5, no new writes are permitted to start while one is pending, so a
/// second pending cap_snap is never actually needed; the caller discards
/// the fresh allocation.
pub fn queue_cap_snap(
    inode: &dyn InodeHandle,
    context: Arc<SnapContext>,
    flush_list: &CapSnapFlushList,
) -> Option<Arc<CapSnap>> {
    if inode.has_pending_cap_snap() {
        log::debug!(
            "cap_snap already pending for inode {}, discarding new allocation",
            inode.ino()
        );
        return None;
    }

    let follows = context.seq().saturating_sub(1);
    let issued = inode.caps_issued();
    let dirty = inode.take_wrbuffer_ref_head();
    let writing = (inode.caps_used() & CAP_FILE_WR) != 0;

    let cs = Arc::new(CapSnap {
        ino: inode.ino(),
        context,
        follows,
        issued,
        state: Mutex::new(CapSnapState {
            dirty,
            writing,
            frozen: None,
        }),
    });

    inode.push_cap_snap(cs.clone());
    log::debug!(
        "queued cap_snap for inode {} (follows={}, writing={})",
        cs.ino,
        cs.follows,
        writing
    );

    if !writing {
        finish_cap_snap(inode, &cs, flush_list);
    }

    Some(cs)
}

/// Finalize a cap_snap once no writer is pending against it.
///
/// Freezes the inode's current metadata, then either leaves the cap_snap on
/// the inode's list (dirty pages outstanding) or hands it to the flush list.
pub fn finish_cap_snap(
    inode: &dyn InodeHandle,
    cs: &Arc<CapSnap>,
    flush_list: &CapSnapFlushList,
) -> FlushState {
    let mut state = cs.state.lock();
    debug_assert!(!state.writing, "finish_cap_snap called while writing");

    state.frozen = Some(FrozenMetadata {
        size: inode.size(),
        mtime: inode.mtime(),
        atime: inode.atime(),
        ctime: inode.ctime(),
        time_warp_seq: inode.time_warp_seq(),
    });

    if state.dirty > 0 {
        drop(state);
        return FlushState::NotYetFlushable;
    }
    drop(state);

    flush_list.push(cs.clone());
    FlushState::Flushable
}

/// The engine's snap-flush list: a plain FIFO queue of cap_snaps awaiting
/// an MDS flush, protected by its own mutex. Never held across a call that
/// may block on network or page I/O (§5).
#[derive(Debug, Default)]
pub struct CapSnapFlushList {
    queue: Mutex<VecDeque<Arc<CapSnap>>>,
}

impl CapSnapFlushList {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, cap_snap: Arc<CapSnap>) {
        self.queue.lock().push_back(cap_snap);
    }

    pub fn pop(&self) -> Option<Arc<CapSnap>> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct MockInode {
        ino: u64,
        caps_used: AtomicU32,
        caps_issued: AtomicU32,
        wrbuffer: AtomicU32,
        pending: AtomicBool,
        pushed: Mutex<Vec<Arc<CapSnap>>>,
    }

    impl InodeHandle for MockInode {
        fn ino(&self) -> u64 {
            self.ino
        }
        fn caps_used(&self) -> u32 {
            self.caps_used.load(Ordering::SeqCst)
        }
        fn caps_issued(&self) -> u32 {
            self.caps_issued.load(Ordering::SeqCst)
        }
        fn size(&self) -> u64 {
            1024
        }
        fn mtime(&self) -> u64 {
            1
        }
        fn atime(&self) -> u64 {
            2
        }
        fn ctime(&self) -> u64 {
            3
        }
        fn time_warp_seq(&self) -> u64 {
            4
        }
        fn take_wrbuffer_ref_head(&self) -> u32 {
            self.wrbuffer.swap(0, Ordering::SeqCst)
        }
        fn has_pending_cap_snap(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }
        fn push_cap_snap(&self, cap_snap: Arc<CapSnap>) {
            self.pending.store(true, Ordering::SeqCst);
            self.pushed.lock().push(cap_snap);
        }
    }

    #[test]
    fn no_pending_writer_finishes_immediately_and_flushes() {
        let inode = MockInode {
            ino: 1,
            ..Default::default()
        };
        let flush_list = CapSnapFlushList::new();
        let ctx = SnapContext::new(6, vec![20, 10]).into_shared();

        let cs = queue_cap_snap(&inode, ctx, &flush_list).unwrap();
        assert!(!cs.writing());
        assert_eq!(cs.follows(), 5);
        assert!(cs.frozen().is_some());
        assert_eq!(flush_list.len(), 1);
    }

    #[test]
    fn active_writer_defers_finish() {
        let inode = MockInode {
            ino: 1,
            ..Default::default()
        };
        inode.caps_used.store(CAP_FILE_WR, Ordering::SeqCst);
        let flush_list = CapSnapFlushList::new();
        let ctx = SnapContext::new(6, vec![20, 10]).into_shared();

        let cs = queue_cap_snap(&inode, ctx, &flush_list).unwrap();
        assert!(cs.writing());
        assert!(flush_list.is_empty());

        cs.clear_writing();
        let state = finish_cap_snap(&inode, &cs, &flush_list);
        assert_eq!(state, FlushState::Flushable);
        assert_eq!(flush_list.len(), 1);
    }

    #[test]
    fn dirty_pages_defer_flush_until_writeback_completes() {
        let inode = MockInode {
            ino: 1,
            ..Default::default()
        };
        inode.wrbuffer.store(3, Ordering::SeqCst);
        let flush_list = CapSnapFlushList::new();
        let ctx = SnapContext::new(6, vec![20, 10]).into_shared();

        let cs = queue_cap_snap(&inode, ctx, &flush_list).unwrap();
        assert!(flush_list.is_empty());
        assert_eq!(cs.dirty(), 3);
    }

    #[test]
    fn second_pending_cap_snap_is_discarded() {
        let inode = MockInode {
            ino: 1,
            ..Default::default()
        };
        inode.pending.store(true, Ordering::SeqCst);
        let flush_list = CapSnapFlushList::new();
        let ctx = SnapContext::new(6, vec![20, 10]).into_shared();

        let cs = queue_cap_snap(&inode, ctx, &flush_list);
        assert!(cs.is_none());
    }
}
