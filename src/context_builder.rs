//! C4 — Context Builder: derives a realm's snap context from its own snaps
//! plus its parent's context, and rebuilds whole subtrees top-down.

use crate::error::{EngineError, Result};
use crate::registry::RealmRegistry;

/// Build (or validate the cache of) a single realm's snap context.
///
/// Recurses into the parent first if the parent has no cached context yet
/// (depth equals directory nesting — see the Design Notes on recursion
/// depth in DESIGN.md). Idempotent: if the existing cache is still valid
/// per invariant 3, this is a no-op.
pub fn build_context(registry: &mut RealmRegistry, ino: u64) -> Result<()> {
    let parent_ino = registry
        .get(ino)
        .ok_or_else(|| EngineError::Malformed(format!("build_context: unknown realm {}", ino)))?
        .parent_ino();

    if let Some(pino) = parent_ino {
        let parent_has_context = registry
            .get(pino)
            .map(|p| p.cached_context().is_some())
            .unwrap_or(false);
        if !parent_has_context {
            build_context(registry, pino)?;
        }
    }

    if is_cache_still_valid(registry, ino, parent_ino) {
        return Ok(());
    }

    let node = registry.get(ino).expect("realm vanished mid-build");
    let seq = node.seq();
    let mut snaps = node.snaps().to_vec();
    let mut prior = node.prior_parent_snaps().to_vec();
    let parent_since = node.parent_since();

    let parent_ctx = parent_ino.and_then(|p| registry.get(p)).and_then(|p| p.cached_context().cloned());

    let mut combined = Vec::with_capacity(
        parent_ctx.as_ref().map(|c| c.snaps().len()).unwrap_or(0) + snaps.len() + prior.len(),
    );

    let mut new_seq = seq;
    if let Some(ref pctx) = parent_ctx {
        combined.extend(pctx.snaps().iter().copied().filter(|&s| s >= parent_since));
        if pctx.seq() > new_seq {
            new_seq = pctx.seq();
        }
    }
    combined.append(&mut snaps);
    combined.append(&mut prior);

    // Descending order; snapshot IDs are unique so no ties to break.
    combined.sort_unstable_by(|a, b| b.cmp(a));

    let new_ctx = crate::context::SnapContext::new(new_seq, combined).into_shared();

    let node = registry
        .get_mut(ino)
        .ok_or_else(|| EngineError::Malformed(format!("build_context: realm {} vanished", ino)))?;
    node.cached_context = Some(new_ctx);

    log::debug!("rebuilt context for realm {} (seq={})", ino, new_seq);
    Ok(())
}

fn is_cache_still_valid(registry: &RealmRegistry, ino: u64, parent_ino: Option<u64>) -> bool {
    let node = match registry.get(ino) {
        Some(n) => n,
        None => return false,
    };
    let ctx = match node.cached_context() {
        Some(c) => c,
        None => return false,
    };
    if ctx.seq() < node.seq() {
        return false;
    }
    if let Some(pino) = parent_ino {
        if let Some(parent_seq) = registry.get(pino).and_then(|p| p.cached_context()).map(|c| c.seq()) {
            if ctx.seq() < parent_seq {
                return false;
            }
        }
    }
    true
}

/// Rebuild a realm's context, then recurse into every child.
///
/// Top-down traversal is what makes this correct (invariant 3): a child is
/// only visited after its parent's context has already been rebuilt, so it
/// always reads an up-to-date parent.
pub fn rebuild_subtree(registry: &mut RealmRegistry, ino: u64) -> Result<()> {
    build_context(registry, ino)?;
    let children: Vec<u64> = registry
        .get(ino)
        .map(|n| n.children().iter().copied().collect())
        .unwrap_or_default();
    for child in children {
        rebuild_subtree(registry, child)?;
    }
    Ok(())
}
