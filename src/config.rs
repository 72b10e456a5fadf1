//! Tunables for the snapshot realm engine.

/// Configuration for a [`crate::engine::SnapshotRealmEngine`].
///
/// Mirrors the shape of the teacher crate's per-module config structs
/// (`SnapshotConfig`, `JournalConfig`): plain data, constructed once, with a
/// sensible `Default`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity hint for the realm registry's backing map. Purely an
    /// allocation-sizing hint; the registry grows past this without error.
    pub realm_capacity_hint: usize,

    /// Upper bound on the number of records a single trace may contain.
    /// A trace claiming more than this is rejected with `OutOfMemory`
    /// rather than iterated, guarding against a corrupt or hostile
    /// `trace_len` driving unbounded allocation.
    pub max_trace_records: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            realm_capacity_hint: 64,
            max_trace_records: 4096,
        }
    }
}
