//! Error types for the snapshot realm engine.
//!
//! Each component boundary named in the specification gets its own error
//! kind; none are fatal to the engine (the caller either logs-and-drops or
//! retries at a higher layer).

use thiserror::Error;

/// Errors the engine can report back to a caller.
///
/// Most call sites that encounter one of these do not propagate it as a
/// hard failure: `handle_snap` logs `Malformed`/`OutOfMemory`/`StaleRace`
/// and continues, only `MissingSession` is returned so the caller can
/// decide whether to retry.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The inbound message's encoding was internally inconsistent (length
    /// fields pointing past the buffer, a trace that never reaches a root).
    #[error("malformed snap message: {0}")]
    Malformed(String),

    /// An allocation-backed operation could not proceed. Rust's global
    /// allocator aborts the process on real OOM, so in practice this
    /// variant is raised only by the configured resource guards this crate
    /// controls (see `EngineConfig::max_trace_records`), not by the
    /// allocator itself. See DESIGN.md Open Question (b).
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A split record referenced an inode whose current realm has already
    /// moved to a newer snap epoch. Not an error condition for the caller;
    /// the affected inode is simply skipped.
    #[error("stale race: inode {ino} already in a newer realm (epoch {current_created} > {split_created})")]
    StaleRace {
        /// inode id that lost the race
        ino: u64,
        /// `created` timestamp of the inode's current realm
        current_created: u64,
        /// `created` timestamp of the new split realm
        split_created: u64,
    },

    /// A snap message arrived naming an MDS session this engine has no
    /// handle for.
    #[error("missing MDS session {0}")]
    MissingSession(u64),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
