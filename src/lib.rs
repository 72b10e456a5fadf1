//! Client-side snapshot realm engine.
//!
//! Maintains the hierarchy of snapshot realms a distributed filesystem
//! client's metadata service announces, derives each realm's snap context
//! (the set of snapshot IDs an outgoing write must carry), and manages
//! capability snapshots (`cap_snap`): per-inode, per-snapshot metadata
//! captures awaiting flush back to the metadata service.
//!
//! The engine owns exactly this: realm graph maintenance, snap-context
//! derivation, the snap-trace/split wire protocol, and the cap_snap
//! lifecycle. The wire messenger, inode cache, MDS session layer, and
//! object-storage client are external collaborators, reached only through
//! the traits in [`collaborators`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rust_2018_idioms)]

pub mod capsnap;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod context_builder;
pub mod engine;
pub mod error;
pub mod handler;
pub mod realm;
pub mod registry;
pub mod wire;

pub use config::EngineConfig;
pub use context::SnapContext;
pub use engine::SnapshotRealmEngine;
pub use error::{EngineError, Result};
pub use realm::{RealmNode, RealmRef};

/// Re-export of the commonly needed types for downstream crates wiring up
/// an engine against their own inode cache and MDS session layer.
pub mod prelude {
    pub use crate::capsnap::{CapSnap, FlushState};
    pub use crate::collaborators::{InodeHandle, InodeSource, MdsSession, MdsSessionSource};
    pub use crate::config::EngineConfig;
    pub use crate::context::SnapContext;
    pub use crate::engine::SnapshotRealmEngine;
    pub use crate::error::{EngineError, Result};
    pub use crate::realm::RealmRef;
}
