//! Data models for the backup engine
//!
//! - `ids`: strongly-typed record and chain identifiers
//! - `record`: one backup artifact and its chain linkage
//! - `manifest`: the persisted history plus baseline fingerprints

pub mod ids;
pub mod manifest;
pub mod record;

pub use ids::{BackupId, ChainId};
pub use manifest::{BackupManifest, Fingerprints};
pub use record::{BackupKind, BackupRecord};
