//! Retention
//!
//! Prunes chains whose full backup is older than the retention window once a
//! newer full exists, plus stale pre-restore snapshots. Every deletion goes
//! through the [`DeletionGuard`], so retention can never remove the last
//! complete chain.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::chain::ChainIndex;
use super::guard::DeletionGuard;
use super::manifest::ManifestStore;
use crate::error::BackupResult;
use crate::models::{BackupKind, BackupManifest, BackupRecord};

/// What a prune run did
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Records removed, including cascaded dependents
    pub deleted: Vec<BackupRecord>,
    /// Candidates the guard refused or that failed to delete, with the reason
    pub skipped: Vec<(BackupRecord, String)>,
}

impl PruneReport {
    /// Bytes freed by the deleted records
    pub fn freed_bytes(&self) -> u64 {
        self.deleted.iter().map(|r| r.size).sum()
    }
}

/// Applies the retention window
pub struct RetentionCleaner<'a> {
    store: &'a ManifestStore,
}

impl<'a> RetentionCleaner<'a> {
    pub fn new(store: &'a ManifestStore) -> Self {
        Self { store }
    }

    /// Records a prune with `retention_period` would start from, oldest first
    ///
    /// Chains are represented by their full backup; deleting it cascades.
    pub fn candidates(
        manifest: &BackupManifest,
        retention_period: Duration,
        now: DateTime<Utc>,
    ) -> Vec<BackupRecord> {
        let cutoff = now - retention_period;
        let index = ChainIndex::new(manifest);
        let newest_chain = manifest.newest_full().and_then(|r| r.chain_id);

        manifest
            .records
            .iter()
            .filter(|r| r.created_at < cutoff)
            .filter(|r| match r.kind {
                BackupKind::Full => r.chain_id != newest_chain && index.has_newer_full(r.id),
                BackupKind::PreRestore => true,
                BackupKind::Incremental => false,
            })
            .cloned()
            .collect()
    }

    /// Delete everything older than `retention_period` that may go
    pub fn prune(&self, retention_period: Duration) -> BackupResult<PruneReport> {
        let manifest = self.store.load()?;
        let candidates = Self::candidates(&manifest, retention_period, Utc::now());

        if candidates.is_empty() {
            debug!("Nothing to prune");
            return Ok(PruneReport::default());
        }

        let guard = DeletionGuard::new(self.store);
        let mut report = PruneReport::default();

        for candidate in candidates {
            match guard.delete(candidate.id) {
                Ok(removed) => report.deleted.extend(removed),
                Err(e) => {
                    warn!(backup = %candidate.id, error = %e, "Retention skipped backup");
                    report.skipped.push((candidate, e.to_string()));
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            skipped = report.skipped.len(),
            freed = report.freed_bytes(),
            "Retention finished"
        );
        Ok(report)
    }
}
