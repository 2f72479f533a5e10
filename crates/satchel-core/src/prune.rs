use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::crypto::object_id::ObjectId;
use crate::error::Result;
use crate::snapshot::manager::SnapshotManager;
use crate::snapshot::Snapshot;
use crate::storage::{Backend, ObjectHandle, ObjectKind};

/// Distinct recent calendar days whose newest snapshot is always kept.
const KEEP_RECENT_DAYS: usize = 3;

/// Retention keeps one snapshot per ISO week for this many weeks back,
/// counting the current week.
const KEEP_WEEKS: i64 = 2;

#[derive(Debug, Default, Clone)]
pub struct PruneStats {
    pub snapshots_kept: usize,
    pub snapshots_deleted: usize,
    pub corrupt_deleted: usize,
    pub blobs_deleted: usize,
}

/// Retention policy and garbage collection over one repository scope.
///
/// Bounded growth with daily granularity for the recent past and weekly
/// granularity further back, in the spirit of grandfather-father-son
/// rotation.
pub struct Pruner {
    backend: Arc<dyn Backend>,
    scope: String,
}

impl Pruner {
    pub fn new(backend: Arc<dyn Backend>, scope: &str) -> Self {
        Self {
            backend,
            scope: scope.to_string(),
        }
    }

    /// Run one retention pass:
    ///
    /// 1. Load every snapshot on the backend. One that fails to decrypt or
    ///    parse is deleted immediately — it is immutable, so the failure will
    ///    not self-heal — and excluded from retention. Any other read failure
    ///    aborts the pass so it can be retried wholesale.
    /// 2. Compute the keep-set by token and delete everything else.
    /// 3. Delete every backend blob referenced by no kept snapshot.
    pub fn prune(&self, snapshots: &mut SnapshotManager, now: DateTime<Utc>) -> Result<PruneStats> {
        let mut stats = PruneStats::default();

        let handles = snapshots.list_handles()?;
        let mut loaded: Vec<(ObjectHandle, Snapshot)> = Vec::with_capacity(handles.len());
        for handle in handles {
            match snapshots.load_snapshot(&handle) {
                Ok(snapshot) => loaded.push((handle, snapshot)),
                Err(e) if e.is_corruption() => {
                    warn!(snapshot = %handle.id, "deleting corrupt snapshot: {e}");
                    snapshots.remove_snapshot(&handle)?;
                    stats.corrupt_deleted += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let tokens: Vec<u64> = loaded.iter().map(|(_, s)| s.token).collect();
        let keep = compute_keep_set(&tokens, now);

        let mut kept_blob_ids: HashSet<ObjectId> = HashSet::new();
        for (handle, snapshot) in &loaded {
            if keep.contains(&snapshot.token) {
                stats.snapshots_kept += 1;
                kept_blob_ids.extend(snapshot.referenced_blob_ids());
            } else {
                debug!(snapshot = %handle.id, token = snapshot.token, "pruning snapshot");
                snapshots.remove_snapshot(handle)?;
                stats.snapshots_deleted += 1;
            }
        }

        stats.blobs_deleted = self.collect_garbage(&kept_blob_ids)?;

        info!(
            kept = stats.snapshots_kept,
            deleted = stats.snapshots_deleted,
            corrupt = stats.corrupt_deleted,
            blobs_deleted = stats.blobs_deleted,
            "prune pass complete"
        );
        Ok(stats)
    }

    /// Delete every backend blob whose id is not in `referenced`.
    fn collect_garbage(&self, referenced: &HashSet<ObjectId>) -> Result<usize> {
        let prefix = ObjectHandle::list_prefix(&self.scope, ObjectKind::Blob);
        let mut deleted = 0;
        for info in self.backend.list(&prefix)? {
            let Some(handle) = ObjectHandle::parse_key(&info.key) else {
                continue;
            };
            if handle.kind == ObjectKind::Blob && !referenced.contains(&handle.id) {
                debug!(blob = %handle.id, "deleting unreferenced blob");
                self.backend.delete(&info.key)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Decide which snapshot tokens survive retention.
///
/// Keep-set: the newest snapshot of each of the 3 most recent distinct
/// calendar days, plus the newest snapshot of the current ISO week and of
/// the previous ISO week. Fewer than 3 snapshots total are always all kept.
pub fn compute_keep_set(tokens: &[u64], now: DateTime<Utc>) -> HashSet<u64> {
    if tokens.len() < KEEP_RECENT_DAYS {
        return tokens.iter().copied().collect();
    }

    // Newest first; bucket rules keep the first hit per bucket.
    let mut sorted: Vec<u64> = tokens.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut keep: HashSet<u64> = HashSet::new();

    let mut seen_days: HashSet<(i32, u32)> = HashSet::new();
    for &token in &sorted {
        let Some(time) = token_time(token) else {
            continue;
        };
        let day = daily_key(&time);
        if seen_days.contains(&day) {
            continue;
        }
        if seen_days.len() < KEEP_RECENT_DAYS {
            keep.insert(token);
        }
        seen_days.insert(day);
        if seen_days.len() >= KEEP_RECENT_DAYS {
            break;
        }
    }

    for weeks_back in 0..KEEP_WEEKS {
        let anchor = now - Duration::weeks(weeks_back);
        let wanted = weekly_key(&anchor);
        let hit = sorted.iter().find(|&&token| {
            token_time(token).is_some_and(|time| weekly_key(&time) == wanted)
        });
        if let Some(&token) = hit {
            keep.insert(token);
        }
    }

    keep
}

fn token_time(token: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(token as i64).single()
}

fn daily_key(time: &DateTime<Utc>) -> (i32, u32) {
    (time.year(), time.ordinal())
}

fn weekly_key(time: &DateTime<Utc>) -> (i32, u32) {
    let week = time.iso_week();
    (week.year(), week.week())
}
