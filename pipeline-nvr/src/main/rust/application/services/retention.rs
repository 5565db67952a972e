use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::entities::{total_size, DayFolder};
use crate::domain::errors::Result;
use crate::domain::ports::{DayFolderStore, DiskSpace, MetricsReporter};
use crate::domain::value_objects::{bytes_to_gb, RetentionPolicy};

/// Which rule removed a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepRule {
    Capacity,
    Age,
    FreeSpace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedFolder {
    pub name: String,
    pub size_bytes: u64,
    pub rule: SweepRule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<DeletedFolder>,
    pub failures: u32,
    /// Free-space floor met at the end of the pass
    pub floor_satisfied: bool,
}

impl SweepReport {
    pub fn bytes_freed(&self) -> u64 {
        self.deleted.iter().map(|folder| folder.size_bytes).sum()
    }

    pub fn deleted_names(&self) -> Vec<&str> {
        self.deleted.iter().map(|folder| folder.name.as_str()).collect()
    }

    pub fn deleted_by(&self, rule: SweepRule) -> Vec<&str> {
        self.deleted
            .iter()
            .filter(|folder| folder.rule == rule)
            .map(|folder| folder.name.as_str())
            .collect()
    }
}

/// One pass of the retention rules over the day folders
pub struct RetentionSweeper {
    store: Arc<dyn DayFolderStore>,
    disk: Arc<dyn DiskSpace>,
    root: PathBuf,
    policy: RetentionPolicy,
    metrics: Arc<dyn MetricsReporter>,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn DayFolderStore>,
        disk: Arc<dyn DiskSpace>,
        root: impl Into<PathBuf>,
        policy: RetentionPolicy,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            store,
            disk,
            root: root.into(),
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Capacity limit, then age limit, then the free-space floor
    pub fn sweep(&self, today: NaiveDate) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if let Some(capacity) = self.policy.capacity_bytes() {
            self.enforce_capacity(capacity, &mut report)?;
        }
        if let Some(days) = self.policy.retention_days() {
            let cutoff = today - ChronoDuration::days(i64::from(days));
            self.enforce_age(cutoff, &mut report)?;
        }
        self.enforce_free_space(&mut report)?;

        if !report.deleted.is_empty() {
            self.metrics
                .report_retention_deleted(report.deleted.len() as u64, report.bytes_freed());
            info!(
                folders = report.deleted.len(),
                freed_gb = %format!("{:.2}", bytes_to_gb(report.bytes_freed())),
                "Retention sweep removed recordings"
            );
        }
        Ok(report)
    }

    fn delete(&self, folder: &DayFolder, rule: SweepRule, report: &mut SweepReport) -> bool {
        match self.store.remove(folder) {
            Ok(()) => {
                info!(folder = %folder.name(), size = folder.size_bytes, ?rule, "Deleted day folder");
                report.deleted.push(DeletedFolder {
                    name: folder.name(),
                    size_bytes: folder.size_bytes,
                    rule,
                });
                true
            }
            Err(e) => {
                warn!(folder = %folder.name(), error = %e, ?rule, "Failed to delete day folder");
                report.failures += 1;
                false
            }
        }
    }

    /// Oldest first until the total fits. The newest folder is kept.
    fn enforce_capacity(&self, capacity: u64, report: &mut SweepReport) -> Result<()> {
        let folders = self.store.list()?;
        let mut total = total_size(&folders);
        debug!(total, capacity, folders = folders.len(), "Checking retention capacity");

        let deletable = folders.len().saturating_sub(1);
        for folder in folders.iter().take(deletable) {
            if total <= capacity {
                break;
            }
            if self.delete(folder, SweepRule::Capacity, report) {
                total = total.saturating_sub(folder.size_bytes);
            }
        }
        if total > capacity {
            warn!(total, capacity, "Recordings still exceed the capacity limit");
        }
        Ok(())
    }

    /// A folder's day starts at midnight, which already lies before
    /// `now - days` on the cutoff date, so that date goes too.
    fn enforce_age(&self, cutoff: NaiveDate, report: &mut SweepReport) -> Result<()> {
        for folder in self.store.list()? {
            if folder.date <= cutoff {
                self.delete(&folder, SweepRule::Age, report);
            }
        }
        Ok(())
    }

    /// Delete oldest folders until the floor is met, no folder is left, or
    /// deletions keep failing.
    fn enforce_free_space(&self, report: &mut SweepReport) -> Result<()> {
        let floor = self.policy.min_free_bytes();
        let mut failed: Vec<PathBuf> = Vec::new();

        loop {
            let free = match self.disk.free_bytes(&self.root) {
                Ok(free) => free,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Cannot read free space");
                    return Ok(());
                }
            };
            if free >= floor {
                report.floor_satisfied = true;
                return Ok(());
            }

            let next = self
                .store
                .list()?
                .into_iter()
                .find(|folder| !failed.contains(&folder.path));
            let Some(folder) = next else {
                warn!(
                    free_gb = %format!("{:.2}", bytes_to_gb(free)),
                    floor_gb = %format!("{:.2}", bytes_to_gb(floor)),
                    "Free space below floor and no recordings left to delete"
                );
                return Ok(());
            };

            if !self.delete(&folder, SweepRule::FreeSpace, report) {
                failed.push(folder.path);
                if failed.len() as u32 >= self.policy.max_delete_failures() {
                    warn!(failures = failed.len(), "Giving up on the free-space floor for this pass");
                    return Ok(());
                }
            }
        }
    }
}
