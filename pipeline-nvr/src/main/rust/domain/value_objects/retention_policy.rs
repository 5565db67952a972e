use std::time::Duration;

use crate::domain::errors::{DomainError, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Disk retention settings for the recording tree
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    check_interval: Duration,
    retention_days: Option<u32>,
    capacity_gb: Option<f64>,
    min_free_space_gb: f64,
    max_delete_failures: u32,
}

impl RetentionPolicy {
    pub fn new(
        check_interval: Duration,
        retention_days: Option<u32>,
        capacity_gb: Option<f64>,
        min_free_space_gb: f64,
    ) -> Result<Self> {
        if check_interval.is_zero() {
            return Err(DomainError::InvalidConfiguration(
                "disk check interval cannot be zero".to_string(),
            ));
        }
        if capacity_gb.map(|gb| gb <= 0.0).unwrap_or(false) {
            return Err(DomainError::InvalidConfiguration(
                "retention capacity must be positive".to_string(),
            ));
        }
        if min_free_space_gb < 0.0 {
            return Err(DomainError::InvalidConfiguration(
                "minimum free space cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            check_interval,
            retention_days: retention_days.filter(|days| *days > 0),
            capacity_gb,
            min_free_space_gb,
            max_delete_failures: 3,
        })
    }

    pub fn with_max_delete_failures(mut self, failures: u32) -> Self {
        self.max_delete_failures = failures.max(1);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn retention_days(&self) -> Option<u32> {
        self.retention_days
    }

    pub fn capacity_bytes(&self) -> Option<u64> {
        self.capacity_gb.map(gb_to_bytes)
    }

    pub fn min_free_bytes(&self) -> u64 {
        gb_to_bytes(self.min_free_space_gb)
    }

    /// Failed deletions tolerated by one free-space pass before it gives up
    pub fn max_delete_failures(&self) -> u32 {
        self.max_delete_failures
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3600),
            retention_days: Some(30),
            capacity_gb: Some(500.0),
            min_free_space_gb: 5.0,
            max_delete_failures: 3,
        }
    }
}

pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB) as u64
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}
