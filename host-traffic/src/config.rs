use std::time::Duration;

use crate::error::TableError;

pub const DEFAULT_CAPACITY: usize = 8;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_EXPIRE_TICKS: u64 = 120;

/// Sizing and timing knobs for a [`crate::HostTable`]. Fixed for the lifetime
/// of the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TableConfig {
    /// Number of host slots, also the hash bucket count. Power of two.
    pub capacity: usize,
    /// Period of the rate rotation / expiry sweep.
    pub tick_interval: Duration,
    /// A host idle for more than this many ticks is dropped.
    pub expire_ticks: u64,
}

impl TableConfig {
    pub fn validate(&self) -> Result<(), TableError> {
        validate_capacity(self.capacity)?;
        if self.tick_interval.is_zero() {
            return Err(TableError::ZeroTickInterval);
        }
        if self.expire_ticks == 0 {
            return Err(TableError::ZeroExpiry);
        }
        Ok(())
    }

    /// Idle time after which a host expires, in wall-clock terms.
    pub fn expire_after(&self) -> Duration {
        let ticks = u32::try_from(self.expire_ticks).unwrap_or(u32::MAX);
        self.tick_interval.saturating_mul(ticks)
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            expire_ticks: DEFAULT_EXPIRE_TICKS,
        }
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<(), TableError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(TableError::InvalidCapacity { capacity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = TableConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.expire_after(), Duration::from_secs(120));
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        for capacity in [0, 3, 6, 100] {
            let cfg = TableConfig {
                capacity,
                ..TableConfig::default()
            };
            match cfg.validate() {
                Err(TableError::InvalidCapacity { capacity: got }) => assert_eq!(got, capacity),
                other => panic!("expected InvalidCapacity, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_zero_timing() {
        let cfg = TableConfig {
            tick_interval: Duration::ZERO,
            ..TableConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TableError::ZeroTickInterval)));

        let cfg = TableConfig {
            expire_ticks: 0,
            ..TableConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TableError::ZeroExpiry)));
    }
}
