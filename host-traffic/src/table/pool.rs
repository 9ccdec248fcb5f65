use std::{fmt, net::Ipv4Addr};

use chrono::{DateTime, Utc};
use host_traffic_common::{DeviceName, Direction, MacAddr};

/// Stable index of an entry inside the pool. Both indices store these, never
/// copies of the entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HostInfo {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub device: DeviceName,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            mac: MacAddr::ZERO,
            ip: Ipv4Addr::UNSPECIFIED,
            device: DeviceName::EMPTY,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HostStat {
    pub upload_total: u64,
    pub download_total: u64,
    /// Bytes seen during the last completed tick.
    pub upload_speed: u64,
    pub download_speed: u64,
    /// Bytes seen so far in the tick in progress.
    pub upload_speed_current: u64,
    pub download_speed_current: u64,
    /// Table tick of the most recent traffic.
    pub active_tick: u64,
    pub last_seen: DateTime<Utc>,
}

impl HostStat {
    pub(crate) fn add(&mut self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Inbound => {
                self.download_total = self.download_total.saturating_add(bytes);
                self.download_speed_current = self.download_speed_current.saturating_add(bytes);
            }
            Direction::Outbound => {
                self.upload_total = self.upload_total.saturating_add(bytes);
                self.upload_speed_current = self.upload_speed_current.saturating_add(bytes);
            }
        }
    }

    /// Publishes the finished interval and starts a new one.
    pub(crate) fn rotate(&mut self) {
        self.upload_speed = std::mem::take(&mut self.upload_speed_current);
        self.download_speed = std::mem::take(&mut self.download_speed_current);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Entry {
    pub info: HostInfo,
    pub stat: HostStat,
    /// Insertion sequence number, strictly increasing across activations.
    pub seq: u64,
}

/// Fixed arena of entries. Sized once, never grows.
pub(crate) struct EntryPool {
    entries: Box<[Entry]>,
}

impl EntryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![Entry::default(); capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, slot: SlotId) -> &Entry {
        &self.entries[slot.0]
    }

    pub fn get_mut(&mut self, slot: SlotId) -> &mut Entry {
        &mut self.entries[slot.0]
    }

    /// Rebinds a slot to a new host, wiping everything the previous owner left.
    pub fn bind(&mut self, slot: SlotId, info: HostInfo, tick: u64, now: DateTime<Utc>, seq: u64) {
        self.entries[slot.0] = Entry {
            info,
            stat: HostStat {
                active_tick: tick,
                last_seen: now,
                ..HostStat::default()
            },
            seq,
        };
    }
}
