//! Bounded per-host traffic table.
//!
//! A fixed arena of entries is threaded through three indices at once: a
//! chained hash index keyed by hardware address, an insertion-ordered
//! eviction queue, and a free-slot stack. Every slot is either free (only on
//! the free stack) or active (in both the hash index and the queue). All
//! structural changes happen under one lock, so readers never see a slot in
//! one index and not the other.

mod eviction_queue;
mod free_list;
mod key_index;
mod pool;

use std::{
    net::Ipv4Addr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use host_traffic_common::{DeviceName, Direction, MacAddr};
use tracing::{debug, trace};

use crate::{
    config::{TableConfig, validate_capacity},
    error::TableError,
};

pub use pool::{HostInfo, HostStat, SlotId};

use eviction_queue::EvictionQueue;
use free_list::FreeList;
use key_index::KeyIndex;
use pool::EntryPool;

/// One observed frame, as handed over by the capture front end.
#[derive(Clone, Copy, Debug)]
pub struct Observation<'a> {
    /// Raw hardware address; anything other than six bytes is rejected.
    pub mac: &'a [u8],
    pub ip: Ipv4Addr,
    /// Interface the host was seen on. Empty keeps the previous name.
    pub device: &'a str,
    pub direction: Direction,
    pub bytes: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObserveStatus {
    /// A new entry was bound for this address.
    Created,
    /// The address was already tracked.
    Updated,
    /// Malformed or sentinel address; nothing was touched.
    Rejected,
}

/// Point-in-time copy of one active entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HostSnapshot {
    pub slot: SlotId,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub device: DeviceName,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub download_total: u64,
    pub upload_total: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickSummary {
    /// Entries whose rates were rolled over.
    pub rotated: usize,
    /// Entries dropped for being idle too long.
    pub expired: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SlotState {
    Free,
    Active,
}

struct TableState {
    pool: EntryPool,
    free: FreeList,
    index: KeyIndex,
    queue: EvictionQueue,
    slots: Box<[SlotState]>,
    tick: u64,
    next_seq: u64,
    expire_ticks: u64,
}

pub struct HostTable {
    state: Mutex<TableState>,
}

impl HostTable {
    /// Builds a table with the default timing and the given capacity.
    pub fn new(capacity: usize) -> Result<Self, TableError> {
        Self::with_config(&TableConfig {
            capacity,
            ..TableConfig::default()
        })
    }

    pub fn with_config(cfg: &TableConfig) -> Result<Self, TableError> {
        validate_capacity(cfg.capacity)?;
        if cfg.expire_ticks == 0 {
            return Err(TableError::ZeroExpiry);
        }
        let capacity = cfg.capacity;
        Ok(Self {
            state: Mutex::new(TableState {
                pool: EntryPool::new(capacity),
                free: FreeList::new(capacity),
                index: KeyIndex::new(capacity),
                queue: EvictionQueue::new(capacity),
                slots: vec![SlotState::Free; capacity].into_boxed_slice(),
                tick: 0,
                next_seq: 0,
                expire_ticks: cfg.expire_ticks,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        // No table operation can panic between two link updates.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one frame: binds a slot for a new address (evicting the oldest
    /// insertion when full), then refreshes the host and adds the bytes.
    pub fn observe(&self, obs: Observation<'_>) -> ObserveStatus {
        let Ok(mac) = MacAddr::try_from(obs.mac) else {
            trace!(len = obs.mac.len(), "rejecting malformed hardware address");
            return ObserveStatus::Rejected;
        };
        if !mac.is_valid() {
            trace!(%mac, "rejecting sentinel hardware address");
            return ObserveStatus::Rejected;
        }
        let device = DeviceName::new(obs.device);
        let now = Utc::now();

        let mut guard = self.lock();
        let state = &mut *guard;
        let (slot, status) = match state.index.find(&state.pool, &mac) {
            Some(slot) => (slot, ObserveStatus::Updated),
            None => match state.insert(mac, obs.ip, device, now) {
                Some(slot) => (slot, ObserveStatus::Created),
                None => return ObserveStatus::Rejected,
            },
        };
        state.record(slot, obs.ip, device, obs.direction, obs.bytes, now);
        status
    }

    /// Adds traffic to an already-tracked host. Unknown addresses are ignored
    /// and reported as `false`.
    pub fn update_stats(
        &self,
        mac: &MacAddr,
        ip: Ipv4Addr,
        device: &str,
        direction: Direction,
        bytes: u64,
    ) -> bool {
        let device = DeviceName::new(device);
        let now = Utc::now();
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.index.find(&state.pool, mac) {
            Some(slot) => {
                state.record(slot, ip, device, direction, bytes, now);
                true
            }
            None => false,
        }
    }

    pub fn slot_of(&self, mac: &MacAddr) -> Option<SlotId> {
        let state = self.lock();
        state.index.find(&state.pool, mac)
    }

    pub fn lookup(&self, mac: &MacAddr) -> Option<HostSnapshot> {
        let state = self.lock();
        let slot = state.index.find(&state.pool, mac)?;
        Some(state.snapshot_of(slot))
    }

    /// Frees `slot`. Returns false, and does nothing, if it was not active.
    pub fn remove(&self, slot: SlotId) -> bool {
        self.lock().remove_slot(slot)
    }

    /// Closes the current interval: drops hosts idle for longer than the
    /// expiry, and publishes the interval's byte counts as the rate of every
    /// survivor.
    pub fn tick(&self) -> TickSummary {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.tick += 1;

        let mut summary = TickSummary::default();
        let mut cursor = state.queue.front();
        while let Some(slot) = cursor {
            // Grab the link first; `slot` may be unlinked below.
            cursor = state.queue.next_of(slot);

            let entry = state.pool.get(slot);
            let idle = state.tick.saturating_sub(entry.stat.active_tick);
            if idle > state.expire_ticks {
                let mac = entry.info.mac;
                state.remove_slot(slot);
                debug!(%mac, slot = %slot, idle, "expired idle host");
                summary.expired += 1;
                continue;
            }
            state.pool.get_mut(slot).stat.rotate();
            summary.rotated += 1;
        }
        summary
    }

    /// Lazily walks active hosts from newest to oldest insertion, taking the
    /// lock once per item.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            table: self,
            cursor: Cursor::Start,
        }
    }

    /// Copies every active host in queue order under a single lock.
    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        let state = self.lock();
        let mut hosts = Vec::with_capacity(state.queue.len());
        hosts.extend(state.queue.iter().map(|slot| state.snapshot_of(slot)));
        hosts
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().pool.capacity()
    }

    pub fn free_slots(&self) -> usize {
        self.lock().free.len()
    }

    pub fn current_tick(&self) -> u64 {
        self.lock().tick
    }

    /// Cross-checks the three indices against each other and the slot states.
    pub fn check_invariants(&self) -> Result<(), TableError> {
        self.lock().check_invariants()
    }
}

impl TableState {
    fn insert(
        &mut self,
        mac: MacAddr,
        ip: Ipv4Addr,
        device: DeviceName,
        now: DateTime<Utc>,
    ) -> Option<SlotId> {
        let slot = match self.free.acquire() {
            Some(slot) => slot,
            None => {
                self.evict_oldest();
                self.free.acquire()?
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let info = HostInfo { mac, ip, device };
        self.pool.bind(slot, info, self.tick, now, seq);
        self.index.insert(&mac, slot);
        self.queue.push_front(slot);
        self.slots[slot.0] = SlotState::Active;
        debug!(%mac, %ip, slot = %slot, "tracking new host");
        Some(slot)
    }

    fn evict_oldest(&mut self) {
        if let Some(victim) = self.queue.pop_back() {
            let mac = self.pool.get(victim).info.mac;
            self.retire(victim);
            debug!(%mac, slot = %victim, "table full, evicted oldest host");
        }
    }

    fn record(
        &mut self,
        slot: SlotId,
        ip: Ipv4Addr,
        device: DeviceName,
        direction: Direction,
        bytes: u64,
        now: DateTime<Utc>,
    ) {
        let tick = self.tick;
        let entry = self.pool.get_mut(slot);
        entry.info.ip = ip;
        if !device.is_empty() {
            entry.info.device = device;
        }
        entry.stat.active_tick = tick;
        entry.stat.last_seen = now;
        entry.stat.add(direction, bytes);
    }

    fn remove_slot(&mut self, slot: SlotId) -> bool {
        if !self.is_active(slot) {
            return false;
        }
        self.queue.remove(slot);
        self.retire(slot);
        true
    }

    /// Unindexes a slot that has already left the queue and frees it.
    fn retire(&mut self, slot: SlotId) {
        self.index.remove(slot);
        self.slots[slot.0] = SlotState::Free;
        self.free.release(slot);
    }

    fn is_active(&self, slot: SlotId) -> bool {
        self.slots.get(slot.0) == Some(&SlotState::Active)
    }

    /// First queued slot inserted before `seq`. Queue order is strictly
    /// decreasing in `seq`, so this is where an interrupted walk resumes.
    fn first_older_than(&self, seq: u64) -> Option<SlotId> {
        self.queue.iter().find(|slot| self.pool.get(*slot).seq < seq)
    }

    fn snapshot_of(&self, slot: SlotId) -> HostSnapshot {
        let entry = self.pool.get(slot);
        HostSnapshot {
            slot,
            mac: entry.info.mac,
            ip: entry.info.ip,
            device: entry.info.device,
            download_speed: entry.stat.download_speed,
            upload_speed: entry.stat.upload_speed,
            download_total: entry.stat.download_total,
            upload_total: entry.stat.upload_total,
            last_seen: entry.stat.last_seen,
        }
    }

    fn check_invariants(&self) -> Result<(), TableError> {
        let capacity = self.pool.capacity();
        let active = self
            .slots
            .iter()
            .filter(|s| **s == SlotState::Active)
            .count();
        if active + self.free.len() != capacity {
            return Err(TableError::invariant(format!(
                "{active} active + {} free != capacity {capacity}",
                self.free.len()
            )));
        }
        if self.queue.len() != active || self.index.len() != active {
            return Err(TableError::invariant(format!(
                "queue holds {}, index holds {}, {active} slots active",
                self.queue.len(),
                self.index.len()
            )));
        }
        let mut free_seen = 0;
        for slot in self.free.iter() {
            free_seen += 1;
            if self.slots[slot.0] != SlotState::Free {
                return Err(TableError::invariant(format!("active slot {slot} on free list")));
            }
            if self.queue.contains(slot) || self.index.contains(slot) {
                return Err(TableError::invariant(format!("free slot {slot} is still linked")));
            }
            if free_seen > capacity {
                return Err(TableError::invariant("free list is cyclic"));
            }
        }
        if free_seen != self.free.len() {
            return Err(TableError::invariant(format!(
                "free list links {free_seen} slots but counts {}",
                self.free.len()
            )));
        }

        let mut prev_seq = None;
        for slot in self.queue.iter().take(capacity + 1) {
            if self.slots[slot.0] != SlotState::Active {
                return Err(TableError::invariant(format!("free slot {slot} is queued")));
            }
            if !self.index.contains(slot) {
                return Err(TableError::invariant(format!("queued slot {slot} not indexed")));
            }
            let entry = self.pool.get(slot);
            // Also proves key uniqueness: a duplicate would shadow one of the two.
            if self.index.find(&self.pool, &entry.info.mac) != Some(slot) {
                return Err(TableError::invariant(format!(
                    "{} does not resolve to slot {slot}",
                    entry.info.mac
                )));
            }
            if prev_seq.is_some_and(|prev| entry.seq >= prev) {
                return Err(TableError::invariant("queue is not in insertion order"));
            }
            prev_seq = Some(entry.seq);
        }
        if self.queue.iter().take(capacity).last() != self.queue.back() {
            return Err(TableError::invariant("queue tail does not match its last link"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum Cursor {
    Start,
    After { slot: SlotId, seq: u64 },
    Done,
}

/// Front-to-back walk over active hosts that tolerates concurrent removal.
///
/// If the entry last yielded has been removed in the meantime, the walk
/// resumes at the next surviving entry inserted before it. Hosts inserted
/// after the walk started are not visited.
pub struct Iter<'a> {
    table: &'a HostTable,
    cursor: Cursor,
}

impl Iterator for Iter<'_> {
    type Item = HostSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.table.lock();
        let next = match self.cursor {
            Cursor::Start => state.queue.front(),
            Cursor::After { slot, seq } => {
                if state.is_active(slot) && state.pool.get(slot).seq == seq {
                    state.queue.next_of(slot)
                } else {
                    state.first_older_than(seq)
                }
            }
            Cursor::Done => return None,
        };
        match next {
            Some(slot) => {
                self.cursor = Cursor::After {
                    slot,
                    seq: state.pool.get(slot).seq,
                };
                Some(state.snapshot_of(slot))
            }
            None => {
                self.cursor = Cursor::Done;
                None
            }
        }
    }
}
