//! Per-host LAN traffic accounting.
//!
//! [`HostTable`] keeps cumulative byte counters and a one-tick transfer rate
//! for every hardware address seen crossing the LAN boundary, inside a fixed
//! number of slots. New hosts evict the oldest insertion once the table is
//! full, and [`HostTable::tick`] ages out hosts that went quiet.
//!
//! ```
//! use std::net::Ipv4Addr;
//!
//! use host_traffic::{Direction, HostTable, Observation, ObserveStatus};
//!
//! let table = HostTable::new(8).unwrap();
//! let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
//! let status = table.observe(Observation {
//!     mac: &mac,
//!     ip: Ipv4Addr::new(192, 168, 1, 2),
//!     device: "eth1",
//!     direction: Direction::Inbound,
//!     bytes: 1514,
//! });
//! assert_eq!(status, ObserveStatus::Created);
//!
//! table.tick();
//! let host = table.iter().next().unwrap();
//! assert_eq!(host.download_speed, 1514);
//! ```

pub mod aggregator;
pub mod classify;
pub mod config;
pub mod error;
pub mod report;
pub mod table;

pub use config::TableConfig;
pub use error::TableError;
pub use host_traffic_common::{DEVICE_NAME_LEN, DeviceName, Direction, MacAddr};
pub use table::{
    HostInfo, HostSnapshot, HostStat, HostTable, Iter, ObserveStatus, Observation, SlotId,
    TickSummary,
};
