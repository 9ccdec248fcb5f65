#![no_std]

// Value types shared between the host table and the capture front end.
// Keep this crate `no_std` friendly and allocation free so it can sit on the
// per-packet path.

use core::fmt;

pub const ETH_ALEN: usize = 6;
/// Same size as the kernel's `IFNAMSIZ`. Names are stored without a NUL, so
/// all 16 bytes hold characters.
pub const DEVICE_NAME_LEN: usize = 16;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; ETH_ALEN]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ALEN]);

    pub const fn new(octets: [u8; ETH_ALEN]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }

    /// False for the all-zero and broadcast sentinels, which never name a host.
    pub fn is_valid(&self) -> bool {
        *self != Self::ZERO && *self != Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl From<[u8; ETH_ALEN]> for MacAddr {
    fn from(octets: [u8; ETH_ALEN]) -> Self {
        Self(octets)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MacLengthError {
    pub len: usize,
}

impl fmt::Display for MacLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hardware address must be {ETH_ALEN} bytes, got {}",
            self.len
        )
    }
}

impl core::error::Error for MacLengthError {}

impl TryFrom<&[u8]> for MacAddr {
    type Error = MacLengthError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; ETH_ALEN] = bytes
            .try_into()
            .map_err(|_| MacLengthError { len: bytes.len() })?;
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Which way a frame crossed the LAN boundary, seen from the host.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// Toward the host; counted as download.
    Inbound = 0,
    /// From the host; counted as upload.
    Outbound = 1,
}

/// Interface name stored inline so entries stay fixed size.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct DeviceName {
    bytes: [u8; DEVICE_NAME_LEN],
    len: u8,
}

impl DeviceName {
    pub const EMPTY: DeviceName = DeviceName {
        bytes: [0; DEVICE_NAME_LEN],
        len: 0,
    };

    /// Copies `name`, truncating on a char boundary if it does not fit.
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(DEVICE_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; DEVICE_NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a `&str` cut on a char boundary.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceName").field(&self.as_str()).finish()
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DeviceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_rejects_wrong_length() {
        let short: &[u8] = &[1, 2, 3];
        assert_eq!(MacAddr::try_from(short), Err(MacLengthError { len: 3 }));
        let ok: &[u8] = &[0, 1, 2, 3, 4, 5];
        assert_eq!(MacAddr::try_from(ok), Ok(MacAddr([0, 1, 2, 3, 4, 5])));
    }

    #[test]
    fn sentinels_are_invalid() {
        assert!(!MacAddr::ZERO.is_valid());
        assert!(!MacAddr::BROADCAST.is_valid());
        assert!(MacAddr([0x02, 0, 0, 0, 0, 1]).is_valid());
    }

    #[test]
    fn device_name_truncates_on_char_boundary() {
        let name = DeviceName::new("br-lan");
        assert_eq!(name.as_str(), "br-lan");

        let long = DeviceName::new("a-very-long-interface-name");
        assert_eq!(long.as_str(), "a-very-long-inte");

        let full = DeviceName::new("0123456789abcdef");
        assert_eq!(full.as_str().len(), DEVICE_NAME_LEN);
        assert_eq!(full.as_str(), "0123456789abcdef");

        // 15 ASCII bytes then a two-byte char straddling the limit.
        let split = DeviceName::new("abcdefghijklmnoé");
        assert_eq!(split.as_str(), "abcdefghijklmno");
    }
}
